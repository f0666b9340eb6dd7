//! Proptest strategies for marketplace scenarios.

use proptest::prelude::*;

/// Number of runners competing in a generated scenario
pub const RUNNERS: usize = 3;

/// One command in a generated scenario; runners are addressed by index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Submit { runner: usize, counter: Option<i64> },
    Accept { runner: usize },
    Withdraw { runner: usize },
    Expire { runner: usize },
    Start,
    Complete,
    Confirm,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub price: i64,
    pub deposit: i64,
    pub allow_counter_offer: bool,
    pub ops: Vec<Op>,
}

pub fn runner_strategy() -> impl Strategy<Value = usize> {
    0..RUNNERS
}

pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (runner_strategy(), prop::option::of(0i64..=1_000))
            .prop_map(|(runner, counter)| Op::Submit { runner, counter }),
        2 => runner_strategy().prop_map(|runner| Op::Accept { runner }),
        1 => runner_strategy().prop_map(|runner| Op::Withdraw { runner }),
        1 => runner_strategy().prop_map(|runner| Op::Expire { runner }),
        1 => Just(Op::Start),
        1 => Just(Op::Complete),
        1 => Just(Op::Confirm),
        1 => Just(Op::Cancel),
    ]
}

pub fn scenario_strategy() -> impl Strategy<Value = Scenario> {
    (
        0i64..=1_000,
        0i64..=1_500,
        any::<bool>(),
        prop::collection::vec(op_strategy(), 1..30),
    )
        .prop_map(|(price, deposit, allow_counter_offer, ops)| Scenario {
            price,
            deposit,
            allow_counter_offer,
            ops,
        })
}
