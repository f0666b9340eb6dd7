use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::error::MarketplaceError;
use crate::models::{TackId, UserId};

/// Why a balance moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    /// Tacker debited the agreed price at acceptance
    EscrowHold,
    /// Escrowed price returned to the tacker on cancellation
    EscrowRefund,
    /// Runner credited at FINISHED
    Payout,
    /// Tacker debited at FINISHED when nothing was escrowed
    SettlementDebit,
    Deposit,
    Withdrawal,
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EscrowHold => "escrow_hold",
            Self::EscrowRefund => "escrow_refund",
            Self::Payout => "payout",
            Self::SettlementDebit => "settlement_debit",
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LedgerReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "escrow_hold" => Ok(Self::EscrowHold),
            "escrow_refund" => Ok(Self::EscrowRefund),
            "payout" => Ok(Self::Payout),
            "settlement_debit" => Ok(Self::SettlementDebit),
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            _ => Err(format!("Invalid ledger reason: {s}")),
        }
    }
}

/// One journaled balance movement. Debits carry a negative delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub delta: i64,
    pub reason: LedgerReason,
    pub tack_id: Option<TackId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn debit(
        user_id: UserId,
        amount: i64,
        reason: LedgerReason,
        tack_id: Option<TackId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_delta(user_id, -amount, reason, tack_id, now)
    }

    pub fn credit(
        user_id: UserId,
        amount: i64,
        reason: LedgerReason,
        tack_id: Option<TackId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::with_delta(user_id, amount, reason, tack_id, now)
    }

    fn with_delta(
        user_id: UserId,
        delta: i64,
        reason: LedgerReason,
        tack_id: Option<TackId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            delta,
            reason,
            tack_id,
            created_at: now,
        }
    }

    pub fn is_debit(&self) -> bool {
        self.delta < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Insufficient funds for user {user_id}: required {required}, available {available}")]
    InsufficientFunds {
        user_id: UserId,
        required: i64,
        available: i64,
    },

    #[error("Amount must be positive, got {amount}")]
    InvalidAmount { amount: i64 },

    #[error("Balance overflow for user {user_id}")]
    Overflow { user_id: UserId },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<LedgerError> for MarketplaceError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                user_id,
                required,
                available,
            } => MarketplaceError::InsufficientFunds {
                user_id,
                required,
                available,
            },
            LedgerError::InvalidAmount { amount } => {
                MarketplaceError::validation("amount", format!("must be positive, got {amount}"))
            }
            LedgerError::Overflow { .. } => MarketplaceError::Internal(err.to_string()),
        }
    }
}

pub fn ensure_positive(amount: i64) -> LedgerResult<()> {
    if amount > 0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount { amount })
    }
}

/// Apply entries in order against `balances`, all or nothing
///
/// A balance may never go negative at any point in the sequence, so a debit listed before the
/// credit that would fund it is rejected. On error `balances` is left untouched.
pub fn apply_entries(
    balances: &mut HashMap<UserId, i64>,
    entries: &[LedgerEntry],
) -> LedgerResult<()> {
    let mut staged: HashMap<UserId, i64> = HashMap::new();

    for entry in entries {
        let current = match staged.get(&entry.user_id) {
            Some(balance) => *balance,
            None => balances.get(&entry.user_id).copied().unwrap_or(0),
        };
        let next = current
            .checked_add(entry.delta)
            .ok_or(LedgerError::Overflow {
                user_id: entry.user_id,
            })?;
        if next < 0 {
            return Err(LedgerError::InsufficientFunds {
                user_id: entry.user_id,
                required: -entry.delta,
                available: current,
            });
        }
        staged.insert(entry.user_id, next);
    }

    balances.extend(staged);
    Ok(())
}

/// Escrow hold taken from the tacker at acceptance
pub fn escrow_hold(tacker: UserId, amount: i64, tack_id: TackId, now: DateTime<Utc>) -> LedgerEntry {
    LedgerEntry::debit(tacker, amount, LedgerReason::EscrowHold, Some(tack_id), now)
}

/// Escrow returned to the tacker on cancellation
pub fn escrow_refund(
    tacker: UserId,
    amount: i64,
    tack_id: TackId,
    now: DateTime<Utc>,
) -> LedgerEntry {
    LedgerEntry::credit(tacker, amount, LedgerReason::EscrowRefund, Some(tack_id), now)
}

/// Runner payout at FINISHED
pub fn payout(runner: UserId, amount: i64, tack_id: TackId, now: DateTime<Utc>) -> LedgerEntry {
    LedgerEntry::credit(runner, amount, LedgerReason::Payout, Some(tack_id), now)
}

/// Debit-then-credit pair moving `amount` from `payer` to `payee`
pub fn transfer(
    payer: UserId,
    payee: UserId,
    amount: i64,
    debit_reason: LedgerReason,
    credit_reason: LedgerReason,
    tack_id: Option<TackId>,
    now: DateTime<Utc>,
) -> [LedgerEntry; 2] {
    [
        LedgerEntry::debit(payer, amount, debit_reason, tack_id, now),
        LedgerEntry::credit(payee, amount, credit_reason, tack_id, now),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_apply_entries_rejects_overdraft_atomically() {
        let payer = UserId::new();
        let payee = UserId::new();
        let mut balances = HashMap::from([(payer, 500)]);

        let entries = transfer(
            payer,
            payee,
            700,
            LedgerReason::Withdrawal,
            LedgerReason::Deposit,
            None,
            Utc::now(),
        );
        let err = apply_entries(&mut balances, &entries).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                user_id: payer,
                required: 700,
                available: 500
            }
        );
        assert_eq!(balances.get(&payer), Some(&500));
        assert_eq!(balances.get(&payee), None);
    }

    #[test]
    fn test_transfer_moves_funds() {
        let payer = UserId::new();
        let payee = UserId::new();
        let tack_id = TackId::new();
        let mut balances = HashMap::from([(payer, 1000)]);

        let entries = transfer(
            payer,
            payee,
            900,
            LedgerReason::SettlementDebit,
            LedgerReason::Payout,
            Some(tack_id),
            Utc::now(),
        );
        apply_entries(&mut balances, &entries).unwrap();
        assert_eq!(balances[&payer], 100);
        assert_eq!(balances[&payee], 900);
        assert!(entries[0].is_debit());
        assert_eq!(entries[1].tack_id, Some(tack_id));
    }

    #[test]
    fn test_ledger_reason_round_trip() {
        for reason in [
            LedgerReason::EscrowHold,
            LedgerReason::EscrowRefund,
            LedgerReason::Payout,
            LedgerReason::SettlementDebit,
            LedgerReason::Deposit,
            LedgerReason::Withdrawal,
        ] {
            assert_eq!(reason.to_string().parse::<LedgerReason>().unwrap(), reason);
        }
    }

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive(1).is_ok());
        assert_eq!(
            MarketplaceError::from(ensure_positive(0).unwrap_err()).code(),
            "validation_error"
        );
    }

    proptest! {
        #[test]
        fn balances_never_go_negative(deltas in proptest::collection::vec(-500i64..500, 0..40)) {
            let user = UserId::new();
            let mut balances = HashMap::new();
            let now = Utc::now();
            let mut expected = 0i64;

            for delta in deltas {
                let entry = if delta < 0 {
                    LedgerEntry::debit(user, -delta, LedgerReason::Withdrawal, None, now)
                } else {
                    LedgerEntry::credit(user, delta, LedgerReason::Deposit, None, now)
                };
                match apply_entries(&mut balances, &[entry]) {
                    Ok(()) => expected += delta,
                    Err(LedgerError::InsufficientFunds { .. }) => prop_assert!(expected + delta < 0),
                    Err(other) => prop_assert!(false, "unexpected error {other}"),
                }
                let balance = balances.get(&user).copied().unwrap_or(0);
                prop_assert!(balance >= 0);
                prop_assert_eq!(balance, expected);
            }
        }
    }
}
