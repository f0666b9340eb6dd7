//! Shared harness for the marketplace integration tests.
//!
//! Every test gets its own in-memory store, a recording notifier that stands in for both the
//! realtime and the push transport, and a manual scheduler whose jobs are fired by hand.

#![allow(dead_code)]

pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tack_market::config::{AutoAcceptSettlement, MarketplaceConfig};
use tack_market::membership::{MembershipDirectory, StaticMembership};
use tack_market::models::{GroupId, NewTack, Offer, Tack, TackType, UserId};
use tack_market::notifications::{NotificationFanout, Notifier, PushNotifier, RecordingNotifier};
use tack_market::scheduler::{JobHandler, ManualScheduler, ScheduledJob};
use tack_market::services::{Marketplace, NewOffer, SystemContext};
use tack_market::store::InMemoryStore;
use tack_market::MarketplaceResult;

pub struct TestMarket {
    pub market: Marketplace,
    pub store: Arc<InMemoryStore>,
    pub membership: Arc<StaticMembership>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Arc<ManualScheduler>,
}

/// Static membership answered after a delay
struct DelayedMembership {
    inner: Arc<StaticMembership>,
    latency: Duration,
}

#[async_trait]
impl MembershipDirectory for DelayedMembership {
    async fn is_member(&self, user_id: UserId, group_id: GroupId) -> MarketplaceResult<bool> {
        tokio::time::sleep(self.latency).await;
        self.inner.is_member(user_id, group_id).await
    }
}

/// A tack with an accepted offer, and who is on each side of it
pub struct AcceptedTack {
    pub tack: Tack,
    pub offer: Offer,
    pub tacker: UserId,
    pub runner: UserId,
}

impl TestMarket {
    pub fn new() -> Self {
        Self::with_config(MarketplaceConfig::default())
    }

    pub fn with_settlement(settlement: AutoAcceptSettlement) -> Self {
        let mut config = MarketplaceConfig::default();
        config.ledger.auto_accept_settlement = settlement;
        Self::with_config(config)
    }

    pub fn with_config(config: MarketplaceConfig) -> Self {
        Self::build(config, None)
    }

    /// Membership lookups take `latency`, like a database round trip
    pub fn with_membership_latency(latency: Duration) -> Self {
        Self::build(MarketplaceConfig::default(), Some(latency))
    }

    fn build(config: MarketplaceConfig, membership_latency: Option<Duration>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let membership = Arc::new(StaticMembership::new());
        let directory: Arc<dyn MembershipDirectory> = match membership_latency {
            Some(latency) => Arc::new(DelayedMembership {
                inner: Arc::clone(&membership),
                latency,
            }),
            None => membership.clone(),
        };
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = Arc::new(ManualScheduler::new());

        let fanout = NotificationFanout::new(
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Some(Arc::clone(&notifier) as Arc<dyn PushNotifier>),
            Duration::from_millis(500),
        );
        let ctx = SystemContext::new(
            store.clone(),
            directory,
            fanout,
            scheduler.clone(),
            Arc::new(config),
        );

        Self {
            market: Marketplace::new(ctx),
            store,
            membership,
            notifier,
            scheduler,
        }
    }

    /// A fresh user holding `balance`
    pub async fn funded_user(&self, balance: i64) -> UserId {
        let user = UserId::new();
        if balance > 0 {
            self.market
                .deposit(user, balance)
                .await
                .expect("deposit should succeed");
        }
        user
    }

    pub async fn public_tack(&self, tacker: UserId, price: i64) -> Tack {
        self.create_tack(tacker, NewTack::new("Carry boxes upstairs", price, TackType::Public))
            .await
    }

    /// A group tack; the tacker is enrolled in the group first
    pub async fn group_tack(&self, tacker: UserId, group_id: GroupId, price: i64) -> Tack {
        self.membership.add_member(group_id, tacker);
        self.create_tack(
            tacker,
            NewTack::new("Water the plants", price, TackType::Group).in_group(group_id),
        )
        .await
    }

    pub async fn create_tack(&self, tacker: UserId, input: NewTack) -> Tack {
        self.market
            .create_tack(tacker, input)
            .await
            .expect("tack creation should succeed")
    }

    pub async fn offer(&self, tack: &Tack, runner: UserId) -> Offer {
        self.market
            .submit_offer(tack.id, runner, NewOffer::default())
            .await
            .expect("offer submission should succeed")
    }

    /// Public tack at `price`, funded tacker with `tacker_balance`, one accepted offer
    pub async fn accepted_tack(&self, price: i64, tacker_balance: i64) -> AcceptedTack {
        let tacker = self.funded_user(tacker_balance).await;
        let runner = UserId::new();
        let tack = self.public_tack(tacker, price).await;
        let offer = self.offer(&tack, runner).await;
        let acceptance = self
            .market
            .accept_offer(offer.id, tacker)
            .await
            .expect("acceptance should succeed");

        AcceptedTack {
            tack: acceptance.tack,
            offer: acceptance.offer,
            tacker,
            runner,
        }
    }

    /// Drive an accepted tack to WAITING_REVIEW
    pub async fn complete(&self, accepted: &AcceptedTack) -> Tack {
        self.market
            .start_tack(accepted.tack.id, accepted.runner)
            .await
            .expect("start should succeed");
        self.market
            .complete_tack(accepted.tack.id, accepted.runner, Some("All done".to_string()))
            .await
            .expect("completion should succeed")
    }

    /// Fire every pending job through the marketplace's job handler
    pub async fn run_pending_jobs(&self) -> Vec<ScheduledJob> {
        let jobs = self.scheduler.drain();
        for job in &jobs {
            self.market
                .handle(*job)
                .await
                .expect("scheduled job should succeed");
        }
        jobs
    }

    pub fn events_for_user(&self, user: UserId) -> Vec<String> {
        self.notifier.events_for(&format!("user_{user}"))
    }

    pub fn pushed_events_for(&self, user: UserId) -> Vec<String> {
        self.notifier
            .pushes()
            .into_iter()
            .filter(|push| push.user_id == user)
            .map(|push| push.event)
            .collect()
    }
}
