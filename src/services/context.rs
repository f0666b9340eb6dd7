//! # System Context
//!
//! The collaborators every command needs, built once and shared by reference, plus the
//! plan/commit/dispatch sequence all commands follow:
//!
//! 1. load current state and run the pure state machines into a [`TransitionPlan`]
//! 2. commit the plan's [`ChangeSet`] atomically
//! 3. dispatch the plan's notifications and schedule its jobs
//!
//! Nothing in step 3 can undo step 2.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::MarketplaceConfig;
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::membership::MembershipDirectory;
use crate::models::{EntityRef, Offer, OfferId, Tack, TackId, UserId};
use crate::notifications::{NotificationFanout, NotificationPlan};
use crate::scheduler::{ScheduledJob, Scheduler};
use crate::state_machine::actions::{
    build_offer_event_context, build_tack_event_context, determine_offer_event_name,
    determine_tack_event_name,
};
use crate::state_machine::{OfferEvent, OfferStateMachine, TackEvent, TackStateMachine};
use crate::store::{
    ChangeSet, CommitReceipt, MarketplaceStore, OfferSetGuard, OfferSweep, OpenOffers,
};

#[derive(Clone)]
pub struct SystemContext {
    pub store: Arc<dyn MarketplaceStore>,
    pub membership: Arc<dyn MembershipDirectory>,
    pub fanout: NotificationFanout,
    pub scheduler: Arc<dyn Scheduler>,
    pub config: Arc<MarketplaceConfig>,
}

impl SystemContext {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        membership: Arc<dyn MembershipDirectory>,
        fanout: NotificationFanout,
        scheduler: Arc<dyn Scheduler>,
        config: Arc<MarketplaceConfig>,
    ) -> Self {
        Self {
            store,
            membership,
            fanout,
            scheduler,
            config,
        }
    }

    pub async fn load_tack(&self, tack_id: TackId) -> MarketplaceResult<Tack> {
        self.store
            .get_tack(tack_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found(EntityRef::Tack(tack_id)))
    }

    pub async fn load_offer(&self, offer_id: OfferId) -> MarketplaceResult<Offer> {
        self.store
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| MarketplaceError::not_found(EntityRef::Offer(offer_id)))
    }

    /// Group and Friends tacks are only visible to members of their group
    pub async fn ensure_visible(&self, tack: &Tack, user_id: UserId) -> MarketplaceResult<()> {
        if !tack.tack_type.requires_membership() || tack.is_tacker(user_id) {
            return Ok(());
        }
        let visible = match tack.group_id {
            Some(group_id) => self.membership.is_member(user_id, group_id).await?,
            None => false,
        };
        if visible {
            Ok(())
        } else {
            Err(MarketplaceError::NotVisible {
                tack_id: tack.id,
                user_id,
            })
        }
    }

    /// Re-run `attempt` while it fails with a version conflict, up to the configured retries
    ///
    /// Each attempt must reload what it reads so the retry plans against fresh state.
    pub async fn retry_on_conflict<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> MarketplaceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MarketplaceResult<T>>,
    {
        let retries = self.config.lifecycle.conflict_retries;
        let mut tries = 0;
        loop {
            match attempt().await {
                Err(MarketplaceError::Conflict { entity }) if tries < retries => {
                    tries += 1;
                    debug!(
                        operation = operation,
                        entity = %entity,
                        retry = tries,
                        "Version conflict, re-planning"
                    );
                }
                other => return other,
            }
        }
    }

    /// Commit the plan, then run its side effects
    pub async fn execute(&self, plan: TransitionPlan) -> MarketplaceResult<CommitReceipt> {
        let TransitionPlan {
            changes,
            mut notifications,
            jobs,
            ..
        } = plan;

        let swept_tacks: HashMap<TackId, Tack> = changes
            .sweeps
            .iter()
            .map(|sweep| (sweep.tack.id, sweep.tack.clone()))
            .collect();
        let receipt = if changes.is_empty() {
            CommitReceipt::default()
        } else {
            self.store.commit(changes).await?
        };

        for change in &receipt.swept {
            let (Some(offer), Some(tack)) = (
                receipt.offer(change.offer_id),
                swept_tacks.get(&change.tack_id),
            ) else {
                continue;
            };
            debug!(offer_id = %offer.id, tack_id = %tack.id, "Closed offer missing from plan");
            notifications.offer_event(
                offer,
                tack,
                determine_offer_event_name(change),
                build_offer_event_context(offer, Some(change)),
            );
        }

        self.fanout.dispatch(notifications).await;
        for (delay, job) in jobs {
            self.schedule(delay, job);
        }
        Ok(receipt)
    }

    /// Schedule a job after commit; failures are logged and left to the periodic sweeps
    pub fn schedule(&self, delay: Duration, job: ScheduledJob) {
        if let Err(err) = self.scheduler.schedule(delay, job) {
            warn!(job = %job, error = %err, "Failed to schedule job");
        }
    }
}

/// Everything one command intends to do, assembled before anything is written
#[derive(Debug)]
pub struct TransitionPlan {
    pub changes: ChangeSet,
    pub notifications: NotificationPlan,
    pub jobs: Vec<(Duration, ScheduledJob)>,
    pub now: DateTime<Utc>,
}

impl TransitionPlan {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            changes: ChangeSet::new(),
            notifications: NotificationPlan::new(),
            jobs: Vec::new(),
            now,
        }
    }

    /// Run a tack event through the state machine and stage the result
    ///
    /// Returns the updated tack, or `None` when the event was already applied.
    pub fn tack_event(
        &mut self,
        tack: &Tack,
        event: TackEvent,
        actor_id: Option<UserId>,
    ) -> MarketplaceResult<Option<Tack>> {
        let previous_status = tack.status;
        let event_name = determine_tack_event_name(&event);
        let mut machine = TackStateMachine::new(tack.clone());
        let Some(transition) = machine.transition(event, actor_id, self.now)? else {
            return Ok(None);
        };

        let updated = machine.into_tack();
        let payload = build_tack_event_context(&updated, Some(&transition));
        self.notifications
            .tack_event(&updated, previous_status, event_name, payload);
        self.changes.update_tack(updated.clone());
        self.changes.transition(transition);
        Ok(Some(updated))
    }

    /// Run an offer event through the state machine and stage the result
    pub fn offer_event(
        &mut self,
        offer: &Offer,
        tack: &Tack,
        event: OfferEvent,
        actor_id: Option<UserId>,
    ) -> MarketplaceResult<Option<Offer>> {
        let mut machine = OfferStateMachine::new(offer.clone());
        let Some(change) = machine.transition(event, actor_id, self.now)? else {
            return Ok(None);
        };

        let updated = machine.into_offer();
        let payload = build_offer_event_context(&updated, Some(&change));
        self.notifications
            .offer_event(&updated, tack, determine_offer_event_name(&change), payload);
        self.changes.update_offer(updated.clone());
        Ok(Some(updated))
    }

    /// Rewrite the tack unchanged so the commit fails if anyone else wrote it meanwhile
    pub fn touch_tack(&mut self, tack: &Tack) {
        self.changes.update_tack(tack.clone());
    }

    /// Require the tack to still be open in its current status, with `open_offers`
    pub fn guard_offers(&mut self, tack: &Tack, open_offers: OpenOffers) {
        self.changes.guard(OfferSetGuard {
            tack_id: tack.id,
            status: tack.status,
            open_offers,
        });
    }

    /// Close, in the same commit, any open offer of `tack` this plan did not stage
    pub fn sweep_offers(&mut self, tack: &Tack, event: OfferEvent) {
        self.changes.sweep(OfferSweep {
            tack: tack.clone(),
            event,
            now: self.now,
        });
    }

    pub fn schedule(&mut self, delay: Duration, job: ScheduledJob) {
        self.jobs.push((delay, job));
    }
}
