use chrono::{DateTime, Utc};
use serde_json::json;

use super::{
    errors::{invalid_transition, StateMachineResult},
    events::TackEvent,
    guards::{AcceptedOfferPresentGuard, RunnerOnlyGuard, StateGuard, TackerOnlyGuard},
    states::TackStatus,
};
use crate::models::transitions::{CANCELED_STATE, DELETED_STATE};
use crate::models::{EntityRef, Tack, TackTransition, UserId};

/// Tack lifecycle state machine
///
/// Owns a working copy of the tack. Every successful transition mutates the copy and returns
/// the audit record to persist with it; nothing is written until the caller commits.
#[derive(Debug, Clone)]
pub struct TackStateMachine {
    tack: Tack,
}

impl TackStateMachine {
    pub fn new(tack: Tack) -> Self {
        Self { tack }
    }

    pub fn tack(&self) -> &Tack {
        &self.tack
    }

    pub fn into_tack(self) -> Tack {
        self.tack
    }

    /// The lifecycle position as recorded in the audit trail
    pub fn lifecycle_state(tack: &Tack) -> String {
        if tack.is_canceled {
            CANCELED_STATE.to_string()
        } else if !tack.is_active {
            DELETED_STATE.to_string()
        } else {
            tack.status.to_string()
        }
    }

    /// Determine the target status based on current status and event
    ///
    /// Cancel and delete keep the status and flip flags instead.
    pub fn determine_target_state(
        &self,
        current: TackStatus,
        event: &TackEvent,
    ) -> StateMachineResult<TackStatus> {
        use TackEvent::*;
        use TackStatus::*;

        let target = match (current, event) {
            (Created, OfferOpened) => Active,
            (Active, OffersDrained) => Created,

            (Created | Active, Accept { .. }) => Accepted,

            (Accepted, Start) => InProgress,
            (InProgress, Complete { .. }) => WaitingReview,
            (WaitingReview, Confirm | ReviewFinish) => Finished,

            (status, Cancel) if !status.is_terminal() => status,
            (Created | Active, Delete(_)) => current,

            (from, event) => {
                return Err(invalid_transition(
                    EntityRef::Tack(self.tack.id),
                    from,
                    event.event_type(),
                ))
            }
        };

        Ok(target)
    }

    /// Attempt a transition
    ///
    /// Returns `Ok(None)` when the event was already applied (repeat cancel or delete), which
    /// callers treat as a silent no-op.
    pub fn transition(
        &mut self,
        event: TackEvent,
        actor_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Option<TackTransition>> {
        if self.is_repeat(&event) {
            return Ok(None);
        }

        let from_state = Self::lifecycle_state(&self.tack);
        if !self.tack.is_live() && !matches!(event, TackEvent::Cancel) {
            return Err(invalid_transition(
                EntityRef::Tack(self.tack.id),
                from_state,
                event.event_type(),
            ));
        }

        let current = self.tack.status;
        let target = self.determine_target_state(current, &event)?;

        if let Some(actor_id) = actor_id {
            self.check_guards(&event, actor_id)?;
        }
        if matches!(event, TackEvent::Start) {
            AcceptedOfferPresentGuard { event: "start" }.check(&self.tack)?;
        }

        let metadata = self.apply(&event, target, now);
        let to_state = Self::lifecycle_state(&self.tack);

        Ok(Some(TackTransition::new(
            self.tack.id,
            Some(from_state),
            to_state,
            event.event_type(),
            actor_id,
            metadata,
            now,
        )))
    }

    fn is_repeat(&self, event: &TackEvent) -> bool {
        match event {
            TackEvent::Cancel => self.tack.is_canceled,
            TackEvent::Delete(_) => !self.tack.is_active,
            _ => false,
        }
    }

    /// Check actor guard conditions for the transition
    fn check_guards(&self, event: &TackEvent, actor_id: UserId) -> StateMachineResult<()> {
        match event {
            TackEvent::Accept { .. } => TackerOnlyGuard {
                actor_id,
                action: "accept offers on this tack",
            }
            .check(&self.tack)?,
            TackEvent::Confirm | TackEvent::ReviewFinish => TackerOnlyGuard {
                actor_id,
                action: "confirm this tack",
            }
            .check(&self.tack)?,
            TackEvent::Cancel => TackerOnlyGuard {
                actor_id,
                action: "cancel this tack",
            }
            .check(&self.tack)?,
            TackEvent::Delete(_) => TackerOnlyGuard {
                actor_id,
                action: "delete this tack",
            }
            .check(&self.tack)?,
            TackEvent::Start => RunnerOnlyGuard {
                actor_id,
                action: "start this tack",
            }
            .check(&self.tack)?,
            TackEvent::Complete { .. } => RunnerOnlyGuard {
                actor_id,
                action: "complete this tack",
            }
            .check(&self.tack)?,
            TackEvent::OfferOpened | TackEvent::OffersDrained => {}
        }
        Ok(())
    }

    fn apply(
        &mut self,
        event: &TackEvent,
        target: TackStatus,
        now: DateTime<Utc>,
    ) -> serde_json::Value {
        let tack = &mut self.tack;
        tack.status = target;
        tack.updated_at = now;

        match event {
            TackEvent::Accept {
                offer_id,
                runner_id,
                price,
            } => {
                let listed_price = tack.price;
                tack.runner_id = Some(*runner_id);
                tack.accepted_offer_id = Some(*offer_id);
                tack.price = *price;
                tack.accepted_time = Some(now);
                json!({
                    "offer_id": offer_id,
                    "runner_id": runner_id,
                    "price": price,
                    "listed_price": listed_price,
                })
            }
            TackEvent::Start => {
                tack.start_completion_time = Some(now);
                json!({ "runner_id": tack.runner_id })
            }
            TackEvent::Complete { message } => {
                tack.completion_time = Some(now);
                tack.completion_message = message.clone();
                json!({ "runner_id": tack.runner_id })
            }
            TackEvent::Confirm | TackEvent::ReviewFinish => {
                tack.is_paid = true;
                json!({ "price": tack.price, "runner_id": tack.runner_id })
            }
            TackEvent::Cancel => {
                tack.is_canceled = true;
                tack.is_active = false;
                json!({ "status": tack.status, "accepted_offer_id": tack.accepted_offer_id })
            }
            TackEvent::Delete(reason) => {
                tack.is_active = false;
                json!({ "status": tack.status, "reason": reason })
            }
            TackEvent::OfferOpened | TackEvent::OffersDrained => json!({}),
        }
    }
}
