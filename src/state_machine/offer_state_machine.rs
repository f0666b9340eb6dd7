use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    errors::{invalid_transition, StateMachineResult},
    events::OfferEvent,
    guards::{OfferOwnerGuard, StateGuard},
    states::OfferStatus,
};
use crate::models::{EntityRef, Offer, OfferId, TackId, UserId};

/// A committed-to-be offer status change, used to drive notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferChange {
    pub offer_id: OfferId,
    pub tack_id: TackId,
    pub runner_id: UserId,
    pub from: OfferStatus,
    pub to: OfferStatus,
    pub event: OfferEvent,
}

/// Offer state machine
///
/// Stale events (expiring an offer that already left CREATED, cascading onto a finished offer)
/// resolve to `Ok(None)` so scheduler redelivery stays harmless.
#[derive(Debug, Clone)]
pub struct OfferStateMachine {
    offer: Offer,
}

impl OfferStateMachine {
    pub fn new(offer: Offer) -> Self {
        Self { offer }
    }

    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    pub fn into_offer(self) -> Offer {
        self.offer
    }

    /// Determine the target status based on current status and event
    pub fn determine_target_state(
        &self,
        current: OfferStatus,
        event: OfferEvent,
    ) -> StateMachineResult<OfferStatus> {
        use OfferEvent::*;
        use OfferStatus::*;

        let target = match (current, event) {
            (Created, Accept) => Accepted,
            (Created, Expire) => Expired,
            (Created, Withdraw | Supersede | DeleteWithTack) => Deleted,
            (Created | Accepted, CancelWithTack) => Cancelled,
            (Accepted, Finish) => Finished,
            (from, event) => {
                return Err(invalid_transition(
                    EntityRef::Offer(self.offer.id),
                    from,
                    event.event_type(),
                ))
            }
        };

        Ok(target)
    }

    pub fn transition(
        &mut self,
        event: OfferEvent,
        actor_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> StateMachineResult<Option<OfferChange>> {
        if self.is_stale(event) {
            return Ok(None);
        }

        if let (OfferEvent::Withdraw, Some(actor_id)) = (event, actor_id) {
            OfferOwnerGuard { actor_id }.check(&self.offer)?;
        }

        let from = self.offer.status;
        let to = self.determine_target_state(from, event)?;

        self.offer.status = to;
        self.offer.is_active = to == OfferStatus::Accepted;
        self.offer.updated_at = now;

        Ok(Some(OfferChange {
            offer_id: self.offer.id,
            tack_id: self.offer.tack_id,
            runner_id: self.offer.runner_id,
            from,
            to,
            event,
        }))
    }

    fn is_stale(&self, event: OfferEvent) -> bool {
        let status = self.offer.status;
        match event {
            OfferEvent::Accept | OfferEvent::Finish => false,
            OfferEvent::Withdraw => status.is_terminal(),
            OfferEvent::Expire | OfferEvent::Supersede | OfferEvent::DeleteWithTack => {
                !status.is_open()
            }
            OfferEvent::CancelWithTack => status.is_terminal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::errors::StateMachineError;

    fn machine(runner: UserId) -> OfferStateMachine {
        OfferStateMachine::new(Offer::new(TackId::new(), runner, None, 60, Utc::now()))
    }

    #[test]
    fn test_accept_then_finish() {
        let mut sm = machine(UserId::new());
        let now = Utc::now();

        let change = sm.transition(OfferEvent::Accept, None, now).unwrap().unwrap();
        assert_eq!(change.from, OfferStatus::Created);
        assert_eq!(change.to, OfferStatus::Accepted);
        assert!(sm.offer().is_active);

        sm.transition(OfferEvent::Finish, None, now).unwrap();
        assert_eq!(sm.offer().status, OfferStatus::Finished);
        assert!(!sm.offer().is_active);
    }

    #[test]
    fn test_expire_is_noop_once_resolved() {
        let mut sm = machine(UserId::new());
        let now = Utc::now();

        sm.transition(OfferEvent::Accept, None, now).unwrap();
        assert!(sm.transition(OfferEvent::Expire, None, now).unwrap().is_none());
        assert_eq!(sm.offer().status, OfferStatus::Accepted);

        let mut expired = machine(UserId::new());
        expired.transition(OfferEvent::Expire, None, now).unwrap();
        assert_eq!(expired.offer().status, OfferStatus::Expired);
        assert!(!expired.offer().is_active);
        assert!(expired
            .transition(OfferEvent::Expire, None, now)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_withdraw_rules() {
        let runner = UserId::new();
        let now = Utc::now();

        let mut foreign = machine(runner);
        assert!(matches!(
            foreign.transition(OfferEvent::Withdraw, Some(UserId::new()), now),
            Err(StateMachineError::GuardFailed(_))
        ));

        let mut accepted = machine(runner);
        accepted.transition(OfferEvent::Accept, None, now).unwrap();
        assert!(matches!(
            accepted.transition(OfferEvent::Withdraw, Some(runner), now),
            Err(StateMachineError::InvalidTransition { .. })
        ));

        let mut own = machine(runner);
        let change = own
            .transition(OfferEvent::Withdraw, Some(runner), now)
            .unwrap()
            .unwrap();
        assert_eq!(change.to, OfferStatus::Deleted);
        assert!(own
            .transition(OfferEvent::Withdraw, Some(runner), now)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_cancel_cascade_covers_accepted_offer() {
        let mut sm = machine(UserId::new());
        let now = Utc::now();
        sm.transition(OfferEvent::Accept, None, now).unwrap();

        let change = sm
            .transition(OfferEvent::CancelWithTack, None, now)
            .unwrap()
            .unwrap();
        assert_eq!(change.from, OfferStatus::Accepted);
        assert_eq!(sm.offer().status, OfferStatus::Cancelled);
        assert!(!sm.offer().is_active);
    }

    #[test]
    fn test_accept_requires_created() {
        let mut sm = machine(UserId::new());
        let now = Utc::now();
        sm.transition(OfferEvent::Supersede, None, now).unwrap();
        assert!(sm.transition(OfferEvent::Accept, None, now).is_err());
    }
}
