use super::errors::{GuardError, GuardResult};
use crate::models::{EntityRef, Offer, Tack, UserId};

/// Trait for implementing state transition guards
pub trait StateGuard<T> {
    /// Check if a transition is allowed
    fn check(&self, entity: &T) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Only the tacker may perform the action
pub struct TackerOnlyGuard {
    pub actor_id: UserId,
    pub action: &'static str,
}

impl StateGuard<Tack> for TackerOnlyGuard {
    fn check(&self, tack: &Tack) -> GuardResult<()> {
        if tack.is_tacker(self.actor_id) {
            Ok(())
        } else {
            Err(GuardError::NotAuthorized {
                actor_id: self.actor_id,
                action: self.action,
            })
        }
    }

    fn description(&self) -> &'static str {
        "Actor must be the tack's tacker"
    }
}

/// Only the assigned runner may perform the action
pub struct RunnerOnlyGuard {
    pub actor_id: UserId,
    pub action: &'static str,
}

impl StateGuard<Tack> for RunnerOnlyGuard {
    fn check(&self, tack: &Tack) -> GuardResult<()> {
        if tack.is_runner(self.actor_id) {
            Ok(())
        } else {
            Err(GuardError::NotAuthorized {
                actor_id: self.actor_id,
                action: self.action,
            })
        }
    }

    fn description(&self) -> &'static str {
        "Actor must be the tack's runner"
    }
}

/// Work cannot start without an accepted offer
pub struct AcceptedOfferPresentGuard {
    pub event: &'static str,
}

impl StateGuard<Tack> for AcceptedOfferPresentGuard {
    fn check(&self, tack: &Tack) -> GuardResult<()> {
        if tack.accepted_offer_id.is_some() && tack.runner_id.is_some() {
            Ok(())
        } else {
            Err(GuardError::PreconditionFailed {
                entity: EntityRef::Tack(tack.id),
                state: tack.status.to_string(),
                event: self.event.to_string(),
                rule: self.description(),
            })
        }
    }

    fn description(&self) -> &'static str {
        "Tack must have an accepted offer"
    }
}

/// Only the runner who made the offer may withdraw it
pub struct OfferOwnerGuard {
    pub actor_id: UserId,
}

impl StateGuard<Offer> for OfferOwnerGuard {
    fn check(&self, offer: &Offer) -> GuardResult<()> {
        if offer.runner_id == self.actor_id {
            Ok(())
        } else {
            Err(GuardError::NotAuthorized {
                actor_id: self.actor_id,
                action: "withdraw this offer",
            })
        }
    }

    fn description(&self) -> &'static str {
        "Actor must own the offer"
    }
}

/// The payer must be able to cover the escrow hold
pub struct SufficientBalanceGuard {
    pub user_id: UserId,
    pub available: i64,
    pub required: i64,
}

impl StateGuard<Tack> for SufficientBalanceGuard {
    fn check(&self, _tack: &Tack) -> GuardResult<()> {
        if self.available >= self.required {
            Ok(())
        } else {
            Err(GuardError::InsufficientBalance {
                user_id: self.user_id,
                required: self.required,
                available: self.available,
            })
        }
    }

    fn description(&self) -> &'static str {
        "Payer balance must cover the agreed price"
    }
}
