use thiserror::Error;

use crate::error::MarketplaceError;
use crate::models::{EntityRef, UserId};

/// Error types for state machine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid transition for {entity}: '{event}' is not allowed from '{from}'")]
    InvalidTransition {
        entity: EntityRef,
        from: String,
        event: String,
    },

    #[error("Guard condition failed: {0}")]
    GuardFailed(#[from] GuardError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specific error type for guard condition failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    #[error("User {actor_id} is not allowed to {action}")]
    NotAuthorized {
        actor_id: UserId,
        action: &'static str,
    },

    #[error("Precondition '{rule}' failed for {entity} in state '{state}' on '{event}'")]
    PreconditionFailed {
        entity: EntityRef,
        state: String,
        event: String,
        rule: &'static str,
    },

    #[error("Insufficient balance for user {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        user_id: UserId,
        required: i64,
        available: i64,
    },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;

/// Helper function to create invalid transition errors
pub fn invalid_transition(
    entity: EntityRef,
    from: impl ToString,
    event: impl ToString,
) -> StateMachineError {
    StateMachineError::InvalidTransition {
        entity,
        from: from.to_string(),
        event: event.to_string(),
    }
}

impl From<GuardError> for MarketplaceError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::NotAuthorized { actor_id, action } => MarketplaceError::PermissionDenied {
                reason: format!("user {actor_id} is not allowed to {action}"),
            },
            GuardError::PreconditionFailed {
                entity,
                state,
                event,
                ..
            } => MarketplaceError::InvalidTransition {
                entity,
                from: state,
                event,
            },
            GuardError::InsufficientBalance {
                user_id,
                required,
                available,
            } => MarketplaceError::InsufficientFunds {
                user_id,
                required,
                available,
            },
        }
    }
}

impl From<StateMachineError> for MarketplaceError {
    fn from(err: StateMachineError) -> Self {
        match err {
            StateMachineError::InvalidTransition {
                entity,
                from,
                event,
            } => MarketplaceError::InvalidTransition {
                entity,
                from,
                event,
            },
            StateMachineError::GuardFailed(guard) => guard.into(),
            StateMachineError::Internal(msg) => MarketplaceError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TackId;

    #[test]
    fn test_guard_errors_map_to_marketplace_codes() {
        let actor_id = UserId::new();
        let denied: MarketplaceError = GuardError::NotAuthorized {
            actor_id,
            action: "start this tack",
        }
        .into();
        assert_eq!(denied.code(), "permission_denied");

        let funds: MarketplaceError = StateMachineError::from(GuardError::InsufficientBalance {
            user_id: actor_id,
            required: 10,
            available: 1,
        })
        .into();
        assert_eq!(funds.code(), "insufficient_funds");

        let precondition: MarketplaceError = GuardError::PreconditionFailed {
            entity: EntityRef::Tack(TackId::new()),
            state: "accepted".to_string(),
            event: "start".to_string(),
            rule: "accepted offer present",
        }
        .into();
        assert_eq!(precondition.code(), "invalid_transition");
    }
}
