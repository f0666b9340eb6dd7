//! Error types for the marketplace core.
//!
//! Subsystems keep their own error enums (`StateMachineError`, `StoreError`, `LedgerError`,
//! `SchedulerError`, `ConfigurationError`) and convert into [`MarketplaceError`] at the
//! operation boundary. Every variant maps to a stable machine-readable [`code`](MarketplaceError::code).

use thiserror::Error;

use crate::models::{EntityRef, OfferId, TackId, UserId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketplaceError {
    #[error("Validation error on '{field}': {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("{entity} not found")]
    NotFound { entity: EntityRef },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Tack {tack_id} is not visible to user {user_id}")]
    NotVisible { tack_id: TackId, user_id: UserId },

    #[error("Runner {runner_id} already has an active offer on tack {tack_id}")]
    DuplicateOffer { tack_id: TackId, runner_id: UserId },

    #[error("Tack {tack_id} does not allow counter offers")]
    CounterOfferNotAllowed { tack_id: TackId },

    #[error("Tacker cannot make an offer on their own tack {tack_id}")]
    SelfOfferNotAllowed { tack_id: TackId },

    #[error("Offer {offer_id} is accepted and cannot be withdrawn")]
    CannotWithdrawAccepted { offer_id: OfferId },

    #[error("Offer {offer_id} lost the acceptance race on tack {tack_id}")]
    AcceptanceRaceLost { tack_id: TackId, offer_id: OfferId },

    #[error("Insufficient funds for user {user_id}: required {required}, available {available}")]
    InsufficientFunds {
        user_id: UserId,
        required: i64,
        available: i64,
    },

    #[error("Invalid transition for {entity}: cannot apply '{event}' in state '{from}'")]
    InvalidTransition {
        entity: EntityRef,
        from: String,
        event: String,
    },

    #[error("User {reviewer_id} already reviewed tack {tack_id}")]
    DuplicateReview { tack_id: TackId, reviewer_id: UserId },

    #[error("Concurrent modification of {entity}")]
    Conflict { entity: EntityRef },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketplaceError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: EntityRef) -> Self {
        Self::NotFound { entity }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Stable error code surfaced to callers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::NotVisible { .. } => "not_visible",
            Self::DuplicateOffer { .. } => "duplicate_offer",
            Self::CounterOfferNotAllowed { .. } => "counter_offer_not_allowed",
            Self::SelfOfferNotAllowed { .. } => "self_offer_not_allowed",
            Self::CannotWithdrawAccepted { .. } => "cannot_withdraw_accepted",
            Self::AcceptanceRaceLost { .. } => "acceptance_race_lost",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::DuplicateReview { .. } => "duplicate_review",
            Self::Conflict { .. } => "conflict",
            Self::Database(_) => "database_error",
            Self::Scheduler(_) => "scheduler_error",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Business-rule violations are rejected with no state or balance change
    pub fn is_business_rule_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateOffer { .. }
                | Self::CounterOfferNotAllowed { .. }
                | Self::SelfOfferNotAllowed { .. }
                | Self::CannotWithdrawAccepted { .. }
                | Self::AcceptanceRaceLost { .. }
                | Self::InsufficientFunds { .. }
                | Self::InvalidTransition { .. }
                | Self::DuplicateReview { .. }
        )
    }

    /// Whether the caller may retry after re-fetching current state
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcceptanceRaceLost { .. } | Self::Conflict { .. } | Self::Database(_)
        )
    }
}

pub type MarketplaceResult<T> = Result<T, MarketplaceError>;
