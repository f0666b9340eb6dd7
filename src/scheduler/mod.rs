//! # Scheduler
//!
//! Delayed, cancellable, at-least-once background jobs: offer expiry, tack expiry warnings and
//! the periodic inactivity sweep.
//!
//! Jobs carry only identifiers. Handlers reload the entity and re-check its state, so a job
//! that fires late, twice, or after the entity moved on is a harmless no-op. Cancelling a timer
//! is an optimization; correctness never depends on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{MarketplaceError, MarketplaceResult};
use crate::models::{OfferId, TackId};

mod manual;
mod sweep;
mod tokio_scheduler;
mod worker;

pub use manual::{ManualScheduler, RecordedJob};
pub use sweep::InactivitySweeper;
pub use tokio_scheduler::{JobQueue, QueuedJob, TokioScheduler};
pub use worker::{JobWorker, WorkerStats};

/// Work the scheduler can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "handler", content = "payload", rename_all = "snake_case")]
pub enum ScheduledJob {
    /// Expire the offer if it is still CREATED
    ExpireOffer { offer_id: OfferId },
    /// Warn the runner that the estimate is nearly used up
    WarnTackExpiring { tack_id: TackId },
    /// Soft-delete CREATED tacks with no recent offer activity
    SweepInactiveTacks,
    /// Expire open offers whose timer was lost
    SweepOverdueOffers,
}

impl ScheduledJob {
    /// Handler identifier, used in logs and the serialized form
    pub fn handler_id(&self) -> &'static str {
        match self {
            Self::ExpireOffer { .. } => "expire_offer",
            Self::WarnTackExpiring { .. } => "warn_tack_expiring",
            Self::SweepInactiveTacks => "sweep_inactive_tacks",
            Self::SweepOverdueOffers => "sweep_overdue_offers",
        }
    }
}

impl fmt::Display for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpireOffer { offer_id } => write!(f, "expire_offer({offer_id})"),
            Self::WarnTackExpiring { tack_id } => write!(f, "warn_tack_expiring({tack_id})"),
            other => write!(f, "{}", other.handler_id()),
        }
    }
}

/// Handle to a scheduled job, usable for cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub Uuid);

impl JobHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("No async runtime available to run timers")]
    NoRuntime,
}

impl From<SchedulerError> for MarketplaceError {
    fn from(err: SchedulerError) -> Self {
        MarketplaceError::Scheduler(err.to_string())
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler transport
pub trait Scheduler: Send + Sync {
    /// Run `job` once `delay` has elapsed
    fn schedule(&self, delay: Duration, job: ScheduledJob) -> SchedulerResult<JobHandle>;

    /// Best-effort cancellation; returns whether a pending timer was removed
    fn cancel(&self, handle: JobHandle) -> bool;
}

/// Executes jobs delivered by a scheduler
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: ScheduledJob) -> MarketplaceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_serialization_names_handler() {
        let offer_id = OfferId::new();
        let job = ScheduledJob::ExpireOffer { offer_id };
        assert_eq!(job.handler_id(), "expire_offer");
        assert_eq!(
            serde_json::to_value(job).unwrap(),
            json!({"handler": "expire_offer", "payload": {"offer_id": offer_id}})
        );
        assert_eq!(
            ScheduledJob::SweepInactiveTacks.to_string(),
            "sweep_inactive_tacks"
        );
    }
}
