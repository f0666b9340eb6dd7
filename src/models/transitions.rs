//! # Tack Transition Model
//!
//! Audit trail of tack lifecycle changes.
//!
//! Every committed status change, cancellation or soft deletion appends one row. The store
//! assigns `sort_key` sequentially per tack and keeps `most_recent = true` on the newest row
//! only, so the current lifecycle position is an O(1) lookup and the history is ordered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ids::{TackId, UserId};

/// Pseudo-state recorded when a tack is canceled
pub const CANCELED_STATE: &str = "canceled";
/// Pseudo-state recorded when a tack is soft-deleted
pub const DELETED_STATE: &str = "deleted";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TackTransition {
    pub id: Uuid,
    pub tack_id: TackId,
    pub from_state: Option<String>,
    pub to_state: String,
    pub event: String,
    pub actor_id: Option<UserId>,
    pub metadata: Value,
    /// Assigned by the store at commit
    pub sort_key: i32,
    /// Maintained by the store at commit
    pub most_recent: bool,
    pub created_at: DateTime<Utc>,
}

impl TackTransition {
    pub fn new(
        tack_id: TackId,
        from_state: Option<String>,
        to_state: impl Into<String>,
        event: impl Into<String>,
        actor_id: Option<UserId>,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tack_id,
            from_state,
            to_state: to_state.into(),
            event: event.into(),
            actor_id,
            metadata,
            sort_key: 0,
            most_recent: true,
            created_at: now,
        }
    }
}

/// Assign sort keys and most-recent flags to `pending` given the already persisted history
pub fn sequence_transitions(existing: &mut [TackTransition], pending: &mut [TackTransition]) {
    if pending.is_empty() {
        return;
    }
    let mut next_key = existing.iter().map(|t| t.sort_key).max().unwrap_or(0) + 1;
    for transition in existing.iter_mut() {
        transition.most_recent = false;
    }
    let last = pending.len() - 1;
    for (index, transition) in pending.iter_mut().enumerate() {
        transition.sort_key = next_key;
        transition.most_recent = index == last;
        next_key += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(tack_id: TackId, to: &str) -> TackTransition {
        TackTransition::new(
            tack_id,
            None,
            to,
            "test",
            None,
            serde_json::json!({}),
            Utc::now(),
        )
    }

    #[test]
    fn test_sequence_transitions_appends_after_history() {
        let tack_id = TackId::new();
        let mut existing = vec![transition(tack_id, "created")];
        sequence_transitions(&mut [], &mut existing);
        assert_eq!(existing[0].sort_key, 1);
        assert!(existing[0].most_recent);

        let mut pending = vec![transition(tack_id, "active"), transition(tack_id, "accepted")];
        sequence_transitions(&mut existing, &mut pending);

        assert!(!existing[0].most_recent);
        assert_eq!(pending[0].sort_key, 2);
        assert!(!pending[0].most_recent);
        assert_eq!(pending[1].sort_key, 3);
        assert!(pending[1].most_recent);
    }
}
