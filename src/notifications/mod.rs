//! # Notification Fan-out
//!
//! Lifecycle events are delivered after the commit that caused them, to three kinds of topic:
//!
//! - `user_<id>`: a participant's personal feed
//! - `group_<id>`: the group a tack is posted in, while the tack is open for offers
//! - `tack_<id>_offer`: watchers of one tack's offer list
//!
//! Delivery is best-effort. The realtime [`Notifier`] and the optional [`PushNotifier`] are
//! ports so the transport can be swapped without touching the lifecycle code.

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

use crate::models::{GroupId, TackId, UserId};

mod fanout;
mod notifier;
mod templates;

pub use fanout::{
    tack_topics, DispatchReport, FanoutStats, Notification, NotificationFanout, NotificationPlan,
};
pub use notifier::{
    BroadcastNotifier, LoggingPushNotifier, Notifier, PublishedNotification, PushMessage,
    PushNotifier, RecordingNotifier,
};
pub use templates::{push_template, PushTemplate};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Delivery to {topic} timed out after {timeout_ms}ms")]
    Timeout { topic: String, timeout_ms: u64 },

    #[error("Notification channel closed")]
    ChannelClosed,
}

/// Delivery target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    User(UserId),
    Group(GroupId),
    TackOffers(TackId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user_{id}"),
            Self::Group(id) => write!(f, "group_{id}"),
            Self::TackOffers(id) => write!(f, "tack_{id}_offer"),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
