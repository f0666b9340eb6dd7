use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use super::NotifyError;
use crate::models::UserId;

/// Realtime transport: deliver `event` with `payload` to everyone listening on `topic`
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, topic: &str, event: &str, payload: &Value) -> Result<(), NotifyError>;
}

/// Mobile push transport
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn push(&self, message: &PushMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub user_id: UserId,
    pub event: String,
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Notification that has been published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedNotification {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

/// In-process realtime transport over a tokio broadcast channel
///
/// Websocket gateways subscribe and forward the topics their clients watch.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<PublishedNotification>,
}

impl BroadcastNotifier {
    /// Create a new notifier with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedNotification> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, topic: &str, event: &str, payload: &Value) -> Result<(), NotifyError> {
        let notification = PublishedNotification {
            topic: topic.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
            published_at: Utc::now(),
        };

        // send() only fails when nobody is subscribed, which is fine for best-effort delivery
        if self.sender.send(notification).is_err() {
            debug!(topic = topic, event = event, "No realtime subscribers");
        }
        Ok(())
    }
}

/// Push transport that only logs; used when no provider is wired in
#[derive(Debug, Clone, Default)]
pub struct LoggingPushNotifier;

#[async_trait]
impl PushNotifier for LoggingPushNotifier {
    async fn push(&self, message: &PushMessage) -> Result<(), NotifyError> {
        debug!(
            user_id = %message.user_id,
            event = %message.event,
            title = %message.title,
            "Push notification"
        );
        Ok(())
    }
}

/// Records everything it is asked to deliver
///
/// Topics can be marked as failing, and a delay can be injected, to exercise the fan-out's
/// failure handling.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<PublishedNotification>>,
    pushes: Mutex<Vec<PushMessage>>,
    failing_topics: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.failing_topics.lock().insert(topic.into());
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn published(&self) -> Vec<PublishedNotification> {
        self.published.lock().clone()
    }

    pub fn pushes(&self) -> Vec<PushMessage> {
        self.pushes.lock().clone()
    }

    /// Events delivered to `topic`, in order
    pub fn events_for(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|n| n.topic == topic)
            .map(|n| n.event.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
        self.pushes.lock().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, topic: &str, event: &str, payload: &Value) -> Result<(), NotifyError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_topics.lock().contains(topic) {
            return Err(NotifyError::Transport(format!("topic {topic} unavailable")));
        }
        self.published.lock().push(PublishedNotification {
            topic: topic.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
            published_at: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl PushNotifier for RecordingNotifier {
    async fn push(&self, message: &PushMessage) -> Result<(), NotifyError> {
        self.pushes.lock().push(message.clone());
        Ok(())
    }
}
