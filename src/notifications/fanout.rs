use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::notifier::{Notifier, PushMessage, PushNotifier};
use super::templates::push_template;
use super::{NotifyError, Topic};
use crate::models::{Offer, Tack, UserId};
use crate::state_machine::actions::{
    OFFER_ACCEPTED, OFFER_CREATED, OFFER_DELETED, OFFER_EXPIRED, TACK_CANCELED, TACK_EXPIRING,
    TACK_FINISHED, TACK_IN_PROGRESS, TACK_WAITING_REVIEW,
};
use crate::state_machine::TackStatus;

/// One realtime delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub topic: Topic,
    pub event: &'static str,
    pub payload: Value,
}

/// Deliveries collected while planning a command, dispatched after it commits
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPlan {
    notifications: Vec<Notification>,
    pushes: Vec<PushMessage>,
}

impl NotificationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, topic: Topic, event: &'static str, payload: Value) {
        self.notifications.push(Notification {
            topic,
            event,
            payload,
        });
    }

    /// Fan a tack event out to its audience
    ///
    /// The group hears about the tack while it is, or just stopped being, open for offers.
    pub fn tack_event(
        &mut self,
        tack: &Tack,
        previous_status: TackStatus,
        event: &'static str,
        payload: Value,
    ) {
        for topic in tack_topics(tack, previous_status) {
            self.add(topic, event, payload.clone());
        }
        if let Some(user_id) = tack_push_recipient(event, tack) {
            self.push(user_id, event, tack, payload);
        }
    }

    /// Fan an offer event out to the runner, the tacker and the tack's offer watchers
    pub fn offer_event(&mut self, offer: &Offer, tack: &Tack, event: &'static str, payload: Value) {
        for topic in [
            Topic::User(offer.runner_id),
            Topic::User(tack.tacker_id),
            Topic::TackOffers(tack.id),
        ] {
            self.add(topic, event, payload.clone());
        }
        if let Some(user_id) = offer_push_recipient(event, offer, tack) {
            self.push(user_id, event, tack, payload);
        }
    }

    /// Queue a push for `user_id` if the event has push copy
    pub fn push(&mut self, user_id: UserId, event: &'static str, tack: &Tack, data: Value) {
        if let Some(template) = push_template(event, tack) {
            self.pushes.push(PushMessage {
                user_id,
                event: event.to_string(),
                title: template.title,
                body: template.body,
                data,
            });
        }
    }

    pub fn extend(&mut self, other: NotificationPlan) {
        self.notifications.extend(other.notifications);
        self.pushes.extend(other.pushes);
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn pushes(&self) -> &[PushMessage] {
        &self.pushes
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.pushes.is_empty()
    }
}

/// Topics that hear about a tack event
pub fn tack_topics(tack: &Tack, previous_status: TackStatus) -> Vec<Topic> {
    let mut topics = vec![Topic::User(tack.tacker_id)];
    if let Some(runner_id) = tack.runner_id {
        topics.push(Topic::User(runner_id));
    }
    if let Some(group_id) = tack.group_id {
        if previous_status.is_open() || tack.status.is_open() {
            topics.push(Topic::Group(group_id));
        }
    }
    topics.push(Topic::TackOffers(tack.id));
    topics
}

fn tack_push_recipient(event: &str, tack: &Tack) -> Option<UserId> {
    match event {
        TACK_IN_PROGRESS | TACK_WAITING_REVIEW => Some(tack.tacker_id),
        TACK_FINISHED | TACK_CANCELED | TACK_EXPIRING => tack.runner_id,
        _ => None,
    }
}

fn offer_push_recipient(event: &str, offer: &Offer, tack: &Tack) -> Option<UserId> {
    match event {
        OFFER_CREATED => Some(tack.tacker_id),
        OFFER_ACCEPTED | OFFER_EXPIRED | OFFER_DELETED => Some(offer.runner_id),
        _ => None,
    }
}

/// Delivery counters since startup
#[derive(Debug, Default)]
pub struct FanoutStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl FanoutStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Best-effort delivery of a [`NotificationPlan`]
///
/// Runs after the commit. Each delivery is bounded by a timeout and failures are logged and
/// counted, never returned.
#[derive(Clone)]
pub struct NotificationFanout {
    notifier: Arc<dyn Notifier>,
    push: Option<Arc<dyn PushNotifier>>,
    timeout: Duration,
    stats: Arc<FanoutStats>,
}

impl NotificationFanout {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        push: Option<Arc<dyn PushNotifier>>,
        timeout: Duration,
    ) -> Self {
        Self {
            notifier,
            push,
            timeout,
            stats: Arc::new(FanoutStats::default()),
        }
    }

    pub fn stats(&self) -> &FanoutStats {
        &self.stats
    }

    pub async fn dispatch(&self, plan: NotificationPlan) -> DispatchReport {
        if plan.is_empty() {
            return DispatchReport::default();
        }

        let realtime = plan.notifications.iter().map(|notification| {
            let topic = notification.topic.to_string();
            async move {
                let outcome = tokio::time::timeout(
                    self.timeout,
                    self.notifier
                        .notify(&topic, notification.event, &notification.payload),
                )
                .await;
                self.record(outcome, &topic, notification.event)
            }
        });

        let push = self.push.as_ref();
        let pushes = plan.pushes.iter().filter_map(|message| {
            push.map(|push| async move {
                let outcome = tokio::time::timeout(self.timeout, push.push(message)).await;
                self.record(outcome, &format!("push:{}", message.user_id), &message.event)
            })
        });

        let (realtime, pushes) = futures::join!(join_all(realtime), join_all(pushes));
        let mut report = DispatchReport::default();
        for delivered in realtime.into_iter().chain(pushes) {
            if delivered {
                report.delivered += 1;
            } else {
                report.failed += 1;
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "Dispatched notifications"
        );
        report
    }

    /// Dispatch on a background task without waiting
    pub fn dispatch_detached(&self, plan: NotificationPlan) {
        let fanout = self.clone();
        tokio::spawn(async move {
            fanout.dispatch(plan).await;
        });
    }

    fn record(
        &self,
        outcome: Result<Result<(), NotifyError>, tokio::time::error::Elapsed>,
        target: &str,
        event: &str,
    ) -> bool {
        match outcome {
            Ok(Ok(())) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(Err(error)) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(target_topic = target, event = event, error = %error, "Notification delivery failed");
                false
            }
            Err(_) => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target_topic = target,
                    event = event,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Notification delivery timed out"
                );
                false
            }
        }
    }
}
