//! Mapping from committed transitions to the lifecycle events published on the fan-out.

use serde_json::{json, Value};

use super::events::{DeleteReason, OfferEvent, TackEvent};
use super::offer_state_machine::OfferChange;
use super::states::OfferStatus;
use crate::models::{Offer, Tack, TackTransition};

pub const TACK_CREATED: &str = "tack_created";
pub const TACK_ACTIVE: &str = "tack_active";
pub const TACK_REOPENED: &str = "tack_reopened";
pub const TACK_ACCEPTED: &str = "tack_accepted";
pub const TACK_IN_PROGRESS: &str = "tack_in_progress";
pub const TACK_WAITING_REVIEW: &str = "tack_waiting_review";
pub const TACK_FINISHED: &str = "tack_finished";
pub const TACK_CANCELED: &str = "tack_canceled";
pub const TACK_DELETED: &str = "tack_deleted";
pub const TACK_INACTIVE: &str = "tack_inactive";
pub const TACK_EXPIRING: &str = "tack_expiring";

pub const OFFER_CREATED: &str = "offer_created";
pub const OFFER_ACCEPTED: &str = "offer_accepted";
pub const OFFER_EXPIRED: &str = "offer_expired";
pub const OFFER_DELETED: &str = "offer_deleted";
pub const OFFER_CANCELLED: &str = "offer_cancelled";
pub const OFFER_FINISHED: &str = "offer_finished";

pub const REVIEW_CREATED: &str = "review_created";

/// Lifecycle event name published for a tack event
pub fn determine_tack_event_name(event: &TackEvent) -> &'static str {
    match event {
        TackEvent::OfferOpened => TACK_ACTIVE,
        TackEvent::OffersDrained => TACK_REOPENED,
        TackEvent::Accept { .. } => TACK_ACCEPTED,
        TackEvent::Start => TACK_IN_PROGRESS,
        TackEvent::Complete { .. } => TACK_WAITING_REVIEW,
        TackEvent::Confirm | TackEvent::ReviewFinish => TACK_FINISHED,
        TackEvent::Cancel => TACK_CANCELED,
        TackEvent::Delete(DeleteReason::Tacker) => TACK_DELETED,
        TackEvent::Delete(DeleteReason::Inactivity) => TACK_INACTIVE,
    }
}

/// Lifecycle event name published for an offer change
pub fn determine_offer_event_name(change: &OfferChange) -> &'static str {
    match (change.event, change.to) {
        (_, OfferStatus::Accepted) => OFFER_ACCEPTED,
        (_, OfferStatus::Expired) => OFFER_EXPIRED,
        (_, OfferStatus::Cancelled) => OFFER_CANCELLED,
        (_, OfferStatus::Finished) => OFFER_FINISHED,
        (OfferEvent::Withdraw | OfferEvent::Supersede | OfferEvent::DeleteWithTack, _)
        | (_, OfferStatus::Deleted) => OFFER_DELETED,
        (_, OfferStatus::Created) => OFFER_CREATED,
    }
}

/// Build the payload for a tack lifecycle event
pub fn build_tack_event_context(tack: &Tack, transition: Option<&TackTransition>) -> Value {
    let mut context = json!({
        "tack_id": tack.id,
        "status": tack.status,
        "tack": tack,
    });
    if let Some(transition) = transition {
        context["from_state"] = json!(transition.from_state);
        context["to_state"] = json!(transition.to_state);
        context["event"] = json!(transition.event);
    }
    context
}

/// Build the payload for an offer lifecycle event
pub fn build_offer_event_context(offer: &Offer, change: Option<&OfferChange>) -> Value {
    let mut context = json!({
        "tack_id": offer.tack_id,
        "offer_id": offer.id,
        "status": offer.status,
        "offer": offer,
    });
    if let Some(change) = change {
        context["from_state"] = json!(change.from);
        context["event"] = json!(change.event.event_type());
    }
    context
}
