//! Push notification copy for user-targeted lifecycle events.

use crate::models::Tack;
use crate::state_machine::actions::{
    OFFER_ACCEPTED, OFFER_CREATED, OFFER_DELETED, OFFER_EXPIRED, REVIEW_CREATED, TACK_CANCELED,
    TACK_EXPIRING, TACK_FINISHED, TACK_IN_PROGRESS, TACK_WAITING_REVIEW,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTemplate {
    pub title: String,
    pub body: String,
}

/// Title and body for `event` about `tack`, or `None` if the event is realtime-only
pub fn push_template(event: &str, tack: &Tack) -> Option<PushTemplate> {
    let title = &tack.title;
    let (heading, body) = match event {
        OFFER_CREATED => ("New offer", format!("Someone wants to do \"{title}\"")),
        OFFER_ACCEPTED => ("Offer accepted", format!("You got the tack \"{title}\"")),
        OFFER_EXPIRED => ("Offer expired", format!("Your offer on \"{title}\" expired")),
        OFFER_DELETED => (
            "Offer closed",
            format!("Your offer on \"{title}\" is no longer open"),
        ),
        TACK_IN_PROGRESS => ("Tack started", format!("\"{title}\" is in progress")),
        TACK_WAITING_REVIEW => (
            "Tack completed",
            format!("\"{title}\" is done and waiting for your review"),
        ),
        TACK_FINISHED => ("Tack finished", format!("\"{title}\" was confirmed")),
        TACK_CANCELED => ("Tack canceled", format!("\"{title}\" was canceled")),
        TACK_EXPIRING => (
            "Running out of time",
            format!("\"{title}\" is close to its estimated time"),
        ),
        REVIEW_CREATED => ("New review", format!("You were reviewed for \"{title}\"")),
        _ => return None,
    };
    Some(PushTemplate {
        title: heading.to_string(),
        body,
    })
}
