use serde::{Deserialize, Serialize};

use crate::models::{OfferId, UserId};

/// Why a tack was soft-deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    /// The tacker removed it
    Tacker,
    /// The inactivity sweep removed it
    Inactivity,
}

/// Events that can trigger tack state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TackEvent {
    /// The first open offer arrived
    OfferOpened,
    /// The last open offer went away
    OffersDrained,
    /// The tacker accepted an offer
    Accept {
        offer_id: OfferId,
        runner_id: UserId,
        price: i64,
    },
    /// The runner started working
    Start,
    /// The runner reported completion
    Complete { message: Option<String> },
    /// The tacker confirmed completion
    Confirm,
    /// The tacker's review closed the tack
    ReviewFinish,
    /// Cancel the tack
    Cancel,
    /// Soft-delete an open tack
    Delete(DeleteReason),
}

impl TackEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OfferOpened => "offer_opened",
            Self::OffersDrained => "offers_drained",
            Self::Accept { .. } => "accept",
            Self::Start => "start",
            Self::Complete { .. } => "complete",
            Self::Confirm => "confirm",
            Self::ReviewFinish => "review_finish",
            Self::Cancel => "cancel",
            Self::Delete(DeleteReason::Tacker) => "delete",
            Self::Delete(DeleteReason::Inactivity) => "inactivity_delete",
        }
    }

    /// Events driven by the offer engine rather than a person
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::OfferOpened | Self::OffersDrained)
    }

    /// Check if this event leaves the tack in a terminal condition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirm | Self::ReviewFinish | Self::Cancel | Self::Delete(_)
        )
    }
}

/// Events that can trigger offer state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferEvent {
    /// Chosen by the tacker
    Accept,
    /// Lifetime elapsed
    Expire,
    /// Runner removed the offer
    Withdraw,
    /// A sibling offer was accepted
    Supersede,
    /// The tack was canceled
    CancelWithTack,
    /// The tack was soft-deleted
    DeleteWithTack,
    /// The runner completed the tack
    Finish,
}

impl OfferEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Expire => "expire",
            Self::Withdraw => "withdraw",
            Self::Supersede => "supersede",
            Self::CancelWithTack => "cancel_with_tack",
            Self::DeleteWithTack => "delete_with_tack",
            Self::Finish => "finish",
        }
    }
}
