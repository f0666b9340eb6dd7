use serde::{Deserialize, Serialize};
use std::fmt;

/// Tack status definitions
///
/// Cancellation and soft deletion are not statuses: they are carried by the `is_canceled` and
/// `is_active` flags so the status column stays monotonic along the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TackStatus {
    /// Posted, no open offers
    #[default]
    Created,
    /// At least one open offer exists
    Active,
    /// An offer was accepted and the runner assigned
    Accepted,
    /// Runner has started working
    InProgress,
    /// Runner reported completion, waiting for the tacker
    WaitingReview,
    /// Confirmed and paid out
    Finished,
}

impl TackStatus {
    /// Statuses in which the tack is still open for offers
    pub const OPEN: [TackStatus; 2] = [TackStatus::Created, TackStatus::Active];

    /// Check if this is a terminal status (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Check if the tack still accepts offers
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Created | Self::Active)
    }

    /// Check if a runner is assigned in this status
    pub fn has_runner(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::InProgress | Self::WaitingReview | Self::Finished
        )
    }

    /// Position along the lifecycle graph, used to assert monotonic progress
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created | Self::Active => 0,
            Self::Accepted => 1,
            Self::InProgress => 2,
            Self::WaitingReview => 3,
            Self::Finished => 4,
        }
    }
}

impl fmt::Display for TackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Accepted => write!(f, "accepted"),
            Self::InProgress => write!(f, "in_progress"),
            Self::WaitingReview => write!(f, "waiting_review"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

impl std::str::FromStr for TackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "accepted" => Ok(Self::Accepted),
            "in_progress" => Ok(Self::InProgress),
            "waiting_review" => Ok(Self::WaitingReview),
            "finished" => Ok(Self::Finished),
            _ => Err(format!("Invalid tack status: {s}")),
        }
    }
}

/// Offer status definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    /// Open bid waiting for the tacker
    #[default]
    Created,
    /// Chosen by the tacker
    Accepted,
    /// Lifetime elapsed before acceptance
    Expired,
    /// Withdrawn by the runner, superseded by a sibling, or removed with its tack
    Deleted,
    /// Cascaded from tack cancellation
    Cancelled,
    /// The accepted offer after the runner completed the tack
    Finished,
}

impl OfferStatus {
    /// Check if this is a terminal status (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::Deleted | Self::Cancelled | Self::Finished
        )
    }

    /// Check if the offer is still competing for the tack
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Created)
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Accepted => write!(f, "accepted"),
            Self::Expired => write!(f, "expired"),
            Self::Deleted => write!(f, "deleted"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

impl std::str::FromStr for OfferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "accepted" => Ok(Self::Accepted),
            "expired" => Ok(Self::Expired),
            "deleted" => Ok(Self::Deleted),
            "cancelled" => Ok(Self::Cancelled),
            "finished" => Ok(Self::Finished),
            _ => Err(format!("Invalid offer status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tack_status_terminal_check() {
        assert!(TackStatus::Finished.is_terminal());
        assert!(!TackStatus::Created.is_terminal());
        assert!(!TackStatus::WaitingReview.is_terminal());
    }

    #[test]
    fn test_tack_status_open_and_rank() {
        assert!(TackStatus::Created.is_open());
        assert!(TackStatus::Active.is_open());
        assert!(!TackStatus::Accepted.is_open());
        assert_eq!(TackStatus::Created.rank(), TackStatus::Active.rank());
        assert!(TackStatus::InProgress.rank() < TackStatus::WaitingReview.rank());
    }

    #[test]
    fn test_offer_status_terminal_check() {
        assert!(OfferStatus::Expired.is_terminal());
        assert!(OfferStatus::Deleted.is_terminal());
        assert!(OfferStatus::Cancelled.is_terminal());
        assert!(!OfferStatus::Created.is_terminal());
        assert!(!OfferStatus::Accepted.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(TackStatus::WaitingReview.to_string(), "waiting_review");
        assert_eq!(
            "in_progress".parse::<TackStatus>().unwrap(),
            TackStatus::InProgress
        );
        assert_eq!(OfferStatus::Cancelled.to_string(), "cancelled");
        assert_eq!("expired".parse::<OfferStatus>().unwrap(), OfferStatus::Expired);
        assert!("bogus".parse::<OfferStatus>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&TackStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: TackStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TackStatus::InProgress);
    }
}
