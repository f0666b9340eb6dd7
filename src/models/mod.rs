//! Marketplace data model: tacks, offers, reviews, user statistics and the transition audit
//! trail.

pub mod ids;
pub mod offer;
pub mod review;
pub mod tack;
pub mod transitions;
pub mod user;

pub use ids::{EntityRef, GroupId, OfferId, ReviewId, TackId, UserId};
pub use offer::{open_offer_count, Offer, OfferType};
pub use review::{NewReview, Review};
pub use tack::{NewTack, Tack, TackType};
pub use transitions::TackTransition;
pub use user::{StatsUpdate, UserStats};

pub use crate::state_machine::states::{OfferStatus, TackStatus};
