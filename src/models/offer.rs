//! # Offer Model
//!
//! A runner's bid on a tack. A `None` price means the runner accepts the listed tack price;
//! a concrete price makes the offer a counter-offer.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{OfferId, TackId, UserId};
use crate::state_machine::states::OfferStatus;

/// Whether the runner accepted the listed price or proposed another one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferType {
    Offer,
    CounterOffer,
}

impl OfferType {
    pub fn for_price(price: Option<i64>) -> Self {
        if price.is_some() {
            Self::CounterOffer
        } else {
            Self::Offer
        }
    }
}

impl fmt::Display for OfferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::CounterOffer => write!(f, "counter_offer"),
        }
    }
}

impl std::str::FromStr for OfferType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(Self::Offer),
            "counter_offer" => Ok(Self::CounterOffer),
            _ => Err(format!("Invalid offer type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub tack_id: TackId,
    pub runner_id: UserId,
    pub price: Option<i64>,
    pub offer_type: OfferType,
    pub status: OfferStatus,
    pub lifetime_seconds: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Offer {
    pub fn new(
        tack_id: TackId,
        runner_id: UserId,
        price: Option<i64>,
        lifetime_seconds: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OfferId::new(),
            tack_id,
            runner_id,
            price,
            offer_type: OfferType::for_price(price),
            status: OfferStatus::Created,
            lifetime_seconds,
            is_active: true,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Still competing for the tack
    pub fn is_open(&self) -> bool {
        self.is_active && self.status.is_open()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + ChronoDuration::seconds(self.lifetime_seconds)
    }

    /// Open but past its lifetime
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.expires_at() <= now
    }

    /// The price the tack settles at if this offer wins
    pub fn effective_price(&self, listed_price: i64) -> i64 {
        self.price.unwrap_or(listed_price)
    }
}

/// Number of offers still competing on a tack
pub fn open_offer_count<'a>(offers: impl IntoIterator<Item = &'a Offer>) -> usize {
    offers.into_iter().filter(|offer| offer.is_open()).count()
}
