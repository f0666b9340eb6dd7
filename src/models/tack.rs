//! # Tack Model
//!
//! A tack is a task posting created by a tacker (the payer) and fulfilled by a runner.
//!
//! ## Lifecycle Fields
//!
//! - `status`: position along the lifecycle graph, see [`TackStatus`]
//! - `is_canceled` / `is_active`: the cancel and soft-delete side channel
//! - `runner_id` / `accepted_offer_id`: fixed together at acceptance
//! - `is_paid`: flips to true exactly once, when the payout commits
//! - `version`: optimistic concurrency token bumped by every committed write
//!
//! Writes never happen through field assignment by callers; the state machine in
//! [`crate::state_machine::tack_state_machine`] is the only mutator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::ids::{GroupId, OfferId, TackId, UserId};
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::state_machine::states::TackStatus;

/// Visibility scope of a tack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TackType {
    /// Visible to members of the owning group
    #[default]
    Group,
    /// Visible to the tacker's friends group
    Friends,
    /// Visible to everyone
    Public,
}

impl TackType {
    /// Whether acting on the tack requires membership in its group
    pub fn requires_membership(&self) -> bool {
        matches!(self, Self::Group | Self::Friends)
    }
}

impl fmt::Display for TackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => write!(f, "group"),
            Self::Friends => write!(f, "friends"),
            Self::Public => write!(f, "public"),
        }
    }
}

impl std::str::FromStr for TackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(Self::Group),
            "friends" => Ok(Self::Friends),
            "public" => Ok(Self::Public),
            _ => Err(format!("Invalid tack type: {s}")),
        }
    }
}

/// A task posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tack {
    pub id: TackId,
    pub title: String,
    pub description: String,
    /// Price in minor currency units
    pub price: i64,
    pub status: TackStatus,
    pub tack_type: TackType,
    pub allow_counter_offer: bool,
    pub auto_accept: bool,
    pub estimation_time_seconds: Option<i64>,
    pub group_id: Option<GroupId>,
    pub tacker_id: UserId,
    pub runner_id: Option<UserId>,
    pub accepted_offer_id: Option<OfferId>,
    pub created_at: DateTime<Utc>,
    pub accepted_time: Option<DateTime<Utc>>,
    pub start_completion_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub completion_message: Option<String>,
    pub is_paid: bool,
    pub is_canceled: bool,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Tack {
    /// Neither canceled nor soft-deleted
    pub fn is_live(&self) -> bool {
        self.is_active && !self.is_canceled
    }

    /// Still accepting offers
    pub fn is_open_for_offers(&self) -> bool {
        self.is_live() && self.status.is_open()
    }

    pub fn is_tacker(&self, user_id: UserId) -> bool {
        self.tacker_id == user_id
    }

    pub fn is_runner(&self, user_id: UserId) -> bool {
        self.runner_id == Some(user_id)
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.is_tacker(user_id) || self.is_runner(user_id)
    }

    /// The other participant relative to `user_id`
    pub fn counterpart(&self, user_id: UserId) -> Option<UserId> {
        if self.is_tacker(user_id) {
            self.runner_id
        } else if self.is_runner(user_id) {
            Some(self.tacker_id)
        } else {
            None
        }
    }

    /// `runner_id` and `accepted_offer_id` are either both set or both empty
    pub fn assignment_is_consistent(&self) -> bool {
        self.runner_id.is_some() == self.accepted_offer_id.is_some()
    }

    /// Whether acceptance holds the price in escrow
    pub fn holds_escrow(&self) -> bool {
        !self.auto_accept
    }

    /// Delay after start at which the runner is warned the estimate is running out
    pub fn expiry_warning_delay(&self, ratio: f64) -> Option<Duration> {
        let estimate = self.estimation_time_seconds.filter(|s| *s > 0)?;
        let millis = (estimate as f64 * 1000.0 * ratio).round();
        if millis.is_finite() && millis >= 0.0 {
            Some(Duration::from_millis(millis as u64))
        } else {
            None
        }
    }
}

/// Input for posting a tack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTack {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: i64,
    #[serde(default)]
    pub tack_type: TackType,
    #[serde(default)]
    pub allow_counter_offer: bool,
    #[serde(default)]
    pub auto_accept: bool,
    #[serde(default)]
    pub estimation_time_seconds: Option<i64>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

impl NewTack {
    pub fn new(title: impl Into<String>, price: i64, tack_type: TackType) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            price,
            tack_type,
            allow_counter_offer: false,
            auto_accept: false,
            estimation_time_seconds: None,
            group_id: None,
        }
    }

    pub fn in_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_counter_offers(mut self) -> Self {
        self.allow_counter_offer = true;
        self
    }

    pub fn with_auto_accept(mut self) -> Self {
        self.auto_accept = true;
        self
    }

    pub fn with_estimate(mut self, seconds: i64) -> Self {
        self.estimation_time_seconds = Some(seconds);
        self
    }

    /// Reject malformed input before any state is touched
    pub fn validate(&self, max_price: i64) -> MarketplaceResult<()> {
        if self.title.trim().is_empty() {
            return Err(MarketplaceError::validation("title", "must not be blank"));
        }
        validate_price("price", self.price, max_price)?;
        if let Some(estimate) = self.estimation_time_seconds {
            if estimate <= 0 {
                return Err(MarketplaceError::validation(
                    "estimation_time_seconds",
                    "must be positive",
                ));
            }
        }
        if self.tack_type.requires_membership() && self.group_id.is_none() {
            return Err(MarketplaceError::validation(
                "group_id",
                format!("required for {} tacks", self.tack_type),
            ));
        }
        Ok(())
    }

    /// Materialize the tack in its initial state
    pub fn into_tack(self, tacker_id: UserId, now: DateTime<Utc>) -> Tack {
        Tack {
            id: TackId::new(),
            title: self.title.trim().to_string(),
            description: self.description,
            price: self.price,
            status: TackStatus::Created,
            tack_type: self.tack_type,
            allow_counter_offer: self.allow_counter_offer,
            auto_accept: self.auto_accept,
            estimation_time_seconds: self.estimation_time_seconds,
            group_id: self.group_id,
            tacker_id,
            runner_id: None,
            accepted_offer_id: None,
            created_at: now,
            accepted_time: None,
            start_completion_time: None,
            completion_time: None,
            completion_message: None,
            is_paid: false,
            is_canceled: false,
            is_active: true,
            updated_at: now,
            version: 0,
        }
    }
}

/// Prices are non-negative minor units bounded by the configured maximum
pub fn validate_price(field: &'static str, price: i64, max_price: i64) -> MarketplaceResult<()> {
    if price < 0 {
        return Err(MarketplaceError::validation(field, "must not be negative"));
    }
    if price > max_price {
        return Err(MarketplaceError::validation(
            field,
            format!("must not exceed {max_price}"),
        ));
    }
    Ok(())
}
