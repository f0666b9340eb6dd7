//! # Marketplace Store
//!
//! Persistence port for tacks, offers, reviews, balances and the audit trail.
//!
//! All mutations go through [`MarketplaceStore::commit`], which applies a [`ChangeSet`]
//! atomically. Tack and offer updates carry the version the caller read; the commit fails with
//! [`StoreError::Conflict`] if any of them moved in the meantime, so two writers racing on the
//! same tack can never both win. Ledger entries in the same change set are applied under the
//! non-negative balance rule and roll the whole commit back when violated.
//!
//! Offer submissions do not rewrite the tack, so runners bidding on the same tack never
//! conflict with each other. They carry an [`OfferSetGuard`] instead: the store checks the
//! tack's status and open offers inside the commit. Commands that close a tack's offer list
//! (acceptance, cancellation, deletion) add an [`OfferSweep`] so an offer that landed after
//! they planned is closed in the same commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::MarketplaceError;
use crate::ledger::{LedgerEntry, LedgerError};
use crate::models::{
    EntityRef, GroupId, Offer, OfferId, Review, StatsUpdate, Tack, TackId, TackTransition, UserId,
    UserStats,
};
use crate::state_machine::{OfferChange, OfferEvent, OfferStateMachine, TackStatus};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Version conflict on {entity}")]
    Conflict { entity: EntityRef },

    #[error("Runner {runner_id} already has an active offer on tack {tack_id}")]
    DuplicateActiveOffer { tack_id: TackId, runner_id: UserId },

    #[error("User {reviewer_id} already reviewed tack {tack_id}")]
    DuplicateReview { tack_id: TackId, reviewer_id: UserId },

    #[error("Insufficient funds for user {user_id}: required {required}, available {available}")]
    InsufficientFunds {
        user_id: UserId,
        required: i64,
        available: i64,
    },

    #[error("{entity} not found")]
    NotFound { entity: EntityRef },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt row: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<LedgerError> for StoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                user_id,
                required,
                available,
            } => StoreError::InsufficientFunds {
                user_id,
                required,
                available,
            },
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<StoreError> for MarketplaceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { entity } => MarketplaceError::Conflict { entity },
            StoreError::DuplicateActiveOffer { tack_id, runner_id } => {
                MarketplaceError::DuplicateOffer { tack_id, runner_id }
            }
            StoreError::DuplicateReview {
                tack_id,
                reviewer_id,
            } => MarketplaceError::DuplicateReview {
                tack_id,
                reviewer_id,
            },
            StoreError::InsufficientFunds {
                user_id,
                required,
                available,
            } => MarketplaceError::InsufficientFunds {
                user_id,
                required,
                available,
            },
            StoreError::NotFound { entity } => MarketplaceError::NotFound { entity },
            StoreError::Database(msg) | StoreError::Decode(msg) => MarketplaceError::Database(msg),
        }
    }
}

/// Insert or versioned update of a tack
#[derive(Debug, Clone, PartialEq)]
pub struct TackWrite {
    pub tack: Tack,
    /// `None` inserts; `Some(v)` updates only if the stored version is still `v`
    pub expected_version: Option<i64>,
}

/// Insert or versioned update of an offer
#[derive(Debug, Clone, PartialEq)]
pub struct OfferWrite {
    pub offer: Offer,
    pub expected_version: Option<i64>,
}

/// Which open offers a tack must still have when the commit applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOffers {
    Any,
    /// Some open offer other than this one
    OthersBesides(OfferId),
    /// No open offer other than this one
    NoneBesides(OfferId),
}

/// Condition on a tack's offer list, checked in the commit without bumping the tack version
#[derive(Debug, Clone, PartialEq)]
pub struct OfferSetGuard {
    pub tack_id: TackId,
    /// The tack must be live, unassigned and still in this status
    pub status: TackStatus,
    pub open_offers: OpenOffers,
}

impl OfferSetGuard {
    /// Check against the stored tack and the ids of its currently open offers
    pub(crate) fn check(&self, tack: Option<&Tack>, open: &[OfferId]) -> StoreResult<()> {
        let entity = EntityRef::Tack(self.tack_id);
        let tack = tack.ok_or(StoreError::NotFound { entity })?;
        let tack_holds = tack.is_live() && tack.accepted_offer_id.is_none();
        let offers_hold = match self.open_offers {
            OpenOffers::Any => true,
            OpenOffers::OthersBesides(id) => open.iter().any(|open_id| *open_id != id),
            OpenOffers::NoneBesides(id) => open.iter().all(|open_id| *open_id == id),
        };
        if tack_holds && tack.status == self.status && offers_hold {
            Ok(())
        } else {
            Err(StoreError::Conflict { entity })
        }
    }
}

/// Close every open offer of `tack` that the change set does not already write
#[derive(Debug, Clone, PartialEq)]
pub struct OfferSweep {
    /// The tack as this commit leaves it, used to address notifications
    pub tack: Tack,
    pub event: OfferEvent,
    pub now: DateTime<Utc>,
}

impl OfferSweep {
    /// Stage versioned writes closing `open`, skipping offers `changes` already writes
    pub(crate) fn stage(
        &self,
        changes: &mut ChangeSet,
        open: Vec<Offer>,
    ) -> StoreResult<Vec<OfferChange>> {
        let mut swept = Vec::new();
        for offer in open {
            if !offer.status.is_open() || changes.writes_offer(offer.id) {
                continue;
            }
            let mut machine = OfferStateMachine::new(offer);
            let change = machine
                .transition(self.event, None, self.now)
                .map_err(|e| StoreError::Database(format!("offer sweep failed: {e}")))?;
            if let Some(change) = change {
                changes.update_offer(machine.into_offer());
                swept.push(change);
            }
        }
        Ok(swept)
    }
}

/// Everything one command writes, committed as a single atomic unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub tacks: Vec<TackWrite>,
    pub offers: Vec<OfferWrite>,
    pub ledger: Vec<LedgerEntry>,
    pub reviews: Vec<Review>,
    pub transitions: Vec<TackTransition>,
    pub stats: Vec<StatsUpdate>,
    pub guards: Vec<OfferSetGuard>,
    pub sweeps: Vec<OfferSweep>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tack(&mut self, tack: Tack) -> &mut Self {
        self.tacks.push(TackWrite {
            tack,
            expected_version: None,
        });
        self
    }

    /// Update a tack read at `tack.version`
    pub fn update_tack(&mut self, tack: Tack) -> &mut Self {
        let expected_version = Some(tack.version);
        self.tacks.push(TackWrite {
            tack,
            expected_version,
        });
        self
    }

    pub fn insert_offer(&mut self, offer: Offer) -> &mut Self {
        self.offers.push(OfferWrite {
            offer,
            expected_version: None,
        });
        self
    }

    /// Update an offer read at `offer.version`
    pub fn update_offer(&mut self, offer: Offer) -> &mut Self {
        let expected_version = Some(offer.version);
        self.offers.push(OfferWrite {
            offer,
            expected_version,
        });
        self
    }

    pub fn ledger_entry(&mut self, entry: LedgerEntry) -> &mut Self {
        self.ledger.push(entry);
        self
    }

    pub fn review(&mut self, review: Review) -> &mut Self {
        self.reviews.push(review);
        self
    }

    pub fn transition(&mut self, transition: TackTransition) -> &mut Self {
        self.transitions.push(transition);
        self
    }

    pub fn stats(&mut self, update: StatsUpdate) -> &mut Self {
        self.stats.push(update);
        self
    }

    pub fn guard(&mut self, guard: OfferSetGuard) -> &mut Self {
        self.guards.push(guard);
        self
    }

    pub fn sweep(&mut self, sweep: OfferSweep) -> &mut Self {
        self.sweeps.push(sweep);
        self
    }

    pub fn writes_offer(&self, id: OfferId) -> bool {
        self.offers.iter().any(|write| write.offer.id == id)
    }

    /// Tacks whose row the commit must lock before reading their offers
    pub fn guarded_tacks(&self) -> Vec<TackId> {
        let mut ids: Vec<TackId> = self
            .guards
            .iter()
            .map(|guard| guard.tack_id)
            .chain(self.sweeps.iter().map(|sweep| sweep.tack.id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.tacks.is_empty()
            && self.offers.is_empty()
            && self.ledger.is_empty()
            && self.reviews.is_empty()
            && self.transitions.is_empty()
            && self.stats.is_empty()
            && self.sweeps.is_empty()
    }
}

/// Entities as persisted by a commit, with their new versions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    pub tacks: Vec<Tack>,
    pub offers: Vec<Offer>,
    /// Offers closed by the change set's sweeps; their new state is in `offers`
    pub swept: Vec<OfferChange>,
}

impl CommitReceipt {
    pub fn tack(&self, id: TackId) -> Option<&Tack> {
        self.tacks.iter().find(|tack| tack.id == id)
    }

    pub fn offer(&self, id: OfferId) -> Option<&Offer> {
        self.offers.iter().find(|offer| offer.id == id)
    }
}

/// Bump the version of every write; applied by stores to what they persist
pub(crate) fn next_versions(changes: &mut ChangeSet) {
    for write in &mut changes.tacks {
        write.tack.version = write.expected_version.map_or(1, |v| v + 1);
    }
    for write in &mut changes.offers {
        write.offer.version = write.expected_version.map_or(1, |v| v + 1);
    }
}

#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    async fn get_tack(&self, id: TackId) -> StoreResult<Option<Tack>>;

    async fn get_offer(&self, id: OfferId) -> StoreResult<Option<Offer>>;

    /// All offers on a tack, oldest first
    async fn list_offers_for_tack(&self, tack_id: TackId) -> StoreResult<Vec<Offer>>;

    /// Live tacks of a group still open for offers, newest first
    async fn list_group_tacks(&self, group_id: GroupId) -> StoreResult<Vec<Tack>>;

    /// Live CREATED tacks with neither tack nor offer activity since `cutoff`
    async fn list_stale_tacks(&self, cutoff: DateTime<Utc>, limit: usize)
        -> StoreResult<Vec<Tack>>;

    /// Open offers whose lifetime elapsed by `now`
    async fn list_overdue_offers(&self, now: DateTime<Utc>, limit: usize)
        -> StoreResult<Vec<Offer>>;

    async fn list_reviews_for_tack(&self, tack_id: TackId) -> StoreResult<Vec<Review>>;

    /// Audit trail ordered by sort key
    async fn list_transitions(&self, tack_id: TackId) -> StoreResult<Vec<TackTransition>>;

    async fn balance(&self, user_id: UserId) -> StoreResult<i64>;

    /// Journal of balance movements for a user, oldest first
    async fn ledger_entries(&self, user_id: UserId) -> StoreResult<Vec<LedgerEntry>>;

    async fn user_stats(&self, user_id: UserId) -> StoreResult<UserStats>;

    /// Apply every write in `changes` or none of them
    async fn commit(&self, changes: ChangeSet) -> StoreResult<CommitReceipt>;
}
