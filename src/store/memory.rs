use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::{next_versions, ChangeSet, CommitReceipt, MarketplaceStore, StoreError, StoreResult};
use crate::ledger::{apply_entries, LedgerEntry};
use crate::models::transitions::sequence_transitions;
use crate::models::{
    EntityRef, GroupId, Offer, OfferId, Review, Tack, TackId, TackTransition, UserId, UserStats,
};
use crate::state_machine::{OfferChange, TackStatus};

#[derive(Debug, Default)]
struct State {
    tacks: HashMap<TackId, Tack>,
    offers: HashMap<OfferId, Offer>,
    reviews: Vec<Review>,
    transitions: HashMap<TackId, Vec<TackTransition>>,
    balances: HashMap<UserId, i64>,
    journal: Vec<LedgerEntry>,
    stats: HashMap<UserId, UserStats>,
}

/// Process-local store guarded by a single mutex
///
/// Every commit validates the whole change set before touching anything, so a rejected commit
/// leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    /// Open offers of a tack, oldest first
    fn open_offers(&self, tack_id: TackId) -> Vec<Offer> {
        let mut open: Vec<Offer> = self
            .offers
            .values()
            .filter(|offer| offer.tack_id == tack_id && offer.status.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|offer| (offer.created_at, offer.id));
        open
    }

    fn check_guards(&self, changes: &ChangeSet) -> StoreResult<()> {
        for guard in &changes.guards {
            let open: Vec<OfferId> = self
                .open_offers(guard.tack_id)
                .iter()
                .map(|offer| offer.id)
                .collect();
            guard.check(self.tacks.get(&guard.tack_id), &open)?;
        }
        Ok(())
    }

    fn stage_sweeps(&self, changes: &mut ChangeSet) -> StoreResult<Vec<OfferChange>> {
        let sweeps = changes.sweeps.clone();
        let mut swept = Vec::new();
        for sweep in &sweeps {
            let open = self.open_offers(sweep.tack.id);
            swept.extend(sweep.stage(changes, open)?);
        }
        Ok(swept)
    }

    fn check_versions(&self, changes: &ChangeSet) -> StoreResult<()> {
        for write in &changes.tacks {
            let stored = self.tacks.get(&write.tack.id).map(|t| t.version);
            check_version(EntityRef::Tack(write.tack.id), stored, write.expected_version)?;
        }
        for write in &changes.offers {
            let stored = self.offers.get(&write.offer.id).map(|o| o.version);
            check_version(EntityRef::Offer(write.offer.id), stored, write.expected_version)?;
        }
        Ok(())
    }

    /// At most one active offer per (tack, runner) after the commit
    fn check_active_offers(&self, changes: &ChangeSet) -> StoreResult<()> {
        let written: HashMap<OfferId, &Offer> = changes
            .offers
            .iter()
            .map(|write| (write.offer.id, &write.offer))
            .collect();

        for offer in written.values().filter(|offer| offer.is_active) {
            let persisted = self
                .offers
                .values()
                .filter(|other| !written.contains_key(&other.id));
            let clash = persisted
                .chain(written.values().copied())
                .any(|other| {
                    other.id != offer.id
                        && other.is_active
                        && other.tack_id == offer.tack_id
                        && other.runner_id == offer.runner_id
                });
            if clash {
                return Err(StoreError::DuplicateActiveOffer {
                    tack_id: offer.tack_id,
                    runner_id: offer.runner_id,
                });
            }
        }
        Ok(())
    }

    fn check_reviews(&self, changes: &ChangeSet) -> StoreResult<()> {
        let mut seen: HashSet<(TackId, UserId)> = self
            .reviews
            .iter()
            .map(|review| (review.tack_id, review.reviewer_id))
            .collect();
        for review in &changes.reviews {
            if !seen.insert((review.tack_id, review.reviewer_id)) {
                return Err(StoreError::DuplicateReview {
                    tack_id: review.tack_id,
                    reviewer_id: review.reviewer_id,
                });
            }
        }
        Ok(())
    }

    fn has_offer_activity_since(&self, tack_id: TackId, cutoff: DateTime<Utc>) -> bool {
        self.offers
            .values()
            .any(|offer| offer.tack_id == tack_id && offer.updated_at >= cutoff)
    }
}

fn check_version(entity: EntityRef, stored: Option<i64>, expected: Option<i64>) -> StoreResult<()> {
    match (stored, expected) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(StoreError::Conflict { entity }),
        (None, Some(_)) => Err(StoreError::NotFound { entity }),
        (Some(stored), Some(expected)) if stored == expected => Ok(()),
        (Some(_), Some(_)) => Err(StoreError::Conflict { entity }),
    }
}

#[async_trait]
impl MarketplaceStore for InMemoryStore {
    async fn get_tack(&self, id: TackId) -> StoreResult<Option<Tack>> {
        Ok(self.state.lock().tacks.get(&id).cloned())
    }

    async fn get_offer(&self, id: OfferId) -> StoreResult<Option<Offer>> {
        Ok(self.state.lock().offers.get(&id).cloned())
    }

    async fn list_offers_for_tack(&self, tack_id: TackId) -> StoreResult<Vec<Offer>> {
        let state = self.state.lock();
        let mut offers: Vec<Offer> = state
            .offers
            .values()
            .filter(|offer| offer.tack_id == tack_id)
            .cloned()
            .collect();
        offers.sort_by_key(|offer| (offer.created_at, offer.id));
        Ok(offers)
    }

    async fn list_group_tacks(&self, group_id: GroupId) -> StoreResult<Vec<Tack>> {
        let state = self.state.lock();
        let mut tacks: Vec<Tack> = state
            .tacks
            .values()
            .filter(|tack| tack.group_id == Some(group_id) && tack.is_open_for_offers())
            .cloned()
            .collect();
        tacks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tacks)
    }

    async fn list_stale_tacks(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Tack>> {
        let state = self.state.lock();
        let mut stale: Vec<Tack> = state
            .tacks
            .values()
            .filter(|tack| {
                tack.is_live()
                    && tack.status == TackStatus::Created
                    && tack.updated_at < cutoff
                    && !state.has_offer_activity_since(tack.id, cutoff)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|tack| tack.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn list_overdue_offers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Offer>> {
        let state = self.state.lock();
        let mut overdue: Vec<Offer> = state
            .offers
            .values()
            .filter(|offer| offer.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|offer| offer.expires_at());
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn list_reviews_for_tack(&self, tack_id: TackId) -> StoreResult<Vec<Review>> {
        Ok(self
            .state
            .lock()
            .reviews
            .iter()
            .filter(|review| review.tack_id == tack_id)
            .cloned()
            .collect())
    }

    async fn list_transitions(&self, tack_id: TackId) -> StoreResult<Vec<TackTransition>> {
        Ok(self
            .state
            .lock()
            .transitions
            .get(&tack_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn balance(&self, user_id: UserId) -> StoreResult<i64> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }

    async fn ledger_entries(&self, user_id: UserId) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self
            .state
            .lock()
            .journal
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn user_stats(&self, user_id: UserId) -> StoreResult<UserStats> {
        Ok(self
            .state
            .lock()
            .stats
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserStats::empty(user_id)))
    }

    async fn commit(&self, mut changes: ChangeSet) -> StoreResult<CommitReceipt> {
        let mut state = self.state.lock();

        state.check_guards(&changes)?;
        let swept = state.stage_sweeps(&mut changes)?;
        state.check_versions(&changes)?;
        state.check_active_offers(&changes)?;
        state.check_reviews(&changes)?;
        // last fallible step; leaves balances untouched on error
        apply_entries(&mut state.balances, &changes.ledger)?;

        next_versions(&mut changes);
        let mut receipt = CommitReceipt {
            swept,
            ..CommitReceipt::default()
        };
        for write in changes.tacks {
            receipt.tacks.push(write.tack.clone());
            state.tacks.insert(write.tack.id, write.tack);
        }
        for write in changes.offers {
            receipt.offers.push(write.offer.clone());
            state.offers.insert(write.offer.id, write.offer);
        }

        let mut by_tack: HashMap<TackId, Vec<TackTransition>> = HashMap::new();
        for transition in changes.transitions {
            by_tack
                .entry(transition.tack_id)
                .or_default()
                .push(transition);
        }
        for (tack_id, mut pending) in by_tack {
            let history = state.transitions.entry(tack_id).or_default();
            sequence_transitions(history, &mut pending);
            history.extend(pending);
        }

        for update in &changes.stats {
            state
                .stats
                .entry(update.user_id())
                .or_insert_with(|| UserStats::empty(update.user_id()))
                .apply(update);
        }
        state.reviews.extend(changes.reviews);
        state.journal.extend(changes.ledger);

        debug!(
            tacks = receipt.tacks.len(),
            offers = receipt.offers.len(),
            "Committed change set"
        );
        Ok(receipt)
    }
}
