//! # Marketplace
//!
//! Single entry point for commands, queries and scheduled jobs. Built once from a
//! [`SystemContext`] and cheap to clone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::context::SystemContext;
use super::offer_engine::{Acceptance, NewOffer, OfferEngine};
use super::review_service::ReviewService;
use super::tack_lifecycle::TackLifecycle;
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::ledger::{Ledger, LedgerEntry};
use crate::models::{
    GroupId, NewReview, NewTack, Offer, OfferId, Review, Tack, TackId, TackTransition, UserId,
    UserStats,
};
use crate::scheduler::{JobHandler, ScheduledJob};

#[derive(Clone)]
pub struct Marketplace {
    ctx: SystemContext,
    offers: Arc<OfferEngine>,
    lifecycle: Arc<TackLifecycle>,
    reviews: ReviewService,
    ledger: Ledger,
}

impl Marketplace {
    pub fn new(ctx: SystemContext) -> Self {
        let offers = Arc::new(OfferEngine::new(ctx.clone()));
        let lifecycle = Arc::new(TackLifecycle::new(ctx.clone(), Arc::clone(&offers)));
        let reviews = ReviewService::new(ctx.clone(), Arc::clone(&lifecycle));
        let ledger = Ledger::new(Arc::clone(&ctx.store));
        Self {
            ctx,
            offers,
            lifecycle,
            reviews,
            ledger,
        }
    }

    pub fn context(&self) -> &SystemContext {
        &self.ctx
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // ----- commands -----

    pub async fn create_tack(&self, tacker_id: UserId, input: NewTack) -> MarketplaceResult<Tack> {
        self.lifecycle.create(tacker_id, input).await
    }

    pub async fn submit_offer(
        &self,
        tack_id: TackId,
        runner_id: UserId,
        input: NewOffer,
    ) -> MarketplaceResult<Offer> {
        self.offers.submit(tack_id, runner_id, input).await
    }

    pub async fn accept_offer(
        &self,
        offer_id: OfferId,
        tacker_id: UserId,
    ) -> MarketplaceResult<Acceptance> {
        self.offers.accept(offer_id, Some(tacker_id)).await
    }

    pub async fn start_tack(&self, tack_id: TackId, runner_id: UserId) -> MarketplaceResult<Tack> {
        self.lifecycle.start(tack_id, runner_id).await
    }

    pub async fn complete_tack(
        &self,
        tack_id: TackId,
        runner_id: UserId,
        message: Option<String>,
    ) -> MarketplaceResult<Tack> {
        self.lifecycle.complete(tack_id, runner_id, message).await
    }

    pub async fn confirm_complete(
        &self,
        tack_id: TackId,
        tacker_id: UserId,
    ) -> MarketplaceResult<Tack> {
        self.lifecycle.confirm(tack_id, tacker_id).await
    }

    pub async fn cancel_tack(&self, tack_id: TackId, tacker_id: UserId) -> MarketplaceResult<Tack> {
        self.lifecycle.cancel(tack_id, Some(tacker_id)).await
    }

    pub async fn delete_tack(&self, tack_id: TackId, tacker_id: UserId) -> MarketplaceResult<Tack> {
        self.lifecycle.delete(tack_id, Some(tacker_id)).await
    }

    pub async fn withdraw_offer(
        &self,
        offer_id: OfferId,
        runner_id: UserId,
    ) -> MarketplaceResult<Offer> {
        self.offers.withdraw(offer_id, runner_id).await
    }

    pub async fn create_review(
        &self,
        tack_id: TackId,
        reviewer_id: UserId,
        input: NewReview,
    ) -> MarketplaceResult<Review> {
        self.reviews.create(tack_id, reviewer_id, input).await
    }

    /// Fund a balance; returns the new balance
    pub async fn deposit(&self, user_id: UserId, amount: i64) -> MarketplaceResult<i64> {
        self.ledger.deposit(user_id, amount).await
    }

    // ----- queries -----

    pub async fn get_tack(&self, tack_id: TackId) -> MarketplaceResult<Tack> {
        self.ctx.load_tack(tack_id).await
    }

    pub async fn get_offer(&self, offer_id: OfferId) -> MarketplaceResult<Offer> {
        self.ctx.load_offer(offer_id).await
    }

    /// Open tacks of a group, for one of its members
    pub async fn list_group_tacks(
        &self,
        group_id: GroupId,
        viewer_id: UserId,
    ) -> MarketplaceResult<Vec<Tack>> {
        if !self.ctx.membership.is_member(viewer_id, group_id).await? {
            return Err(MarketplaceError::permission_denied(format!(
                "user {viewer_id} is not a member of group {group_id}"
            )));
        }
        Ok(self.ctx.store.list_group_tacks(group_id).await?)
    }

    pub async fn list_offers(&self, tack_id: TackId) -> MarketplaceResult<Vec<Offer>> {
        Ok(self.ctx.store.list_offers_for_tack(tack_id).await?)
    }

    pub async fn list_reviews(&self, tack_id: TackId) -> MarketplaceResult<Vec<Review>> {
        Ok(self.ctx.store.list_reviews_for_tack(tack_id).await?)
    }

    pub async fn tack_history(&self, tack_id: TackId) -> MarketplaceResult<Vec<TackTransition>> {
        Ok(self.ctx.store.list_transitions(tack_id).await?)
    }

    pub async fn balance(&self, user_id: UserId) -> MarketplaceResult<i64> {
        self.ledger.balance(user_id).await
    }

    pub async fn ledger_entries(&self, user_id: UserId) -> MarketplaceResult<Vec<LedgerEntry>> {
        self.ledger.entries(user_id).await
    }

    pub async fn user_stats(&self, user_id: UserId) -> MarketplaceResult<UserStats> {
        Ok(self.ctx.store.user_stats(user_id).await?)
    }

    // ----- scheduled work -----

    pub async fn expire_offer(&self, offer_id: OfferId) -> MarketplaceResult<Option<Offer>> {
        self.offers.expire(offer_id).await
    }

    pub async fn warn_tack_expiring(&self, tack_id: TackId) -> MarketplaceResult<bool> {
        self.lifecycle.warn_expiring(tack_id).await
    }

    pub async fn sweep_inactive_tacks(&self, now: DateTime<Utc>) -> MarketplaceResult<usize> {
        self.lifecycle.sweep_inactive_tacks(now).await
    }

    pub async fn sweep_overdue_offers(&self, now: DateTime<Utc>) -> MarketplaceResult<usize> {
        self.offers.sweep_overdue_offers(now).await
    }
}

#[async_trait]
impl JobHandler for Marketplace {
    #[instrument(skip(self), fields(job = %job))]
    async fn handle(&self, job: ScheduledJob) -> MarketplaceResult<()> {
        match job {
            ScheduledJob::ExpireOffer { offer_id } => {
                let expired = self.expire_offer(offer_id).await?;
                debug!(offer_id = %offer_id, expired = expired.is_some(), "Expiry job done");
            }
            ScheduledJob::WarnTackExpiring { tack_id } => {
                self.warn_tack_expiring(tack_id).await?;
            }
            ScheduledJob::SweepInactiveTacks => {
                self.sweep_inactive_tacks(Utc::now()).await?;
            }
            ScheduledJob::SweepOverdueOffers => {
                self.sweep_overdue_offers(Utc::now()).await?;
            }
        }
        Ok(())
    }
}
