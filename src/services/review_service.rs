//! # Reviews
//!
//! Closing feedback between the two participants of a tack. The tacker's review of a tack that
//! is waiting for review doubles as confirmation: the tack finishes and settles in the same
//! commit as the review. The runner may review once the tack is waiting for review or finished.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use super::context::{SystemContext, TransitionPlan};
use super::tack_lifecycle::TackLifecycle;
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::logging::log_tack_operation;
use crate::models::{EntityRef, NewReview, Review, StatsUpdate, TackId, UserId};
use crate::notifications::Topic;
use crate::state_machine::actions::REVIEW_CREATED;
use crate::state_machine::{TackEvent, TackStateMachine, TackStatus};

#[derive(Clone)]
pub struct ReviewService {
    ctx: SystemContext,
    lifecycle: Arc<TackLifecycle>,
}

impl ReviewService {
    pub fn new(ctx: SystemContext, lifecycle: Arc<TackLifecycle>) -> Self {
        Self { ctx, lifecycle }
    }

    #[instrument(skip(self, input), fields(tack_id = %tack_id, reviewer_id = %reviewer_id))]
    pub async fn create(
        &self,
        tack_id: TackId,
        reviewer_id: UserId,
        input: NewReview,
    ) -> MarketplaceResult<Review> {
        input.validate()?;

        let review = self
            .ctx
            .retry_on_conflict("create_review", || {
                let input = input.clone();
                async move { self.try_create(tack_id, reviewer_id, input).await }
            })
            .await?;

        log_tack_operation(
            "review",
            tack_id,
            Some(reviewer_id),
            "reviewed",
            Some(&format!("rating={}", review.rating)),
        );
        Ok(review)
    }

    async fn try_create(
        &self,
        tack_id: TackId,
        reviewer_id: UserId,
        input: NewReview,
    ) -> MarketplaceResult<Review> {
        let tack = self.ctx.load_tack(tack_id).await?;
        let reviewee_id = tack.counterpart(reviewer_id).ok_or_else(|| {
            MarketplaceError::permission_denied(format!(
                "user {reviewer_id} is not a participant of tack {tack_id}"
            ))
        })?;

        let reviewable = tack.is_live()
            && matches!(tack.status, TackStatus::WaitingReview | TackStatus::Finished);
        if !reviewable {
            return Err(MarketplaceError::InvalidTransition {
                entity: EntityRef::Tack(tack_id),
                from: TackStateMachine::lifecycle_state(&tack),
                event: "review".to_string(),
            });
        }

        let already_reviewed = self
            .ctx
            .store
            .list_reviews_for_tack(tack_id)
            .await?
            .iter()
            .any(|review| review.reviewer_id == reviewer_id);
        if already_reviewed {
            return Err(MarketplaceError::DuplicateReview {
                tack_id,
                reviewer_id,
            });
        }

        let mut plan = TransitionPlan::new(Utc::now());
        let review = input.into_review(tack_id, reviewer_id, reviewee_id, plan.now);

        let notified_tack = if tack.is_tacker(reviewer_id) && tack.status == TackStatus::WaitingReview
        {
            self.lifecycle
                .plan_finish(&mut plan, &tack, TackEvent::ReviewFinish, reviewer_id)?
        } else {
            plan.touch_tack(&tack);
            tack
        };

        plan.changes.review(review.clone()).stats(StatsUpdate::Rated {
            user_id: reviewee_id,
            rating: review.rating,
        });

        let payload = json!({
            "tack_id": tack_id,
            "review": review,
        });
        plan.notifications
            .add(Topic::User(reviewee_id), REVIEW_CREATED, payload.clone());
        plan.notifications
            .push(reviewee_id, REVIEW_CREATED, &notified_tack, payload);

        self.ctx.execute(plan).await?;
        Ok(review)
    }
}
