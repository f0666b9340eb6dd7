//! # Tack Lifecycle
//!
//! Drives a tack from creation to settlement and orchestrates the ledger, fan-out, scheduler
//! and offer engine at every step.
//!
//! ## Settlement
//!
//! An escrowed tack is debited at acceptance and pays the runner out of escrow at FINISHED.
//! An `auto_accept` tack holds no escrow; at FINISHED it either transfers the price from tacker
//! to runner or records the tack as paid without moving money, per
//! `ledger.auto_accept_settlement`. Either way the settlement entries commit together with the
//! `is_paid` flip, and a tack that is already paid is never settled again.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::context::{SystemContext, TransitionPlan};
use super::offer_engine::OfferEngine;
use crate::config::AutoAcceptSettlement;
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::ledger::{escrow_refund, payout, transfer, LedgerEntry, LedgerReason};
use crate::logging::log_tack_operation;
use crate::models::{NewTack, StatsUpdate, Tack, TackId, TackTransition, UserId};
use crate::scheduler::ScheduledJob;
use crate::state_machine::actions::{build_tack_event_context, TACK_CREATED, TACK_EXPIRING};
use crate::state_machine::guards::{StateGuard, TackerOnlyGuard};
use crate::state_machine::{DeleteReason, OfferEvent, TackEvent, TackStateMachine, TackStatus};

#[derive(Clone)]
pub struct TackLifecycle {
    ctx: SystemContext,
    offers: Arc<OfferEngine>,
}

impl TackLifecycle {
    pub fn new(ctx: SystemContext, offers: Arc<OfferEngine>) -> Self {
        Self { ctx, offers }
    }

    /// Post a new tack in CREATED
    #[instrument(skip(self, input), fields(tacker_id = %tacker_id))]
    pub async fn create(&self, tacker_id: UserId, input: NewTack) -> MarketplaceResult<Tack> {
        input.validate(self.ctx.config.lifecycle.max_price)?;
        if input.tack_type.requires_membership() {
            if let Some(group_id) = input.group_id {
                if !self.ctx.membership.is_member(tacker_id, group_id).await? {
                    return Err(MarketplaceError::permission_denied(format!(
                        "user {tacker_id} is not a member of group {group_id}"
                    )));
                }
            }
        }

        let mut plan = TransitionPlan::new(Utc::now());
        let tack = input.into_tack(tacker_id, plan.now);
        let created_state = TackStateMachine::lifecycle_state(&tack);
        plan.changes.insert_tack(tack.clone());
        plan.changes.transition(TackTransition::new(
            tack.id,
            None,
            created_state,
            "create",
            Some(tacker_id),
            json!({ "price": tack.price, "tack_type": tack.tack_type }),
            plan.now,
        ));
        plan.notifications.tack_event(
            &tack,
            tack.status,
            TACK_CREATED,
            build_tack_event_context(&tack, None),
        );

        let receipt = self.ctx.execute(plan).await?;
        let tack = receipt.tack(tack.id).cloned().unwrap_or(tack);
        log_tack_operation("create", tack.id, Some(tacker_id), "created", None);
        Ok(tack)
    }

    /// Runner starts work; schedules the expiry warning when the tack has an estimate
    #[instrument(skip(self), fields(tack_id = %tack_id, runner_id = %runner_id))]
    pub async fn start(&self, tack_id: TackId, runner_id: UserId) -> MarketplaceResult<Tack> {
        let tack = self
            .ctx
            .retry_on_conflict("start_tack", || async move {
                let tack = self.ctx.load_tack(tack_id).await?;
                let mut plan = TransitionPlan::new(Utc::now());
                let started = self.require_transition(
                    plan.tack_event(&tack, TackEvent::Start, Some(runner_id))?,
                    &tack,
                )?;

                let ratio = self.ctx.config.lifecycle.expiry_warning_ratio;
                if let Some(delay) = started.expiry_warning_delay(ratio) {
                    plan.schedule(delay, ScheduledJob::WarnTackExpiring { tack_id });
                }
                self.commit_tack(plan, started).await
            })
            .await?;

        log_tack_operation("start", tack_id, Some(runner_id), "in_progress", None);
        Ok(tack)
    }

    /// Runner reports completion; the accepted offer finishes with it
    #[instrument(skip(self, message), fields(tack_id = %tack_id, runner_id = %runner_id))]
    pub async fn complete(
        &self,
        tack_id: TackId,
        runner_id: UserId,
        message: Option<String>,
    ) -> MarketplaceResult<Tack> {
        let tack = self
            .ctx
            .retry_on_conflict("complete_tack", || {
                let message = message.clone();
                async move {
                    let tack = self.ctx.load_tack(tack_id).await?;
                    let mut plan = TransitionPlan::new(Utc::now());
                    let completed = self.require_transition(
                        plan.tack_event(&tack, TackEvent::Complete { message }, Some(runner_id))?,
                        &tack,
                    )?;

                    if let Some(offer_id) = completed.accepted_offer_id {
                        let offer = self.ctx.load_offer(offer_id).await?;
                        plan.offer_event(&offer, &completed, OfferEvent::Finish, None)?;
                    }
                    self.commit_tack(plan, completed).await
                }
            })
            .await?;

        log_tack_operation("complete", tack_id, Some(runner_id), "waiting_review", None);
        Ok(tack)
    }

    /// Tacker confirms completion; settles and finishes the tack
    ///
    /// Confirming a tack that is already paid returns it unchanged.
    #[instrument(skip(self), fields(tack_id = %tack_id, tacker_id = %tacker_id))]
    pub async fn confirm(&self, tack_id: TackId, tacker_id: UserId) -> MarketplaceResult<Tack> {
        let tack = self
            .ctx
            .retry_on_conflict("confirm_tack", || async move {
                let tack = self.ctx.load_tack(tack_id).await?;
                TackerOnlyGuard {
                    actor_id: tacker_id,
                    action: "confirm completion",
                }
                .check(&tack)
                .map_err(MarketplaceError::from)?;
                if tack.is_paid {
                    debug!(tack_id = %tack_id, "Tack already paid, confirm is a no-op");
                    return Ok(tack);
                }
                let mut plan = TransitionPlan::new(Utc::now());
                let finished = self.plan_finish(&mut plan, &tack, TackEvent::Confirm, tacker_id)?;
                self.commit_tack(plan, finished).await
            })
            .await?;

        log_tack_operation("confirm", tack_id, Some(tacker_id), "finished", None);
        Ok(tack)
    }

    /// Stage the transition to FINISHED with its settlement and statistics
    pub(crate) fn plan_finish(
        &self,
        plan: &mut TransitionPlan,
        tack: &Tack,
        event: TackEvent,
        tacker_id: UserId,
    ) -> MarketplaceResult<Tack> {
        let finished = self.require_transition(plan.tack_event(tack, event, Some(tacker_id))?, tack)?;
        let runner_id = finished.runner_id.ok_or_else(|| {
            MarketplaceError::Internal(format!("finished tack {} has no runner", finished.id))
        })?;

        for entry in self.settlement_entries(&finished, runner_id, plan.now) {
            plan.changes.ledger_entry(entry);
        }
        plan.changes
            .stats(StatsUpdate::CompletedAsTacker(finished.tacker_id))
            .stats(StatsUpdate::CompletedAsRunner(runner_id));
        Ok(finished)
    }

    fn settlement_entries(
        &self,
        tack: &Tack,
        runner_id: UserId,
        now: DateTime<Utc>,
    ) -> Vec<LedgerEntry> {
        if tack.price <= 0 {
            return Vec::new();
        }
        if tack.holds_escrow() {
            return vec![payout(runner_id, tack.price, tack.id, now)];
        }
        match self.ctx.config.ledger.auto_accept_settlement {
            AutoAcceptSettlement::TransferOnFinish => transfer(
                tack.tacker_id,
                runner_id,
                tack.price,
                LedgerReason::SettlementDebit,
                LedgerReason::Payout,
                Some(tack.id),
                now,
            )
            .to_vec(),
            AutoAcceptSettlement::Skip => Vec::new(),
        }
    }

    /// Cancel a tack before FINISHED, refunding any escrow
    ///
    /// `actor_id` is the tacker, or `None` for system cancellation. Cancelling twice returns the
    /// already cancelled tack without a second refund.
    #[instrument(skip(self), fields(tack_id = %tack_id))]
    pub async fn cancel(
        &self,
        tack_id: TackId,
        actor_id: Option<UserId>,
    ) -> MarketplaceResult<Tack> {
        let tack = self
            .ctx
            .retry_on_conflict("cancel_tack", || async move {
                let tack = self.ctx.load_tack(tack_id).await?;
                let mut plan = TransitionPlan::new(Utc::now());
                let Some(canceled) = plan.tack_event(&tack, TackEvent::Cancel, actor_id)? else {
                    debug!(tack_id = %tack_id, "Tack already canceled");
                    return Ok(tack);
                };

                let cascaded = self
                    .offers
                    .cancel_related(&mut plan, &canceled, OfferEvent::CancelWithTack)
                    .await?;
                debug!(tack_id = %tack_id, offers = cascaded, "Cancelling related offers");

                if tack.accepted_offer_id.is_some()
                    && tack.holds_escrow()
                    && !tack.is_paid
                    && tack.price > 0
                {
                    plan.changes.ledger_entry(escrow_refund(
                        tack.tacker_id,
                        tack.price,
                        tack.id,
                        plan.now,
                    ));
                }
                self.commit_tack(plan, canceled).await
            })
            .await?;

        log_tack_operation("cancel", tack_id, actor_id, "canceled", None);
        Ok(tack)
    }

    /// Tacker soft-deletes an open tack; its open offers are deleted with it
    #[instrument(skip(self), fields(tack_id = %tack_id))]
    pub async fn delete(
        &self,
        tack_id: TackId,
        actor_id: Option<UserId>,
    ) -> MarketplaceResult<Tack> {
        let tack = self
            .ctx
            .retry_on_conflict("delete_tack", || async move {
                let tack = self.ctx.load_tack(tack_id).await?;
                self.try_delete(tack, DeleteReason::Tacker, actor_id).await
            })
            .await?;

        log_tack_operation("delete", tack_id, actor_id, "deleted", None);
        Ok(tack)
    }

    async fn try_delete(
        &self,
        tack: Tack,
        reason: DeleteReason,
        actor_id: Option<UserId>,
    ) -> MarketplaceResult<Tack> {
        let mut plan = TransitionPlan::new(Utc::now());
        let Some(deleted) = plan.tack_event(&tack, TackEvent::Delete(reason), actor_id)? else {
            return Ok(tack);
        };
        self.offers
            .cancel_related(&mut plan, &deleted, OfferEvent::DeleteWithTack)
            .await?;
        self.commit_tack(plan, deleted).await
    }

    /// Soft-delete CREATED tacks idle for longer than the inactivity window
    #[instrument(skip(self))]
    pub async fn sweep_inactive_tacks(&self, now: DateTime<Utc>) -> MarketplaceResult<usize> {
        let lifecycle = &self.ctx.config.lifecycle;
        let cutoff = now - lifecycle.inactivity_window();
        let stale = self
            .ctx
            .store
            .list_stale_tacks(cutoff, lifecycle.sweep_batch_size)
            .await?;

        let mut deleted = 0;
        for candidate in stale {
            let candidate_id = candidate.id;
            let result = self
                .ctx
                .retry_on_conflict("sweep_inactive_tack", || async move {
                    let tack = self.ctx.load_tack(candidate_id).await?;
                    // state may have moved since the listing
                    if !tack.is_live()
                        || tack.status != TackStatus::Created
                        || tack.updated_at >= cutoff
                    {
                        return Ok(None);
                    }
                    self.try_delete(tack, DeleteReason::Inactivity, None)
                        .await
                        .map(Some)
                })
                .await;

            match result {
                Ok(Some(tack)) => {
                    deleted += 1;
                    log_tack_operation("inactivity_delete", tack.id, None, "deleted", None);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(tack_id = %candidate_id, error = %err, "Failed to delete inactive tack")
                }
            }
        }

        if deleted > 0 {
            info!(deleted = deleted, cutoff = %cutoff, "Swept inactive tacks");
        }
        Ok(deleted)
    }

    /// Warn the runner that the estimate is nearly used up, if the tack is still in progress
    #[instrument(skip(self), fields(tack_id = %tack_id))]
    pub async fn warn_expiring(&self, tack_id: TackId) -> MarketplaceResult<bool> {
        let tack = self.ctx.load_tack(tack_id).await?;
        if !tack.is_live() || tack.status != TackStatus::InProgress {
            debug!(tack_id = %tack_id, status = %tack.status, "Expiry warning is stale");
            return Ok(false);
        }

        let mut plan = TransitionPlan::new(Utc::now());
        plan.notifications.tack_event(
            &tack,
            tack.status,
            TACK_EXPIRING,
            build_tack_event_context(&tack, None),
        );
        self.ctx.execute(plan).await?;
        Ok(true)
    }

    async fn commit_tack(&self, plan: TransitionPlan, tack: Tack) -> MarketplaceResult<Tack> {
        let receipt = self.ctx.execute(plan).await?;
        Ok(receipt.tack(tack.id).cloned().unwrap_or(tack))
    }

    fn require_transition(&self, updated: Option<Tack>, tack: &Tack) -> MarketplaceResult<Tack> {
        updated.ok_or_else(|| {
            MarketplaceError::Internal(format!(
                "transition on tack {} in '{}' was a no-op",
                tack.id,
                TackStateMachine::lifecycle_state(tack)
            ))
        })
    }
}
