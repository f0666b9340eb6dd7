//! # Offer Engine
//!
//! Competing offers against one tack: submission, acceptance with sibling invalidation,
//! expiry, withdrawal and the cascades triggered by tack cancellation or deletion.
//!
//! ## Acceptance
//!
//! Acceptance plans the whole outcome against one snapshot and commits it as one unit, in this
//! order: tack to ACCEPTED, siblings to DELETED, the chosen offer to ACCEPTED, then the escrow
//! debit. The commit is conditional on the tack version that was read, and the sibling
//! invalidation runs inside the store so an offer submitted after the snapshot is deleted too.
//! A loser that finds another offer accepted reports `AcceptanceRaceLost`; any other conflict
//! is re-planned.
//!
//! Submissions on an ACTIVE tack leave the tack untouched and only require it to still be
//! ACTIVE when the offer lands, so runners bidding at the same time do not conflict.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::context::{SystemContext, TransitionPlan};
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::ledger::escrow_hold;
use crate::logging::log_offer_operation;
use crate::models::tack::validate_price;
use crate::models::{EntityRef, Offer, OfferId, OfferType, Tack, TackId, UserId};
use crate::scheduler::ScheduledJob;
use crate::state_machine::actions::{build_offer_event_context, OFFER_CREATED};
use crate::state_machine::guards::{OfferOwnerGuard, StateGuard, SufficientBalanceGuard};
use crate::state_machine::{OfferEvent, OfferStatus, TackEvent, TackStateMachine, TackStatus};
use crate::store::OpenOffers;

/// A committed acceptance
#[derive(Debug, Clone, PartialEq)]
pub struct Acceptance {
    pub tack: Tack,
    pub offer: Offer,
}

/// Input for submitting an offer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewOffer {
    /// `None` accepts the listed price; `Some` makes a counter-offer
    pub price: Option<i64>,
    /// Defaults to `offers.default_lifetime_seconds`
    pub lifetime_seconds: Option<i64>,
}

#[derive(Clone)]
pub struct OfferEngine {
    ctx: SystemContext,
}

impl OfferEngine {
    pub fn new(ctx: SystemContext) -> Self {
        Self { ctx }
    }

    /// Submit an offer on a tack
    ///
    /// On an `auto_accept` tack a plain offer is accepted immediately on the tacker's behalf;
    /// the returned offer then reflects the acceptance.
    #[instrument(skip(self, input), fields(tack_id = %tack_id, runner_id = %runner_id))]
    pub async fn submit(
        &self,
        tack_id: TackId,
        runner_id: UserId,
        input: NewOffer,
    ) -> MarketplaceResult<Offer> {
        let lifetime_seconds = self.validate_offer(&input)?;

        let offer = self
            .ctx
            .retry_on_conflict("submit_offer", || {
                self.try_submit(tack_id, runner_id, input.price, lifetime_seconds)
            })
            .await?;

        log_offer_operation("submit", offer.id, tack_id, runner_id, "created");

        let tack = self.ctx.load_tack(tack_id).await?;
        if tack.auto_accept && offer.offer_type == OfferType::Offer {
            return self.auto_accept(offer).await;
        }
        Ok(offer)
    }

    fn validate_offer(&self, input: &NewOffer) -> MarketplaceResult<i64> {
        if let Some(price) = input.price {
            validate_price("price", price, self.ctx.config.lifecycle.max_price)?;
        }
        let offers = &self.ctx.config.offers;
        let lifetime = input
            .lifetime_seconds
            .unwrap_or(offers.default_lifetime_seconds);
        if lifetime <= 0 || lifetime > offers.max_lifetime_seconds {
            return Err(MarketplaceError::validation(
                "lifetime_seconds",
                format!("must be between 1 and {}", offers.max_lifetime_seconds),
            ));
        }
        Ok(lifetime)
    }

    async fn try_submit(
        &self,
        tack_id: TackId,
        runner_id: UserId,
        price: Option<i64>,
        lifetime_seconds: i64,
    ) -> MarketplaceResult<Offer> {
        let tack = self.ctx.load_tack(tack_id).await?;

        if tack.is_tacker(runner_id) {
            return Err(MarketplaceError::SelfOfferNotAllowed { tack_id });
        }
        self.ctx.ensure_visible(&tack, runner_id).await?;
        if !tack.is_open_for_offers() {
            return Err(MarketplaceError::InvalidTransition {
                entity: EntityRef::Tack(tack_id),
                from: TackStateMachine::lifecycle_state(&tack),
                event: "submit_offer".to_string(),
            });
        }
        if price.is_some() && !tack.allow_counter_offer {
            return Err(MarketplaceError::CounterOfferNotAllowed { tack_id });
        }

        let existing = self.ctx.store.list_offers_for_tack(tack_id).await?;
        if existing
            .iter()
            .any(|offer| offer.is_active && offer.runner_id == runner_id)
        {
            return Err(MarketplaceError::DuplicateOffer { tack_id, runner_id });
        }

        let mut plan = TransitionPlan::new(Utc::now());
        let offer = Offer::new(tack_id, runner_id, price, lifetime_seconds, plan.now);
        plan.changes.insert_offer(offer.clone());
        plan.notifications.offer_event(
            &offer,
            &tack,
            OFFER_CREATED,
            build_offer_event_context(&offer, None),
        );

        if tack.status == TackStatus::Created {
            plan.tack_event(&tack, TackEvent::OfferOpened, None)?;
        } else {
            plan.guard_offers(&tack, OpenOffers::Any);
        }
        plan.schedule(
            Duration::from_secs(lifetime_seconds as u64),
            ScheduledJob::ExpireOffer { offer_id: offer.id },
        );

        let receipt = self.ctx.execute(plan).await?;
        Ok(receipt.offer(offer.id).cloned().unwrap_or(offer))
    }

    async fn auto_accept(&self, offer: Offer) -> MarketplaceResult<Offer> {
        match self.accept(offer.id, None).await {
            Ok(acceptance) => Ok(acceptance.offer),
            Err(MarketplaceError::AcceptanceRaceLost { .. }) => {
                debug!(offer_id = %offer.id, "Auto-accept lost to an earlier offer");
                self.ctx.load_offer(offer.id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Accept an offer
    ///
    /// `actor_id` is the tacker, or `None` when the system accepts on an auto-accept tack.
    #[instrument(skip(self), fields(offer_id = %offer_id))]
    pub async fn accept(
        &self,
        offer_id: OfferId,
        actor_id: Option<UserId>,
    ) -> MarketplaceResult<Acceptance> {
        let retries = self.ctx.config.lifecycle.conflict_retries;
        let mut tries = 0;
        loop {
            match self.try_accept(offer_id, actor_id).await {
                Err(MarketplaceError::Conflict { entity }) => {
                    let offer = self.ctx.load_offer(offer_id).await?;
                    let tack = self.ctx.load_tack(offer.tack_id).await?;
                    if let Some(accepted) = tack.accepted_offer_id {
                        if accepted != offer_id {
                            info!(
                                tack_id = %tack.id,
                                offer_id = %offer_id,
                                winner = %accepted,
                                "Acceptance race lost"
                            );
                            return Err(MarketplaceError::AcceptanceRaceLost {
                                tack_id: tack.id,
                                offer_id,
                            });
                        }
                    }
                    if tries >= retries {
                        return Err(MarketplaceError::Conflict { entity });
                    }
                    tries += 1;
                    debug!(offer_id = %offer_id, retry = tries, "Re-planning acceptance");
                }
                other => return other,
            }
        }
    }

    async fn try_accept(
        &self,
        offer_id: OfferId,
        actor_id: Option<UserId>,
    ) -> MarketplaceResult<Acceptance> {
        let offer = self.ctx.load_offer(offer_id).await?;
        let tack = self.ctx.load_tack(offer.tack_id).await?;

        match tack.accepted_offer_id {
            Some(accepted) if accepted == offer_id => {
                return Ok(Acceptance { tack, offer });
            }
            Some(_) => {
                return Err(MarketplaceError::AcceptanceRaceLost {
                    tack_id: tack.id,
                    offer_id,
                });
            }
            None => {}
        }
        if !offer.is_open() {
            return Err(MarketplaceError::InvalidTransition {
                entity: EntityRef::Offer(offer_id),
                from: offer.status.to_string(),
                event: OfferEvent::Accept.event_type().to_string(),
            });
        }

        let price = offer.effective_price(tack.price);
        if tack.holds_escrow() {
            let available = self.ctx.store.balance(tack.tacker_id).await?;
            SufficientBalanceGuard {
                user_id: tack.tacker_id,
                available,
                required: price,
            }
            .check(&tack)
            .map_err(MarketplaceError::from)?;
        }

        let mut plan = TransitionPlan::new(Utc::now());
        let event = TackEvent::Accept {
            offer_id,
            runner_id: offer.runner_id,
            price,
        };
        let accepted_tack = plan
            .tack_event(&tack, event, actor_id)?
            .ok_or_else(|| MarketplaceError::Internal("acceptance produced no transition".into()))?;

        plan.sweep_offers(&accepted_tack, OfferEvent::Supersede);
        let accepted_offer = plan
            .offer_event(&offer, &accepted_tack, OfferEvent::Accept, None)?
            .ok_or_else(|| MarketplaceError::Internal("offer acceptance was a no-op".into()))?;

        if accepted_tack.holds_escrow() && price > 0 {
            plan.changes
                .ledger_entry(escrow_hold(tack.tacker_id, price, tack.id, plan.now));
        }

        let receipt = self.ctx.execute(plan).await?;
        let tack = receipt.tack(tack.id).cloned().unwrap_or(accepted_tack);
        let offer = receipt.offer(offer_id).cloned().unwrap_or(accepted_offer);

        log_offer_operation("accept", offer.id, tack.id, offer.runner_id, "accepted");
        Ok(Acceptance { tack, offer })
    }

    /// Expire an offer whose lifetime elapsed; no-op unless it is still open
    #[instrument(skip(self), fields(offer_id = %offer_id))]
    pub async fn expire(&self, offer_id: OfferId) -> MarketplaceResult<Option<Offer>> {
        self.ctx
            .retry_on_conflict("expire_offer", || {
                self.close_offer(offer_id, OfferEvent::Expire, None)
            })
            .await
    }

    /// Runner removes a non-accepted offer
    #[instrument(skip(self), fields(offer_id = %offer_id, runner_id = %runner_id))]
    pub async fn withdraw(&self, offer_id: OfferId, runner_id: UserId) -> MarketplaceResult<Offer> {
        let offer = self.ctx.load_offer(offer_id).await?;
        OfferOwnerGuard {
            actor_id: runner_id,
        }
        .check(&offer)
        .map_err(MarketplaceError::from)?;
        if offer.status == OfferStatus::Accepted {
            return Err(MarketplaceError::CannotWithdrawAccepted { offer_id });
        }

        let closed = self
            .ctx
            .retry_on_conflict("withdraw_offer", || {
                self.close_offer(offer_id, OfferEvent::Withdraw, Some(runner_id))
            })
            .await?;
        match closed {
            Some(offer) => Ok(offer),
            None => self.ctx.load_offer(offer_id).await,
        }
    }

    /// Close one open offer and drive ACTIVE back to CREATED if it was the last one
    async fn close_offer(
        &self,
        offer_id: OfferId,
        event: OfferEvent,
        actor_id: Option<UserId>,
    ) -> MarketplaceResult<Option<Offer>> {
        let offer = self.ctx.load_offer(offer_id).await?;
        if event == OfferEvent::Withdraw && offer.status == OfferStatus::Accepted {
            return Err(MarketplaceError::CannotWithdrawAccepted { offer_id });
        }
        if !offer.is_open() {
            debug!(offer_id = %offer_id, status = %offer.status, "Offer already closed");
            return Ok(None);
        }
        let tack = self.ctx.load_tack(offer.tack_id).await?;

        let mut plan = TransitionPlan::new(Utc::now());
        let Some(closed) = plan.offer_event(&offer, &tack, event, actor_id)? else {
            return Ok(None);
        };

        let still_open = self
            .ctx
            .store
            .list_offers_for_tack(tack.id)
            .await?
            .iter()
            .filter(|o| o.id != offer_id && o.is_open())
            .count();
        if still_open == 0 && tack.status == TackStatus::Active && tack.is_live() {
            plan.tack_event(&tack, TackEvent::OffersDrained, None)?;
            plan.guard_offers(&tack, OpenOffers::NoneBesides(offer_id));
        } else if tack.is_open_for_offers() {
            plan.guard_offers(&tack, OpenOffers::OthersBesides(offer_id));
        }

        let receipt = self.ctx.execute(plan).await?;
        let closed = receipt.offer(offer_id).cloned().unwrap_or(closed);
        log_offer_operation(
            event.event_type(),
            closed.id,
            closed.tack_id,
            closed.runner_id,
            &closed.status.to_string(),
        );
        Ok(Some(closed))
    }

    /// Stage `event` for every offer of `tack` it applies to
    ///
    /// Used by tack cancellation (`CancelWithTack`, which also reaches the accepted offer) and
    /// deletion (`DeleteWithTack`, open offers only). Open offers submitted after the listing
    /// are closed by the store in the same commit. Returns the number of offers staged here.
    pub async fn cancel_related(
        &self,
        plan: &mut TransitionPlan,
        tack: &Tack,
        event: OfferEvent,
    ) -> MarketplaceResult<usize> {
        let offers = self.ctx.store.list_offers_for_tack(tack.id).await?;
        let mut changed = 0;
        for offer in offers.iter().filter(|offer| offer.is_active) {
            if plan.offer_event(offer, tack, event, None)?.is_some() {
                changed += 1;
            }
        }
        plan.sweep_offers(tack, event);
        Ok(changed)
    }

    /// Expire open offers whose timers were lost
    #[instrument(skip(self))]
    pub async fn sweep_overdue_offers(
        &self,
        now: chrono::DateTime<Utc>,
    ) -> MarketplaceResult<usize> {
        let batch = self.ctx.config.lifecycle.sweep_batch_size;
        let overdue = self.ctx.store.list_overdue_offers(now, batch).await?;
        let mut expired = 0;
        for offer in overdue {
            match self.expire(offer.id).await {
                Ok(Some(_)) => expired += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(offer_id = %offer.id, error = %err, "Failed to expire overdue offer")
                }
            }
        }
        if expired > 0 {
            info!(expired = expired, "Expired overdue offers");
        }
        Ok(expired)
    }
}
