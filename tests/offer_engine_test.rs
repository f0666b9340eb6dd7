//! Offer submission, acceptance, expiry and withdrawal.

mod common;

use std::time::Duration;

use common::TestMarket;
use tack_market::models::{GroupId, NewTack, OfferStatus, OfferType, TackStatus, TackType, UserId};
use tack_market::scheduler::ScheduledJob;
use tack_market::services::NewOffer;
use tack_market::MarketplaceError;

fn counter(price: i64) -> NewOffer {
    NewOffer {
        price: Some(price),
        lifetime_seconds: None,
    }
}

#[tokio::test]
async fn test_counter_offer_rejected_when_not_allowed() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 1_000).await;

    let result = harness
        .market
        .submit_offer(tack.id, UserId::new(), counter(500))
        .await;
    assert!(matches!(
        result,
        Err(MarketplaceError::CounterOfferNotAllowed { tack_id }) if tack_id == tack.id
    ));
    assert!(harness.market.list_offers(tack.id).await.unwrap().is_empty());
    assert_eq!(
        harness.market.get_tack(tack.id).await.unwrap().status,
        TackStatus::Created
    );
}

#[tokio::test]
async fn test_counter_offer_sets_the_agreed_price() {
    let harness = TestMarket::new();
    let tacker = harness.funded_user(1_000).await;
    let tack = harness
        .create_tack(
            tacker,
            NewTack::new("Paint fence", 800, TackType::Public).with_counter_offers(),
        )
        .await;

    let offer = harness
        .market
        .submit_offer(tack.id, UserId::new(), counter(650))
        .await
        .unwrap();
    assert_eq!(offer.offer_type, OfferType::CounterOffer);

    let acceptance = harness.market.accept_offer(offer.id, tacker).await.unwrap();
    assert_eq!(acceptance.tack.price, 650);
    assert_eq!(harness.market.balance(tacker).await.unwrap(), 350);
}

#[tokio::test]
async fn test_duplicate_active_offer_rejected() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 100).await;
    let runner = UserId::new();

    let first = harness.offer(&tack, runner).await;
    let second = harness
        .market
        .submit_offer(tack.id, runner, NewOffer::default())
        .await;
    assert!(matches!(second, Err(MarketplaceError::DuplicateOffer { .. })));

    let active: Vec<_> = harness
        .market
        .list_offers(tack.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|offer| offer.runner_id == runner && offer.is_active)
        .collect();
    assert_eq!(active.len(), 1);

    harness.market.withdraw_offer(first.id, runner).await.unwrap();
    let resubmitted = harness.offer(&tack, runner).await;
    assert_ne!(resubmitted.id, first.id);
}

#[tokio::test]
async fn test_tacker_cannot_offer_on_own_tack() {
    let harness = TestMarket::new();
    let tacker = UserId::new();
    let tack = harness.public_tack(tacker, 100).await;

    let result = harness
        .market
        .submit_offer(tack.id, tacker, NewOffer::default())
        .await;
    assert!(matches!(result, Err(MarketplaceError::SelfOfferNotAllowed { .. })));
}

#[tokio::test]
async fn test_offer_lifetime_is_validated() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 100).await;

    let result = harness
        .market
        .submit_offer(
            tack.id,
            UserId::new(),
            NewOffer {
                price: None,
                lifetime_seconds: Some(0),
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(MarketplaceError::Validation { field: "lifetime_seconds", .. })
    ));
}

#[tokio::test]
async fn test_expiry_reverts_tack_to_created() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 100).await;
    let runner = UserId::new();

    let offer = harness
        .market
        .submit_offer(
            tack.id,
            runner,
            NewOffer {
                price: None,
                lifetime_seconds: Some(1),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        harness.market.get_tack(tack.id).await.unwrap().status,
        TackStatus::Active
    );

    let expiry = ScheduledJob::ExpireOffer { offer_id: offer.id };
    assert_eq!(harness.scheduler.delay_of(&expiry), Some(Duration::from_secs(1)));

    let fired = harness.run_pending_jobs().await;
    assert_eq!(fired, vec![expiry]);

    let offer = harness.market.get_offer(offer.id).await.unwrap();
    assert_eq!(offer.status, OfferStatus::Expired);
    assert!(!offer.is_active);
    assert_eq!(
        harness.market.get_tack(tack.id).await.unwrap().status,
        TackStatus::Created
    );
    assert!(harness
        .pushed_events_for(runner)
        .contains(&"offer_expired".to_string()));

    // redelivery is a no-op
    assert!(harness.market.expire_offer(offer.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expiring_one_of_two_offers_keeps_tack_active() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 100).await;
    let expiring = harness.offer(&tack, UserId::new()).await;
    harness.offer(&tack, UserId::new()).await;

    harness.market.expire_offer(expiring.id).await.unwrap();
    assert_eq!(
        harness.market.get_tack(tack.id).await.unwrap().status,
        TackStatus::Active
    );
}

#[tokio::test]
async fn test_expiry_after_acceptance_is_a_no_op() {
    let harness = TestMarket::new();
    let accepted = harness.accepted_tack(100, 100).await;

    let expired = harness.market.expire_offer(accepted.offer.id).await.unwrap();
    assert!(expired.is_none());
    let offer = harness.market.get_offer(accepted.offer.id).await.unwrap();
    assert_eq!(offer.status, OfferStatus::Accepted);
}

#[tokio::test]
async fn test_withdraw_rules() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 100).await;
    let runner = UserId::new();
    let offer = harness.offer(&tack, runner).await;

    let foreign = harness.market.withdraw_offer(offer.id, UserId::new()).await;
    assert!(matches!(foreign, Err(MarketplaceError::PermissionDenied { .. })));

    let withdrawn = harness.market.withdraw_offer(offer.id, runner).await.unwrap();
    assert_eq!(withdrawn.status, OfferStatus::Deleted);
    assert!(!withdrawn.is_active);
    assert_eq!(
        harness.market.get_tack(tack.id).await.unwrap().status,
        TackStatus::Created
    );

    let again = harness.market.withdraw_offer(offer.id, runner).await.unwrap();
    assert_eq!(again.status, OfferStatus::Deleted);
}

#[tokio::test]
async fn test_accepted_offer_cannot_be_withdrawn() {
    let harness = TestMarket::new();
    let accepted = harness.accepted_tack(100, 100).await;

    let result = harness
        .market
        .withdraw_offer(accepted.offer.id, accepted.runner)
        .await;
    assert!(matches!(
        result,
        Err(MarketplaceError::CannotWithdrawAccepted { .. })
    ));
}

#[tokio::test]
async fn test_group_tack_visibility() {
    let harness = TestMarket::new();
    let group = GroupId::new();
    let tacker = UserId::new();
    let tack = harness.group_tack(tacker, group, 100).await;

    let outsider = UserId::new();
    let hidden = harness
        .market
        .submit_offer(tack.id, outsider, NewOffer::default())
        .await;
    assert!(matches!(hidden, Err(MarketplaceError::NotVisible { .. })));

    let listing = harness.market.list_group_tacks(group, outsider).await;
    assert!(matches!(listing, Err(MarketplaceError::PermissionDenied { .. })));

    let member = UserId::new();
    harness.membership.add_member(group, member);
    harness.offer(&tack, member).await;

    let listed = harness.market.list_group_tacks(group, member).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, tack.id);
}

#[tokio::test]
async fn test_acceptance_deletes_sibling_offers() {
    let harness = TestMarket::new();
    let tacker = harness.funded_user(500).await;
    let tack = harness.public_tack(tacker, 500).await;
    let winner = UserId::new();
    let loser = UserId::new();
    let winning = harness.offer(&tack, winner).await;
    let losing = harness.offer(&tack, loser).await;

    harness.market.accept_offer(winning.id, tacker).await.unwrap();

    let losing = harness.market.get_offer(losing.id).await.unwrap();
    assert_eq!(losing.status, OfferStatus::Deleted);
    assert!(!losing.is_active);
    assert!(harness
        .events_for_user(loser)
        .contains(&"offer_deleted".to_string()));
    assert!(harness
        .pushed_events_for(winner)
        .contains(&"offer_accepted".to_string()));

    let accepted = harness
        .market
        .list_offers(tack.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|offer| offer.status == OfferStatus::Accepted)
        .count();
    assert_eq!(accepted, 1);

    let late = harness
        .market
        .submit_offer(tack.id, UserId::new(), NewOffer::default())
        .await;
    assert!(matches!(late, Err(MarketplaceError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_accepting_again_is_idempotent_and_others_lose() {
    let harness = TestMarket::new();
    let tacker = harness.funded_user(500).await;
    let tack = harness.public_tack(tacker, 200).await;
    let first = harness.offer(&tack, UserId::new()).await;
    let second = harness.offer(&tack, UserId::new()).await;

    harness.market.accept_offer(first.id, tacker).await.unwrap();
    let repeat = harness.market.accept_offer(first.id, tacker).await.unwrap();
    assert_eq!(repeat.offer.id, first.id);
    assert_eq!(harness.market.balance(tacker).await.unwrap(), 300);

    let other = harness.market.accept_offer(second.id, tacker).await;
    assert!(matches!(other, Err(MarketplaceError::AcceptanceRaceLost { .. })));
}

#[tokio::test]
async fn test_insufficient_funds_leaves_state_untouched() {
    let harness = TestMarket::new();
    let tacker = harness.funded_user(100).await;
    let tack = harness.public_tack(tacker, 250).await;
    let offer = harness.offer(&tack, UserId::new()).await;

    let result = harness.market.accept_offer(offer.id, tacker).await;
    assert!(matches!(
        result,
        Err(MarketplaceError::InsufficientFunds {
            required: 250,
            available: 100,
            ..
        })
    ));

    let tack = harness.market.get_tack(tack.id).await.unwrap();
    assert_eq!(tack.status, TackStatus::Active);
    assert!(tack.runner_id.is_none());
    assert_eq!(harness.market.balance(tacker).await.unwrap(), 100);
    assert_eq!(
        harness.market.get_offer(offer.id).await.unwrap().status,
        OfferStatus::Created
    );
}

#[tokio::test]
async fn test_only_tacker_accepts() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 0).await;
    let runner = UserId::new();
    let offer = harness.offer(&tack, runner).await;

    let result = harness.market.accept_offer(offer.id, runner).await;
    assert!(matches!(result, Err(MarketplaceError::PermissionDenied { .. })));
}

#[tokio::test]
async fn test_tacker_hears_about_new_offers() {
    let harness = TestMarket::new();
    let tacker = UserId::new();
    let tack = harness.public_tack(tacker, 0).await;
    harness.offer(&tack, UserId::new()).await;

    assert!(harness
        .pushed_events_for(tacker)
        .contains(&"offer_created".to_string()));
    assert!(harness
        .notifier
        .events_for(&format!("tack_{}_offer", tack.id))
        .contains(&"offer_created".to_string()));
}
