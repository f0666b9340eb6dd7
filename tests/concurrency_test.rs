//! Racing commands against one tack.

mod common;

use std::time::Duration;

use futures::future::join_all;

use common::TestMarket;
use tack_market::ledger::LedgerReason;
use tack_market::models::{GroupId, OfferStatus, TackStatus, UserId};
use tack_market::services::NewOffer;
use tack_market::MarketplaceError;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accepts_have_exactly_one_winner() {
    for _ in 0..25 {
        let harness = TestMarket::new();
        let tacker = harness.funded_user(1_000).await;
        let tack = harness.public_tack(tacker, 400).await;
        let first = harness.offer(&tack, UserId::new()).await.id;
        let second = harness.offer(&tack, UserId::new()).await.id;

        let market_a = harness.market.clone();
        let market_b = harness.market.clone();
        let a = tokio::spawn(async move { market_a.accept_offer(first, tacker).await });
        let b = tokio::spawn(async move { market_b.accept_offer(second, tacker).await });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        let losers = results
            .iter()
            .filter(|r| matches!(r, Err(MarketplaceError::AcceptanceRaceLost { .. })))
            .count();
        assert_eq!(winners.len(), 1, "results: {results:?}");
        assert_eq!(losers, 1, "results: {results:?}");

        let tack = harness.market.get_tack(tack.id).await.unwrap();
        assert_eq!(tack.status, TackStatus::Accepted);
        assert_eq!(tack.accepted_offer_id, Some(winners[0].offer.id));

        let accepted = harness
            .market
            .list_offers(tack.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|offer| offer.status == OfferStatus::Accepted)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(harness.market.balance(tacker).await.unwrap(), 600);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_all_land() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 100).await;

    let submissions = (0..8).map(|_| {
        let market = harness.market.clone();
        let tack_id = tack.id;
        tokio::spawn(async move {
            market
                .submit_offer(tack_id, UserId::new(), NewOffer::default())
                .await
        })
    });
    for result in join_all(submissions).await {
        result.unwrap().unwrap();
    }

    let offers = harness.market.list_offers(tack.id).await.unwrap();
    assert_eq!(offers.len(), 8);
    assert_eq!(
        harness.market.get_tack(tack.id).await.unwrap().status,
        TackStatus::Active
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_group_members_bidding_at_once_all_land() {
    let harness = TestMarket::with_membership_latency(Duration::from_millis(2));
    let group = GroupId::new();
    let tack = harness.group_tack(UserId::new(), group, 100).await;
    let runners: Vec<UserId> = (0..8).map(|_| UserId::new()).collect();
    for runner in &runners {
        harness.membership.add_member(group, *runner);
    }

    let submissions = runners.iter().map(|runner| {
        let market = harness.market.clone();
        let (tack_id, runner) = (tack.id, *runner);
        tokio::spawn(async move {
            market
                .submit_offer(tack_id, runner, NewOffer::default())
                .await
        })
    });
    let failures: Vec<String> = join_all(submissions)
        .await
        .into_iter()
        .filter_map(|joined| joined.unwrap().err())
        .map(|err| err.code().to_string())
        .collect();
    assert!(failures.is_empty(), "failed submissions: {failures:?}");

    let offers = harness.market.list_offers(tack.id).await.unwrap();
    assert_eq!(offers.iter().filter(|offer| offer.is_open()).count(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submissions_racing_acceptance_leave_no_open_offer() {
    for _ in 0..25 {
        let harness = TestMarket::new();
        let tacker = harness.funded_user(100).await;
        let tack = harness.public_tack(tacker, 100).await;
        let chosen = harness.offer(&tack, UserId::new()).await.id;

        let accepting = harness.market.clone();
        let accept = tokio::spawn(async move { accepting.accept_offer(chosen, tacker).await });
        let submissions = (0..4).map(|_| {
            let market = harness.market.clone();
            let tack_id = tack.id;
            tokio::spawn(async move {
                market
                    .submit_offer(tack_id, UserId::new(), NewOffer::default())
                    .await
            })
        });
        let submitted = join_all(submissions).await;
        accept.await.unwrap().unwrap();

        for result in submitted {
            if let Err(err) = result.unwrap() {
                assert!(
                    matches!(err, MarketplaceError::InvalidTransition { .. }),
                    "unexpected error {err:?}"
                );
            }
        }
        let offers = harness.market.list_offers(tack.id).await.unwrap();
        assert!(offers.iter().all(|offer| !offer.is_open()), "{offers:?}");
        assert_eq!(
            offers
                .iter()
                .filter(|offer| offer.status == OfferStatus::Accepted)
                .count(),
            1
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_runner_racing_submits_keeps_one_active_offer() {
    let harness = TestMarket::new();
    let tack = harness.public_tack(UserId::new(), 100).await;
    let runner = UserId::new();

    let submissions = (0..4).map(|_| {
        let market = harness.market.clone();
        let tack_id = tack.id;
        tokio::spawn(async move {
            market
                .submit_offer(tack_id, runner, NewOffer::default())
                .await
        })
    });
    let results: Vec<_> = join_all(submissions)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|err| matches!(err, MarketplaceError::DuplicateOffer { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cancels_refund_once() {
    let harness = TestMarket::new();
    let accepted = harness.accepted_tack(500, 500).await;

    let cancels = (0..4).map(|_| {
        let market = harness.market.clone();
        let tack_id = accepted.tack.id;
        let tacker = accepted.tacker;
        tokio::spawn(async move { market.cancel_tack(tack_id, tacker).await })
    });
    for result in join_all(cancels).await {
        assert!(result.unwrap().unwrap().is_canceled);
    }

    assert_eq!(harness.market.balance(accepted.tacker).await.unwrap(), 500);
    let refunds = harness
        .market
        .ledger_entries(accepted.tacker)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.reason == LedgerReason::EscrowRefund)
        .count();
    assert_eq!(refunds, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_withdraw_racing_accept_never_leaves_accepted_offer_deleted() {
    for _ in 0..25 {
        let harness = TestMarket::new();
        let tacker = harness.funded_user(100).await;
        let runner = UserId::new();
        let tack = harness.public_tack(tacker, 100).await;
        let offer_id = harness.offer(&tack, runner).await.id;

        let accepting = harness.market.clone();
        let withdrawing = harness.market.clone();
        let accept = tokio::spawn(async move { accepting.accept_offer(offer_id, tacker).await });
        let withdraw =
            tokio::spawn(async move { withdrawing.withdraw_offer(offer_id, runner).await });
        let (accept, withdraw) = (accept.await.unwrap(), withdraw.await.unwrap());

        let tack = harness.market.get_tack(tack.id).await.unwrap();
        let offer = harness.market.get_offer(offer_id).await.unwrap();
        match offer.status {
            OfferStatus::Accepted => {
                assert!(accept.is_ok());
                assert!(matches!(
                    withdraw,
                    Err(MarketplaceError::CannotWithdrawAccepted { .. })
                ));
                assert_eq!(tack.accepted_offer_id, Some(offer.id));
                assert_eq!(harness.market.balance(tacker).await.unwrap(), 0);
            }
            OfferStatus::Deleted => {
                assert!(withdraw.is_ok());
                assert!(accept.is_err());
                assert!(tack.accepted_offer_id.is_none());
                assert_eq!(harness.market.balance(tacker).await.unwrap(), 100);
            }
            other => panic!("unexpected offer status {other}"),
        }
    }
}
