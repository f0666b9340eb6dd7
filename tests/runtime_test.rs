//! End-to-end runs of the background runtime: real timers, the worker pool and broadcast
//! fan-out.

use std::sync::Arc;
use std::time::Duration;

use tack_market::config::{ConfigManager, MarketplaceConfig};
use tack_market::models::{NewTack, OfferStatus, TackStatus, TackType, UserId};
use tack_market::services::NewOffer;
use tack_market::MarketplaceRuntime;

fn runtime_config() -> Arc<ConfigManager> {
    let mut config = MarketplaceConfig::default();
    config.scheduler.workers = 2;
    config.scheduler.retry_backoff_ms = 10;
    Arc::new(ConfigManager::from_config(config, "test").expect("config should be valid"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offer_expires_through_scheduler() {
    let runtime = MarketplaceRuntime::in_memory(runtime_config()).unwrap();
    let market = runtime.marketplace().clone();

    let tack = market
        .create_tack(UserId::new(), NewTack::new("Return library books", 0, TackType::Public))
        .await
        .unwrap();
    let offer = market
        .submit_offer(
            tack.id,
            UserId::new(),
            NewOffer {
                price: None,
                lifetime_seconds: Some(1),
            },
        )
        .await
        .unwrap();
    assert_eq!(runtime.status().pending_jobs, 1);

    let expired = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let current = market.get_offer(offer.id).await.unwrap();
            if current.status == OfferStatus::Expired {
                break current;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("offer should expire within the timeout");

    assert!(!expired.is_active);
    assert_eq!(
        market.get_tack(tack.id).await.unwrap().status,
        TackStatus::Created
    );
    assert!(runtime.status().jobs_succeeded >= 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_subscribers_see_offer_events() {
    let runtime = MarketplaceRuntime::in_memory(runtime_config()).unwrap();
    let market = runtime.marketplace().clone();
    let mut events = runtime.notifier().subscribe();

    let tack = market
        .create_tack(UserId::new(), NewTack::new("Fix a bike", 0, TackType::Public))
        .await
        .unwrap();
    market
        .submit_offer(tack.id, UserId::new(), NewOffer::default())
        .await
        .unwrap();

    let offer_topic = format!("tack_{}_offer", tack.id);
    let mut seen = Vec::new();
    while let Ok(published) = events.try_recv() {
        if published.topic == offer_topic {
            seen.push(published.event);
        }
    }
    assert!(seen.contains(&"tack_created".to_string()));
    assert!(seen.contains(&"offer_created".to_string()));
    assert!(seen.contains(&"tack_active".to_string()));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_runtime() {
    let runtime = MarketplaceRuntime::in_memory(runtime_config()).unwrap();
    assert!(runtime.is_running());
    assert_eq!(runtime.status().environment, "test");

    tokio::time::timeout(Duration::from_secs(5), runtime.shutdown())
        .await
        .expect("shutdown should finish promptly");
}
