//! Concurrency and retry behaviour of the pool and delivery service
//!
//! Driven by the scripted in-memory relay so every open, probe and send can
//! be counted exactly.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use courier_common::config::{DeliveryConfig, RelayConfig};
use courier_delivery::{ConnectionPool, DeliveryService, FailureCause, relay::MockRelay};
use courier_metrics::DeliveryMetrics;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

async fn pool_with(relay: &MockRelay, size: usize) -> ConnectionPool {
    ConnectionPool::builder(RelayConfig::default())
        .size(size)
        .relay(Arc::new(relay.clone()))
        .build()
        .await
        .expect("pool should build")
}

fn budget(max_attempts: u32) -> DeliveryConfig {
    DeliveryConfig {
        max_attempts,
        attempt_timeout_secs: None,
    }
}

fn assert_conserved(pool: &ConnectionPool) {
    let status = pool.status();
    assert_eq!(
        status.idle + status.checked_out + status.parked,
        status.size,
        "connections leaked or duplicated: {status:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_connection_is_held_twice() {
    let relay = MockRelay::new();
    let pool = pool_with(&relay, 3).await;
    let held = Arc::new(Mutex::new(HashSet::new()));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..24 {
        let pool = pool.clone();
        let held = Arc::clone(&held);
        let peak = Arc::clone(&peak);
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                let conn = pool.acquire().await.unwrap();
                {
                    let mut held = held.lock();
                    assert!(held.insert(conn.id()), "connection {} handed out twice", conn.id());
                    peak.fetch_max(held.len(), Ordering::Relaxed);
                }
                tokio::task::yield_now().await;
                held.lock().remove(&conn.id());
                pool.release(conn).await;
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert!(peak.load(Ordering::Relaxed) <= 3);
    assert_eq!(pool.status().idle, 3);
    assert_conserved(&pool);
}

#[tokio::test]
async fn test_conservation_after_failed_and_cancelled_deliveries() {
    let relay = MockRelay::new();
    let pool = pool_with(&relay, 2).await;
    let service = DeliveryService::new(pool.clone(), budget(3));

    relay.fail_all_sends();
    let failed = service.deliver("a@example.org", "s", "b").await;
    assert!(failed.is_err());
    assert_conserved(&pool);

    // Cancel a delivery in the middle of a send
    let relay = MockRelay::new();
    relay.set_send_delay(Duration::from_secs(60));
    let pool = pool_with(&relay, 2).await;
    let service = DeliveryService::new(pool.clone(), budget(3));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        service.deliver("a@example.org", "s", "b"),
    )
    .await;
    assert!(cancelled.is_err(), "delivery should still be in flight");

    let status = pool.status();
    assert_eq!(status.idle, 2);
    assert_eq!(status.checked_out, 0);
    assert_conserved(&pool);

    // Cancel a caller waiting in acquire
    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    let waiting = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
    assert!(waiting.is_err());
    pool.release(first).await;
    pool.release(second).await;
    assert_eq!(pool.status().idle, 2);
    assert_conserved(&pool);
}

#[tokio::test]
async fn test_bounded_retry_releases_once() {
    let relay = MockRelay::new();
    let metrics = Arc::new(DeliveryMetrics::new().unwrap());
    let pool = ConnectionPool::builder(RelayConfig::default())
        .size(1)
        .relay(Arc::new(relay.clone()))
        .metrics(Arc::clone(&metrics))
        .build()
        .await
        .unwrap();
    let service = DeliveryService::new(pool.clone(), budget(4));
    relay.fail_all_sends();

    let failed = service.deliver("a@example.org", "s", "b").await.unwrap_err();

    assert_eq!(failed.attempts, 4);
    assert_eq!(relay.sends(), 4);
    assert_eq!(metrics.send_observations(), 4);
    assert_eq!(metrics.failed(), 1);
    assert_eq!(metrics.checked_out(), 0, "released exactly once");
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test]
async fn test_idempotent_teardown() {
    let relay = MockRelay::new();
    let pool = pool_with(&relay, 2).await;

    let mut conn = pool.acquire().await.unwrap();
    conn.close().await;
    conn.close().await;
    pool.release(conn).await;

    pool.quit().await;
    pool.quit().await;
    pool.shutdown().await;

    let status = pool.status();
    assert!(status.closed);
    assert_eq!(status.parked, 2);
    assert_conserved(&pool);
}

#[tokio::test]
async fn test_release_repairs_with_exactly_one_reconnect() {
    let relay = MockRelay::new();
    let pool = pool_with(&relay, 1).await;
    assert_eq!(relay.opens(), 1);

    // Session dies while checked out; the reconnect succeeds
    let conn = pool.acquire().await.unwrap();
    relay.drop_sessions();
    pool.release(conn).await;
    assert_eq!(relay.opens(), 2);

    // Probe fails and the relay is gone; exactly one reconnect is attempted
    let conn = pool.acquire().await.unwrap();
    relay.fail_next_probes(1);
    relay.set_reachable(false);
    let probes_before = relay.probes();
    pool.release(conn).await;

    assert_eq!(relay.probes() - probes_before, 1, "reconnect must not re-probe");
    assert_eq!(relay.failed_opens(), 1);
    assert_eq!(pool.status().idle, 1, "returned even though reconnect failed");

    let conn = pool.acquire().await.unwrap();
    assert!(!conn.is_connected());
    pool.release(conn).await;
}

#[tokio::test]
async fn scenario_third_caller_waits_for_a_release() {
    let relay = MockRelay::new();
    relay.set_send_delay(Duration::from_millis(100));
    let pool = pool_with(&relay, 2).await;
    let service = DeliveryService::new(pool.clone(), budget(3));

    let deliveries: Vec<_> = (0..3)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .deliver(&format!("user{i}@example.org"), "s", "b")
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let status = pool.status();
    assert_eq!(status.checked_out, 2, "only two callers can hold a connection");
    assert_eq!(relay.sends(), 2, "the third caller is still waiting in acquire");

    for delivery in deliveries {
        delivery.await.unwrap().expect("every delivery completes");
    }

    assert_eq!(relay.delivered().len(), 3);
    assert_eq!(pool.status().idle, 2);
    assert_eq!(pool.size(), 2);
}

#[tokio::test]
async fn scenario_two_failures_then_success() {
    let relay = MockRelay::new();
    let pool = pool_with(&relay, 1).await;
    let service = DeliveryService::new(pool.clone(), budget(3));
    let opens_at_start = relay.opens();
    relay.fail_next_sends(2);

    let receipt = service
        .deliver("a@example.org", "s", "b")
        .await
        .expect("third attempt succeeds");

    assert_eq!(receipt.attempts, 3);
    assert_eq!(relay.sends(), 3);
    assert_eq!(relay.opens() - opens_at_start, 2, "one reconnect between each attempt");
}

#[tokio::test]
async fn scenario_every_attempt_fails() {
    let relay = MockRelay::new();
    let pool = pool_with(&relay, 1).await;
    let service = DeliveryService::new(pool.clone(), budget(3));
    relay.fail_all_sends();

    let failed = service.deliver("a@example.org", "s", "b").await.unwrap_err();

    assert_eq!(failed.attempts, 3);
    assert!(matches!(failed.cause, FailureCause::Connection(_)));
    assert_eq!(relay.sends(), 3);

    let status = pool.status();
    assert_eq!(status.idle, 1, "connection is back in the pool");
    assert_eq!(status.checked_out, 0);
}

#[tokio::test]
async fn scenario_pool_built_while_relay_unreachable_self_heals() {
    let relay = MockRelay::new();
    relay.set_reachable(false);

    let pool = pool_with(&relay, 2).await;
    assert_eq!(relay.opens(), 0);
    assert_eq!(relay.failed_opens(), 2);
    assert_eq!(pool.status().idle, 2);

    relay.set_reachable(true);
    let service = DeliveryService::new(pool.clone(), budget(3));
    let receipt = service
        .deliver("a@example.org", "s", "b")
        .await
        .expect("first use heals the connection");

    assert_eq!(receipt.attempts, 2);
    assert_eq!(relay.opens(), 1);
    assert_eq!(relay.delivered().len(), 1);
}
