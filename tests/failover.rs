//! End-to-end failover and health eviction tests.

use balancer::load_balancer::Strategy;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;

#[tokio::test]
async fn test_round_robin_rotation() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let c = common::start_mock_backend("c").await;
    let lb = common::start_balancer(common::config_for(&[a, b, c])).await;
    let client = common::client();

    let mut seen = Vec::new();
    for _ in 0..6 {
        let res = client.get(lb.url("/")).send().await.expect("Balancer unreachable");
        assert_eq!(res.status(), 200);
        seen.push(res.text().await.unwrap());
    }
    assert_eq!(seen, ["b", "c", "a", "b", "c", "a"]);
}

#[tokio::test]
async fn test_least_connection_prefers_first_when_idle() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let mut config = common::config_for(&[a, b]);
    config.strategy = Strategy::LeastConnection;
    let lb = common::start_balancer(config).await;
    let client = common::client();

    for _ in 0..4 {
        let res = client.get(lb.url("/")).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), "a");
    }
    assert!(lb.pool.backends().iter().all(|b| b.active_connections() == 0));
}

#[tokio::test]
async fn test_retry_on_failure() {
    let live = common::start_mock_backend("Success").await;
    let down = common::closed_addr();
    // Rotation starts at the second entry, so the dead address is tried first.
    let lb = common::start_balancer(common::config_for(&[live, down])).await;

    let res = common::client().get(lb.url("/orders")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "Success");

    let backends = lb.pool.backends();
    assert!(backends[0].is_alive());
    assert!(!backends[1].is_alive(), "failed backend should be evicted");
}

#[tokio::test]
async fn test_all_backends_down() {
    let lb = common::start_balancer(common::config_for(&[common::closed_addr(), common::closed_addr()])).await;

    let res = common::client().get(lb.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(res.text().await.unwrap(), "service unavailable");
    assert_eq!(lb.pool.alive_count(), 0);

    // Nothing left to pick: answered without contacting anyone.
    let res = common::client().get(lb.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
}

#[tokio::test]
async fn test_at_most_two_backends_per_request() {
    let addrs = [common::closed_addr(), common::closed_addr(), common::closed_addr()];
    let lb = common::start_balancer(common::config_for(&addrs)).await;

    let res = common::client().get(lb.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(lb.pool.alive_count(), 1);
}

#[tokio::test]
async fn test_upstream_errors_are_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let cc = calls.clone();
    let failing = common::start_programmable_backend(move || {
        let cc = cc.clone();
        async move {
            cc.fetch_add(1, Ordering::SeqCst);
            (502, "Bad Gateway".into())
        }
    })
    .await;
    let lb = common::start_balancer(common::config_for(&[failing])).await;

    let res = common::client().get(lb.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(lb.pool.alive_count(), 1);
}

#[tokio::test]
async fn test_health_check_eviction_and_recovery() {
    let b1 = common::start_mock_backend("b1").await;

    let b2_healthy = Arc::new(AtomicBool::new(true));
    let b2h = b2_healthy.clone();
    let b2 = common::start_programmable_backend(move || {
        let b2h = b2h.clone();
        async move {
            if b2h.load(Ordering::SeqCst) {
                (200, "b2".into())
            } else {
                (500, "dead".into())
            }
        }
    })
    .await;

    let mut config = common::config_for(&[b1, b2]);
    config.health_check.enabled = true;
    config.health_check.interval_secs = 1;
    config.health_check.timeout_secs = 1;
    let lb = common::start_balancer(config).await;
    let client = common::client();

    b2_healthy.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(lb.pool.alive_count(), 1);

    for _ in 0..4 {
        let res = client.get(lb.url("/")).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), "b1", "evicted backend should get no traffic");
    }

    b2_healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(lb.pool.alive_count(), 2);

    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(client.get(lb.url("/")).send().await.unwrap().text().await.unwrap());
    }
    seen.sort();
    assert_eq!(seen, ["b1", "b2"]);
}
