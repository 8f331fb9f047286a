//! End-to-end admission scenarios against the in-memory store

use admission_gateway::rate_limit::{
    AdminAction, AdmissionError, AdmissionManager, CounterStore, FailurePolicy, ManualClock,
    MemoryStore, RateLimitConfig, Remaining,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

struct Harness {
    manager: AdmissionManager,
    store: MemoryStore,
    clock: Arc<ManualClock>,
}

fn harness(config: RateLimitConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 31, 23, 55, 0).unwrap(),
    ));
    let store = MemoryStore::with_clock(clock.clone());
    let manager = AdmissionManager::with_clock(config, Arc::new(store.clone()), clock.clone());
    Harness {
        manager,
        store,
        clock,
    }
}

fn config(requests_per_window: u64, cap: f64) -> RateLimitConfig {
    RateLimitConfig {
        requests_per_window,
        window_seconds: 300,
        monthly_cost_cap_usd: cap,
        admin_emails: vec!["admin@example.com".to_string()],
        failure_policy: FailurePolicy::FailClosed,
    }
}

#[tokio::test]
async fn test_request_cycle_within_limits() {
    let h = harness(config(60, 10.0));

    let ticket = h.manager.admit("user-1", "user@example.com", 0.05).await.unwrap();
    assert_eq!(ticket.rate.remaining, Remaining::Requests(59));
    assert!((ticket.quota.remaining_usd - 9.95).abs() < 1e-9);

    let settlement = h.manager.settle(&ticket, 0.04).await.unwrap();
    assert!((settlement.monthly_total.unwrap() - 0.04).abs() < 1e-9);

    let stats = h.manager.get_user_stats("user-1").await.unwrap();
    assert_eq!(stats.current_month, "2024-01");
    assert_eq!(stats.total_requests, 1);
    assert!((stats.cost_remaining_usd - 9.96).abs() < 1e-9);
}

#[tokio::test]
async fn test_window_rollover() {
    let h = harness(config(2, 10.0));
    h.manager.admit("user-1", "", 0.0).await.unwrap();
    h.manager.admit("user-1", "", 0.0).await.unwrap();

    let err = h.manager.admit("user-1", "", 0.0).await.unwrap_err();
    let retry = err.retry_after_secs().unwrap();
    assert!((1..=300).contains(&retry));
    assert!(err.is_retryable());

    h.clock.advance_secs(retry as i64);
    let ticket = h.manager.admit("user-1", "", 0.0).await.unwrap();
    assert_eq!(ticket.rate.remaining, Remaining::Requests(1));
}

#[tokio::test]
async fn test_month_rollover_restores_budget() {
    let h = harness(config(60, 1.0));
    h.manager.record_cost("user-1", 1.0).await.unwrap();

    let err = h.manager.admit("user-1", "", 0.01).await.unwrap_err();
    assert!(matches!(err, AdmissionError::QuotaExceeded { .. }));

    // 2024-01-31 23:55 -> 2024-02-01 00:00
    h.clock.advance_secs(300);
    let ticket = h.manager.admit("user-1", "", 0.01).await.unwrap();
    assert_eq!(ticket.quota.current_cost, 0.0);

    let stats = h.manager.get_user_stats("user-1").await.unwrap();
    assert_eq!(stats.current_month, "2024-02");
    assert_eq!(stats.monthly_cost_usd, 0.0);
    assert!(!stats.is_over_quota);
}

#[tokio::test]
async fn test_cap_is_inclusive() {
    let h = harness(config(60, 10.0));
    h.manager.record_cost("user-1", 9.99).await.unwrap();

    assert!(h.manager.check_cost_quota("user-1", "", 0.01).await.is_ok());
    let err = h
        .manager
        .check_cost_quota("user-1", "", 0.02)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Monthly cost quota exceeded: current $9.99, limit $10.00"
    );
}

#[tokio::test]
async fn test_admin_leaves_no_state() {
    let h = harness(config(1, 0.0));
    for _ in 0..5 {
        let ticket = h.manager.admit("boss", "ADMIN@example.com", 99.0).await.unwrap();
        h.manager.settle(&ticket, 99.0).await.unwrap();
    }
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_negative_estimate_rejected() {
    let h = harness(config(60, 10.0));
    let err = h.manager.admit("user-1", "", -1.0).await.unwrap_err();
    assert!(matches!(err, AdmissionError::InvalidCost(_)));
    assert_eq!(err.http_status(), 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_is_exact() {
    let h = harness(config(10, 1_000.0));
    let manager = Arc::new(h.manager);

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.admit("hot", "", 0.0).await })
        })
        .collect();

    let results = futures::future::join_all(tasks).await;
    let admitted = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(admitted, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settlements_sum() {
    let h = harness(config(1_000, 1_000.0));
    let manager = Arc::new(h.manager);

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                let ticket = manager.admit("user-1", "", 0.1).await?;
                manager.settle(&ticket, 0.01 * (i % 5) as f64).await
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    // 8 rounds of 0.00 + 0.01 + 0.02 + 0.03 + 0.04
    let stats = manager.get_user_stats("user-1").await.unwrap();
    assert!((stats.monthly_cost_usd - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn test_admin_reset_and_housekeeping() {
    let h = harness(config(60, 1.0));
    h.manager.record_cost("user-1", 1.0).await.unwrap();

    for _ in 0..3 {
        h.manager.check_rate_limit("user-1", "").await.unwrap();
        h.clock.advance_secs(300);
    }

    let denied = AdminAction::ResetQuota {
        caller_id: "user-1".to_string(),
    }
    .execute(&h.manager, "user@example.com")
    .await;
    assert!(matches!(denied, Err(AdmissionError::NotAuthorized(_))));

    // reset in the month the cost was recorded in
    h.clock.set(Utc.with_ymd_and_hms(2024, 1, 31, 23, 56, 0).unwrap());
    AdminAction::ResetQuota {
        caller_id: "user-1".to_string(),
    }
    .execute(&h.manager, "admin@example.com")
    .await
    .unwrap();
    let stats = h.manager.get_user_stats("user-1").await.unwrap();
    assert_eq!(stats.monthly_cost_usd, 0.0);

    h.clock.set(Utc.with_ymd_and_hms(2024, 2, 1, 0, 10, 0).unwrap());
    let removed = h.manager.cleanup_stale_windows("user-1").await.unwrap();
    assert!(removed >= 1);
    assert_eq!(h.manager.cleanup_stale_windows("user-1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_is_shared_between_managers() {
    let clock = Arc::new(ManualClock::at_secs(1_700_000_100));
    let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::with_clock(clock.clone()));
    let a = AdmissionManager::with_clock(config(3, 10.0), store.clone(), clock.clone());
    let b = AdmissionManager::with_clock(config(3, 10.0), store, clock);

    a.admit("user-1", "", 0.0).await.unwrap();
    b.admit("user-1", "", 0.0).await.unwrap();
    a.admit("user-1", "", 0.0).await.unwrap();
    assert!(b.admit("user-1", "", 0.0).await.is_err());
}
