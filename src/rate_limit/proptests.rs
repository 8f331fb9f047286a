//! Property-Based Tests for Admission Control
//!
//! # Test Strategies
//!
//! - **Window arithmetic**: every instant falls in exactly one aligned window
//! - **Rate limiting**: a burst admits exactly `min(n, limit)` requests and
//!   `remaining` strictly decreases
//! - **Cost accounting**: concurrent recordings sum without loss
//! - **Quota check**: admits exactly when the projected cost fits the cap
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib rate_limit::proptests
//! ```

use chrono::{DateTime, Datelike, Utc};
use proptest::prelude::*;
use std::sync::Arc;

use crate::rate_limit::clock::ManualClock;
use crate::rate_limit::error::AdmissionError;
use crate::rate_limit::keys;
use crate::rate_limit::limiter::RequestRateLimiter;
use crate::rate_limit::quota::{month_label, next_month_start, CostQuotaTracker, COST_EPSILON};
use crate::rate_limit::store::MemoryStore;

// 2001-09-09 .. 2100-01-01
fn arb_timestamp() -> impl Strategy<Value = i64> {
    1_000_000_000i64..4_102_444_800i64
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_window_contains_now(now in arb_timestamp(), window in 1u64..86_400) {
        let clock = Arc::new(ManualClock::at_secs(now));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = RequestRateLimiter::new(store, clock, 1, window);

        let start = limiter.window_start(now);
        prop_assert_eq!(start.rem_euclid(window as i64), 0);
        prop_assert!(start <= now);
        prop_assert!(now < start + window as i64);
    }

    #[test]
    fn prop_window_key_start_recoverable(caller in "[a-zA-Z0-9:@._-]{1,32}", start in arb_timestamp()) {
        let key = keys::window_key(&caller, start);
        prop_assert_eq!(keys::parse_window_start(&key), Some(start));
    }

    #[test]
    fn prop_month_rollover(now in arb_timestamp()) {
        let now = DateTime::<Utc>::from_timestamp(now, 0).unwrap();
        let next = next_month_start(now);
        prop_assert!(next > now);
        prop_assert_eq!(next.day(), 1);
        prop_assert_ne!(month_label(next), month_label(now));
        prop_assert_eq!(month_label(next - chrono::Duration::seconds(1)), month_label(now));
    }

    #[test]
    fn prop_burst_admits_exactly_limit(limit in 1u64..20, burst in 1usize..40) {
        let rt = runtime();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::at_secs(1_700_000_100));
            let store = Arc::new(MemoryStore::with_clock(clock.clone()));
            let limiter = RequestRateLimiter::new(store, clock, limit, 300);

            let mut admitted = 0u64;
            let mut last_remaining = u64::MAX;
            for _ in 0..burst {
                match limiter.check("caller", false).await {
                    Ok(decision) => {
                        let remaining = decision.remaining.count().unwrap();
                        prop_assert!(remaining < last_remaining);
                        last_remaining = remaining;
                        admitted += 1;
                    }
                    Err(AdmissionError::RateLimitExceeded { .. }) => {}
                    Err(e) => prop_assert!(false, "unexpected error: {}", e),
                }
            }
            prop_assert_eq!(admitted, limit.min(burst as u64));
            Ok(())
        })?;
    }

    #[test]
    fn prop_concurrent_costs_sum(costs in prop::collection::vec(0.0f64..5.0, 1..40)) {
        let rt = runtime();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::at_secs(1_700_000_100));
            let store = Arc::new(MemoryStore::with_clock(clock.clone()));
            let tracker = CostQuotaTracker::new(store, clock, 1_000.0);

            let tasks: Vec<_> = costs
                .iter()
                .map(|&cost| {
                    let tracker = tracker.clone();
                    tokio::spawn(async move { tracker.record_cost("caller", cost).await })
                })
                .collect();
            for result in futures::future::join_all(tasks).await {
                prop_assert!(result.unwrap().is_ok());
            }

            let expected: f64 = costs.iter().sum();
            let total = tracker.current_cost("caller").await.unwrap();
            prop_assert!((total - expected).abs() < 1e-9, "total {} != {}", total, expected);
            Ok(())
        })?;
    }

    #[test]
    fn prop_quota_admits_iff_fits(recorded in 0.0f64..20.0, additional in 0.0f64..20.0) {
        let rt = runtime();
        rt.block_on(async {
            let cap = 10.0;
            let clock = Arc::new(ManualClock::at_secs(1_700_000_100));
            let store = Arc::new(MemoryStore::with_clock(clock.clone()));
            let tracker = CostQuotaTracker::new(store, clock, cap);
            tracker.record_cost("caller", recorded).await.unwrap();

            let fits = recorded + additional <= cap + COST_EPSILON;
            match tracker.check_quota("caller", false, additional).await {
                Ok(decision) => {
                    prop_assert!(fits);
                    prop_assert!(decision.remaining_usd >= 0.0);
                }
                Err(AdmissionError::QuotaExceeded { .. }) => prop_assert!(!fits),
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }
            Ok(())
        })?;
    }
}
