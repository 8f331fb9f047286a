//! Request-Rate Limiter
//!
//! Fixed-window request counter per caller. Time is cut into windows of
//! `window_seconds`; each admission check atomically increments the counter
//! of the current window and compares the post-increment value against the
//! threshold.
//!
//! A fixed window lets a caller burst up to twice the threshold across a
//! window boundary. The monthly cost quota bounds aggregate abuse, so the
//! O(1) state per caller per window is worth that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::Clock;
use super::config::MAX_WINDOW_SECONDS;
use super::error::AdmissionError;
use super::keys;
use super::store::CounterStore;

/// Requests left in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remaining {
    /// Caller is not metered
    Unbounded,
    /// Requests still admissible in this window
    Requests(u64),
}

impl Remaining {
    /// Finite count, `None` when unbounded
    pub fn count(&self) -> Option<u64> {
        match self {
            Remaining::Unbounded => None,
            Remaining::Requests(n) => Some(*n),
        }
    }
}

/// Outcome of an admitted rate check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateDecision {
    /// Always true; denials are returned as errors
    pub allowed: bool,

    /// Caller is on the admin allowlist
    pub admin_bypass: bool,

    /// Admitted without metering because the store was unavailable
    pub degraded: bool,

    /// Requests left in this window
    pub remaining: Remaining,

    /// End of the current window
    pub reset_at: Option<DateTime<Utc>>,

    /// Post-increment count for this window
    pub current_count: u64,
}

impl RateDecision {
    /// Decision for an admin caller
    pub fn bypassed() -> Self {
        Self {
            allowed: true,
            admin_bypass: true,
            degraded: false,
            remaining: Remaining::Unbounded,
            reset_at: None,
            current_count: 0,
        }
    }

    /// Decision when the store failed and admission is fail-open
    pub fn degraded() -> Self {
        Self {
            degraded: true,
            admin_bypass: false,
            ..Self::bypassed()
        }
    }
}

/// Fixed-window request limiter over a shared counter store
#[derive(Debug, Clone)]
pub struct RequestRateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    requests_per_window: u64,
    window_seconds: u64,
}

impl RequestRateLimiter {
    /// Create a limiter admitting `requests_per_window` per `window_seconds`
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        requests_per_window: u64,
        window_seconds: u64,
    ) -> Self {
        Self {
            store,
            clock,
            requests_per_window,
            window_seconds: window_seconds.clamp(1, MAX_WINDOW_SECONDS),
        }
    }

    /// Start of the window containing `now` (Unix seconds)
    pub fn window_start(&self, now: i64) -> i64 {
        now - now.rem_euclid(self.window_seconds as i64)
    }

    /// Start of the window containing the current time
    pub fn current_window_start(&self) -> i64 {
        self.window_start(self.clock.now_secs())
    }

    /// Charge one request against the caller's current window
    ///
    /// The increment happens before the threshold comparison, so a denied
    /// request still counts against the window.
    pub async fn check(
        &self,
        caller_id: &str,
        is_admin: bool,
    ) -> Result<RateDecision, AdmissionError> {
        if is_admin {
            return Ok(RateDecision::bypassed());
        }

        let now = self.clock.now_secs();
        let window_start = self.window_start(now);
        let key = keys::window_key(caller_id, window_start);

        let count = self
            .store
            .increment_with_expiry(&key, 1, self.window_seconds)
            .await?;

        // Index registration only feeds housekeeping; a miss here is tolerable
        let index_key = keys::window_index_key(caller_id);
        if let Err(e) = self
            .store
            .add_to_set_with_expiry(&index_key, &key, self.window_seconds * 2)
            .await
        {
            warn!("Failed to index window {} for caller {}: {}", key, caller_id, e);
        }

        let count = count.max(0) as u64;
        let reset_at = window_start + self.window_seconds as i64;

        if count > self.requests_per_window {
            let retry_after_secs = (reset_at - now).max(1) as u64;
            debug!(
                caller_id,
                count,
                limit = self.requests_per_window,
                retry_after_secs,
                "Request rate limit exceeded"
            );
            return Err(AdmissionError::RateLimitExceeded {
                retry_after_secs,
                limit: self.requests_per_window,
                window_secs: self.window_seconds,
            });
        }

        debug!(caller_id, count, "Request admitted by rate limiter");

        Ok(RateDecision {
            allowed: true,
            admin_bypass: false,
            degraded: false,
            remaining: Remaining::Requests(self.requests_per_window - count),
            reset_at: DateTime::from_timestamp(reset_at, 0),
            current_count: count,
        })
    }

    /// Requests counted in the caller's current window, without charging
    pub async fn current_count(&self, caller_id: &str) -> Result<u64, AdmissionError> {
        let key = keys::window_key(caller_id, self.current_window_start());
        let count = self.store.get_i64(&key).await?.unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    /// Sum of the live window counters registered in the caller's index
    pub async fn indexed_requests(&self, caller_id: &str) -> Result<u64, AdmissionError> {
        let index_key = keys::window_index_key(caller_id);
        let members = self.store.members_of(&index_key).await?;

        let mut total = 0u64;
        for key in members {
            // expired windows linger in the index until housekeeping runs
            if let Some(count) = self.store.get_i64(&key).await? {
                total += count.max(0) as u64;
            }
        }
        Ok(total)
    }
}
