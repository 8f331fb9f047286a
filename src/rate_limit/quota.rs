//! Cost-Quota Tracker
//!
//! Monthly running cost per caller. The pre-flight check only reads the
//! current total; the total changes only when the realized cost is recorded
//! after the upstream call. Month buckets are labelled `YYYY-MM` in UTC and
//! expire at the start of the following month.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::clock::Clock;
use super::error::AdmissionError;
use super::keys;
use super::store::CounterStore;

/// Tolerance applied when comparing float totals against the cap
pub const COST_EPSILON: f64 = 1e-9;

/// Outcome of an admitted quota check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaDecision {
    /// Always true; denials are returned as errors
    pub allowed: bool,

    /// Caller is on the admin allowlist
    pub admin_bypass: bool,

    /// Admitted without metering because the store was unavailable
    pub degraded: bool,

    /// Cost recorded so far this month
    pub current_cost: f64,

    /// Current cost plus the checked amount
    pub projected_cost: f64,

    /// Budget left after the checked amount (`inf` for admins)
    pub remaining_usd: f64,

    /// Monthly cap
    pub monthly_limit: f64,
}

impl QuotaDecision {
    /// Decision for an admin caller
    pub fn bypassed(monthly_limit: f64) -> Self {
        Self {
            allowed: true,
            admin_bypass: true,
            degraded: false,
            current_cost: 0.0,
            projected_cost: 0.0,
            remaining_usd: f64::INFINITY,
            monthly_limit,
        }
    }

    /// Decision when the store failed and admission is fail-open
    pub fn degraded(monthly_limit: f64) -> Self {
        Self {
            admin_bypass: false,
            degraded: true,
            ..Self::bypassed(monthly_limit)
        }
    }
}

/// `YYYY-MM` label of the month containing `now`
pub fn month_label(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// 00:00:00 UTC on day 1 of the month after `now`
pub fn next_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub(crate) fn validate_cost(cost: f64) -> Result<f64, AdmissionError> {
    if cost.is_finite() && cost >= 0.0 {
        Ok(cost)
    } else {
        Err(AdmissionError::InvalidCost(cost))
    }
}

/// Monthly cost quota over a shared counter store
#[derive(Debug, Clone)]
pub struct CostQuotaTracker {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    monthly_cap_usd: f64,
}

impl CostQuotaTracker {
    /// Create a tracker capping each caller at `monthly_cap_usd` per month
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, monthly_cap_usd: f64) -> Self {
        Self {
            store,
            clock,
            monthly_cap_usd,
        }
    }

    /// Label of the current month
    pub fn current_month(&self) -> String {
        month_label(self.clock.now())
    }

    fn current_key(&self, caller_id: &str) -> String {
        keys::cost_key(caller_id, &self.current_month())
    }

    /// Cost recorded for the caller this month (0 when nothing recorded)
    pub async fn current_cost(&self, caller_id: &str) -> Result<f64, AdmissionError> {
        let cost = self
            .store
            .get_f64(&self.current_key(caller_id))
            .await?
            .unwrap_or(0.0);
        Ok(cost)
    }

    /// Check whether spending `additional_cost` more stays within the cap
    ///
    /// Read-only: the total only moves in [`CostQuotaTracker::record_cost`].
    /// The cap itself is admissible.
    pub async fn check_quota(
        &self,
        caller_id: &str,
        is_admin: bool,
        additional_cost: f64,
    ) -> Result<QuotaDecision, AdmissionError> {
        if is_admin {
            return Ok(QuotaDecision::bypassed(self.monthly_cap_usd));
        }
        let additional_cost = validate_cost(additional_cost)?;

        let current_cost = self.current_cost(caller_id).await?;
        let projected_cost = current_cost + additional_cost;

        if projected_cost > self.monthly_cap_usd + COST_EPSILON {
            debug!(
                caller_id,
                current_cost,
                additional_cost,
                limit = self.monthly_cap_usd,
                "Monthly cost quota exceeded"
            );
            return Err(AdmissionError::QuotaExceeded {
                current_cost,
                limit: self.monthly_cap_usd,
            });
        }

        Ok(QuotaDecision {
            allowed: true,
            admin_bypass: false,
            degraded: false,
            current_cost,
            projected_cost,
            remaining_usd: (self.monthly_cap_usd - projected_cost).max(0.0),
            monthly_limit: self.monthly_cap_usd,
        })
    }

    /// Add a realized cost to the caller's monthly total
    ///
    /// Non-positive costs are a no-op and return the unchanged total. The
    /// month key expires at the start of the next month.
    pub async fn record_cost(&self, caller_id: &str, actual_cost: f64) -> Result<f64, AdmissionError> {
        if actual_cost.is_nan() || actual_cost.is_infinite() {
            return Err(AdmissionError::InvalidCost(actual_cost));
        }
        if actual_cost <= 0.0 {
            return self.current_cost(caller_id).await;
        }

        let now = self.clock.now();
        let key = keys::cost_key(caller_id, &month_label(now));
        let ttl_secs = (next_month_start(now) - now).num_seconds().max(1) as u64;

        let total = self
            .store
            .increment_float_with_expiry(&key, actual_cost, ttl_secs)
            .await?;

        info!(
            "Recorded cost ${:.4} for caller {}. Total: ${:.4}",
            actual_cost, caller_id, total
        );
        Ok(total)
    }

    /// Zero the caller's total for the current month
    pub async fn reset(&self, caller_id: &str) -> Result<(), AdmissionError> {
        self.store.delete(&self.current_key(caller_id)).await?;
        info!("Reset cost quota for caller {}", caller_id);
        Ok(())
    }
}
