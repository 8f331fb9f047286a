//! Admission Manager
//!
//! Single entry point for admission control. Each inbound request goes
//! through admin bypass, then the request-rate limiter, then the cost-quota
//! tracker with an estimated cost. Once the upstream work finishes the
//! realized cost is recorded against the caller's monthly total.
//!
//! The estimate never mutates the ledger, so a request whose actual cost
//! exceeds its estimate can push a caller slightly past the cap. The next
//! pre-flight check then denies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::config::{FailurePolicy, RateLimitConfig};
use super::dashboard::{ConfigSummary, HealthReport, StoreStatus, UserStats};
use super::error::AdmissionError;
use super::housekeeping::WindowHousekeeper;
use super::limiter::{RateDecision, RequestRateLimiter};
use super::quota::{validate_cost, CostQuotaTracker, QuotaDecision, COST_EPSILON};
use super::store::CounterStore;
use crate::metrics;

/// Proof that a request passed both admission checks
///
/// Hand it back to [`AdmissionManager::settle`] once the realized cost is
/// known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionTicket {
    /// Correlation id for logs
    pub id: Uuid,

    pub caller_id: String,

    /// Caller is on the admin allowlist; settling records nothing
    pub admin_bypass: bool,

    /// Cost used for the pre-flight quota check
    pub estimated_cost: f64,

    pub admitted_at: DateTime<Utc>,

    pub rate: RateDecision,

    pub quota: QuotaDecision,
}

/// Result of settling a ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub ticket_id: Uuid,

    /// Whether the cost was written to the caller's monthly total
    pub recorded: bool,

    pub estimated_cost: f64,

    pub actual_cost: f64,

    /// Monthly total after recording (`None` for admins)
    pub monthly_total: Option<f64>,
}

impl Settlement {
    /// Actual minus estimated cost
    pub fn drift(&self) -> f64 {
        self.actual_cost - self.estimated_cost
    }
}

/// Admission manager
#[derive(Debug, Clone)]
pub struct AdmissionManager {
    /// Configuration
    config: RateLimitConfig,

    /// Admin emails (lowercase), fixed at construction
    admins: Arc<HashSet<String>>,

    /// Shared counter store
    store: Arc<dyn CounterStore>,

    clock: Arc<dyn Clock>,

    limiter: RequestRateLimiter,

    tracker: CostQuotaTracker,

    housekeeper: WindowHousekeeper,
}

impl AdmissionManager {
    /// Create a new admission manager on the system clock
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Create a new admission manager with an explicit clock
    pub fn with_clock(
        config: RateLimitConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RequestRateLimiter::new(
            store.clone(),
            clock.clone(),
            config.requests_per_window,
            config.window_seconds,
        );
        let tracker =
            CostQuotaTracker::new(store.clone(), clock.clone(), config.monthly_cost_cap_usd);
        let housekeeper = WindowHousekeeper::new(store.clone(), clock.clone(), config.window_seconds);

        Self {
            admins: Arc::new(config.admin_allowlist()),
            config,
            store,
            clock,
            limiter,
            tracker,
            housekeeper,
        }
    }

    /// Whether `email` is on the admin allowlist
    pub fn is_admin(&self, email: &str) -> bool {
        self.admins.contains(&email.trim().to_lowercase())
    }

    /// Charge one request against the caller's rate window
    pub async fn check_rate_limit(
        &self,
        caller_id: &str,
        email: &str,
    ) -> Result<RateDecision, AdmissionError> {
        let timer = metrics::ADMISSION_CHECK_DURATION_SECONDS
            .with_label_values(&["rate"])
            .start_timer();
        let result = self.limiter.check(caller_id, self.is_admin(email)).await;
        drop(timer);

        match result {
            Ok(decision) => {
                metrics::record_decision("rate", outcome_of(decision.admin_bypass));
                Ok(decision)
            }
            Err(AdmissionError::StoreUnavailable(reason)) => self
                .on_store_failure("rate", caller_id, reason)
                .map(|()| RateDecision::degraded()),
            Err(e) => Err(self.on_denied("rate", caller_id, e)),
        }
    }

    /// Check the caller can afford `estimated_cost` this month
    pub async fn check_cost_quota(
        &self,
        caller_id: &str,
        email: &str,
        estimated_cost: f64,
    ) -> Result<QuotaDecision, AdmissionError> {
        let timer = metrics::ADMISSION_CHECK_DURATION_SECONDS
            .with_label_values(&["quota"])
            .start_timer();
        let result = self
            .tracker
            .check_quota(caller_id, self.is_admin(email), estimated_cost)
            .await;
        drop(timer);

        match result {
            Ok(decision) => {
                metrics::record_decision("quota", outcome_of(decision.admin_bypass));
                Ok(decision)
            }
            Err(AdmissionError::StoreUnavailable(reason)) => self
                .on_store_failure("quota", caller_id, reason)
                .map(|()| QuotaDecision::degraded(self.config.monthly_cost_cap_usd)),
            Err(e) => Err(self.on_denied("quota", caller_id, e)),
        }
    }

    /// Run both admission checks for one request
    ///
    /// The rate check charges the window even when the quota check then
    /// denies. A malformed estimate is rejected before anything is charged.
    /// No upstream work may start unless this returns a ticket.
    pub async fn admit(
        &self,
        caller_id: &str,
        email: &str,
        estimated_cost: f64,
    ) -> Result<AdmissionTicket, AdmissionError> {
        if !self.is_admin(email) {
            validate_cost(estimated_cost).map_err(|e| self.on_denied("quota", caller_id, e))?;
        }

        let rate = self.check_rate_limit(caller_id, email).await?;
        let quota = self
            .check_cost_quota(caller_id, email, estimated_cost)
            .await?;

        let ticket = AdmissionTicket {
            id: Uuid::new_v4(),
            caller_id: caller_id.to_string(),
            admin_bypass: rate.admin_bypass,
            estimated_cost,
            admitted_at: self.clock.now(),
            rate,
            quota,
        };
        debug!(ticket = %ticket.id, caller_id, estimated_cost, "Request admitted");
        Ok(ticket)
    }

    /// Record the realized cost of an admitted request
    ///
    /// Pass 0 when the upstream call failed before any billable usage.
    /// Admin tickets record nothing.
    pub async fn settle(
        &self,
        ticket: &AdmissionTicket,
        actual_cost: f64,
    ) -> Result<Settlement, AdmissionError> {
        if ticket.admin_bypass {
            return Ok(Settlement {
                ticket_id: ticket.id,
                recorded: false,
                estimated_cost: ticket.estimated_cost,
                actual_cost,
                monthly_total: None,
            });
        }

        let monthly_total = self.record_cost(&ticket.caller_id, actual_cost).await?;
        let settlement = Settlement {
            ticket_id: ticket.id,
            recorded: actual_cost > 0.0,
            estimated_cost: ticket.estimated_cost,
            actual_cost,
            monthly_total: Some(monthly_total),
        };

        let drift = settlement.drift();
        if drift.abs() > COST_EPSILON {
            metrics::COST_ESTIMATE_DRIFT_USD_TOTAL.inc_by(drift.abs());
            debug!(
                ticket = %ticket.id,
                estimated = ticket.estimated_cost,
                actual = actual_cost,
                "Realized cost differs from estimate"
            );
        }
        if monthly_total > self.config.monthly_cost_cap_usd + COST_EPSILON {
            warn!(
                "Caller {} overshot monthly cap: ${:.4} of ${:.2}",
                ticket.caller_id, monthly_total, self.config.monthly_cost_cap_usd
            );
        }

        Ok(settlement)
    }

    /// Add a realized cost to the caller's monthly total
    ///
    /// Knows nothing about admin status; use [`AdmissionManager::settle`] to
    /// skip recording for bypassed callers.
    pub async fn record_cost(&self, caller_id: &str, actual_cost: f64) -> Result<f64, AdmissionError> {
        match self.tracker.record_cost(caller_id, actual_cost).await {
            Ok(total) => {
                if actual_cost > 0.0 {
                    metrics::COST_RECORDED_USD_TOTAL.inc_by(actual_cost);
                }
                Ok(total)
            }
            Err(AdmissionError::StoreUnavailable(reason)) => {
                metrics::STORE_ERRORS_TOTAL.inc();
                error!(
                    "Failed to record cost ${:.4} for caller {}: {}",
                    actual_cost, caller_id, reason
                );
                Err(AdmissionError::StoreUnavailable(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Usage statistics for a caller
    pub async fn get_user_stats(&self, caller_id: &str) -> Result<UserStats, AdmissionError> {
        let current_month = self.tracker.current_month();
        let monthly_cost_usd = self.tracker.current_cost(caller_id).await?;
        let total_requests = self.limiter.indexed_requests(caller_id).await?;
        Ok(UserStats::new(
            caller_id,
            current_month,
            monthly_cost_usd,
            self.config.monthly_cost_cap_usd,
            total_requests,
        ))
    }

    /// Zero the caller's cost for the current month
    ///
    /// Admin-only; callers outside the gateway's admin surface should go
    /// through [`AdminAction`](super::dashboard::AdminAction).
    pub async fn reset_quota(&self, caller_id: &str) -> Result<(), AdmissionError> {
        self.tracker.reset(caller_id).await
    }

    /// Prune the caller's stale rate windows
    pub async fn cleanup_stale_windows(&self, caller_id: &str) -> Result<usize, AdmissionError> {
        let removed = self.housekeeper.cleanup_stale_windows(caller_id).await?;
        metrics::WINDOWS_PURGED_TOTAL.inc_by(removed as u64);
        Ok(removed)
    }

    /// Store connectivity and configuration echo
    pub async fn health_check(&self) -> HealthReport {
        let store = match self.store.health().await {
            Ok(details) => StoreStatus {
                connected: details.connected,
                details: Some(details),
                error: None,
            },
            Err(e) => {
                warn!("Counter store health check failed: {}", e);
                StoreStatus {
                    connected: false,
                    details: None,
                    error: Some(e.to_string()),
                }
            }
        };

        HealthReport {
            checked_at: self.clock.now(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok()),
            store,
            config: ConfigSummary {
                requests_per_window: self.config.requests_per_window,
                window_seconds: self.config.window_seconds,
                monthly_cost_cap_usd: self.config.monthly_cost_cap_usd,
                allowed_emails_count: self.admins.len(),
                failure_policy: self.config.failure_policy,
            },
        }
    }

    fn on_store_failure(
        &self,
        check: &str,
        caller_id: &str,
        reason: String,
    ) -> Result<(), AdmissionError> {
        metrics::STORE_ERRORS_TOTAL.inc();
        match self.config.failure_policy {
            FailurePolicy::FailClosed => {
                error!(
                    "Denying {} check for caller {}: counter store unavailable: {}",
                    check, caller_id, reason
                );
                metrics::record_decision(check, "store_error");
                Err(AdmissionError::StoreUnavailable(reason))
            }
            FailurePolicy::FailOpen => {
                warn!(
                    "Admitting caller {} unmetered ({} check): counter store unavailable: {}",
                    caller_id, check, reason
                );
                metrics::record_decision(check, "degraded");
                Ok(())
            }
        }
    }

    fn on_denied(&self, check: &str, caller_id: &str, err: AdmissionError) -> AdmissionError {
        let outcome = match err {
            AdmissionError::RateLimitExceeded { .. } | AdmissionError::QuotaExceeded { .. } => {
                "denied"
            }
            _ => "rejected",
        };
        metrics::record_decision(check, outcome);
        warn!("Caller {} {} by {} check: {}", caller_id, outcome, check, err);
        err
    }
}

fn outcome_of(admin_bypass: bool) -> &'static str {
    if admin_bypass {
        "bypassed"
    } else {
        "allowed"
    }
}
