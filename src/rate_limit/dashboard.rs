//! Admin Dashboard Support
//!
//! Read-only usage and health views, plus the admin actions that adjust a
//! caller's state. Every action is gated on the actor being on the admin
//! allowlist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::FailurePolicy;
use super::error::AdmissionError;
use super::manager::AdmissionManager;
use super::store::StoreHealth;

/// Usage statistics for a single caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub caller_id: String,

    /// `YYYY-MM` label the cost figures belong to
    pub current_month: String,

    /// Cost recorded this month
    pub monthly_cost_usd: f64,

    /// Monthly cap
    pub monthly_limit_usd: f64,

    /// Budget left this month (never negative)
    pub cost_remaining_usd: f64,

    /// Requests in the caller's live windows
    pub total_requests: u64,

    /// Whether the cap has been reached
    pub is_over_quota: bool,

    /// Cost as a percentage of the cap
    pub quota_utilization_percent: f64,
}

impl UserStats {
    /// Derive the stats view from the raw figures
    pub fn new(
        caller_id: &str,
        current_month: String,
        monthly_cost_usd: f64,
        monthly_limit_usd: f64,
        total_requests: u64,
    ) -> Self {
        let quota_utilization_percent = if monthly_limit_usd > 0.0 {
            monthly_cost_usd / monthly_limit_usd * 100.0
        } else {
            0.0
        };

        Self {
            caller_id: caller_id.to_string(),
            current_month,
            monthly_cost_usd,
            monthly_limit_usd,
            cost_remaining_usd: (monthly_limit_usd - monthly_cost_usd).max(0.0),
            total_requests,
            is_over_quota: monthly_cost_usd >= monthly_limit_usd,
            quota_utilization_percent,
        }
    }
}

/// Counter store connectivity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub connected: bool,

    /// Backend details when the probe succeeded
    pub details: Option<StoreHealth>,

    /// Probe error when it failed
    pub error: Option<String>,
}

/// Admission limits in effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub requests_per_window: u64,
    pub window_seconds: u64,
    pub monthly_cost_cap_usd: f64,

    /// Size of the admin allowlist (the addresses themselves are not echoed)
    pub allowed_emails_count: usize,

    pub failure_policy: FailurePolicy,
}

/// Health report for the admin surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,

    /// Host running this gateway instance
    pub host: Option<String>,

    pub store: StoreStatus,

    pub config: ConfigSummary,
}

impl HealthReport {
    /// Whether the gateway can currently meter requests
    pub fn is_healthy(&self) -> bool {
        self.store.connected
    }
}

/// Admin action for adjusting a caller's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    /// Zero the caller's cost for the current month
    ResetQuota { caller_id: String },

    /// Prune the caller's stale rate windows
    CleanupWindows { caller_id: String },
}

/// What an admin action did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AdminOutcome {
    QuotaReset { caller_id: String },
    WindowsCleaned { caller_id: String, removed: usize },
}

impl AdminAction {
    /// Execute the admin action on behalf of `actor_email`
    pub async fn execute(
        &self,
        manager: &AdmissionManager,
        actor_email: &str,
    ) -> Result<AdminOutcome, AdmissionError> {
        if !manager.is_admin(actor_email) {
            warn!("Rejected admin action from {}: {:?}", actor_email, self);
            return Err(AdmissionError::NotAuthorized(actor_email.to_string()));
        }

        let outcome = match self {
            AdminAction::ResetQuota { caller_id } => {
                manager.reset_quota(caller_id).await?;
                AdminOutcome::QuotaReset {
                    caller_id: caller_id.clone(),
                }
            }
            AdminAction::CleanupWindows { caller_id } => {
                let removed = manager.cleanup_stale_windows(caller_id).await?;
                AdminOutcome::WindowsCleaned {
                    caller_id: caller_id.clone(),
                    removed,
                }
            }
        };

        info!("Admin {} executed {:?}", actor_email, outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::config::RateLimitConfig;
    use crate::rate_limit::store::MemoryStore;
    use std::sync::Arc;

    fn manager() -> AdmissionManager {
        let config = RateLimitConfig {
            monthly_cost_cap_usd: 10.0,
            admin_emails: vec!["ops@example.com".to_string()],
            ..RateLimitConfig::default()
        };
        AdmissionManager::new(config, Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_user_stats_fields() {
        let stats = UserStats::new("u1", "2024-05".to_string(), 2.5, 10.0, 7);
        assert_eq!(stats.cost_remaining_usd, 7.5);
        assert_eq!(stats.quota_utilization_percent, 25.0);
        assert!(!stats.is_over_quota);

        let over = UserStats::new("u1", "2024-05".to_string(), 12.0, 10.0, 0);
        assert_eq!(over.cost_remaining_usd, 0.0);
        assert!(over.is_over_quota);
    }

    #[test]
    fn test_user_stats_zero_cap() {
        let stats = UserStats::new("u1", "2024-05".to_string(), 0.0, 0.0, 0);
        assert_eq!(stats.quota_utilization_percent, 0.0);
        assert!(stats.is_over_quota);
    }

    #[test]
    fn test_admin_action_serialization() {
        let action = AdminAction::ResetQuota {
            caller_id: "u1".to_string(),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"action":"reset_quota","caller_id":"u1"}"#);

        let back: AdminAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[tokio::test]
    async fn test_reset_requires_admin() {
        let manager = manager();
        manager.record_cost("u1", 4.0).await.unwrap();

        let action = AdminAction::ResetQuota {
            caller_id: "u1".to_string(),
        };
        let err = action.execute(&manager, "u1@example.com").await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotAuthorized(_)));
        assert_eq!(manager.get_user_stats("u1").await.unwrap().monthly_cost_usd, 4.0);

        let outcome = action.execute(&manager, "OPS@example.com").await.unwrap();
        assert_eq!(
            outcome,
            AdminOutcome::QuotaReset {
                caller_id: "u1".to_string()
            }
        );
        assert_eq!(manager.get_user_stats("u1").await.unwrap().monthly_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_cleanup_action() {
        let manager = manager();
        manager.check_rate_limit("u1", "u1@example.com").await.unwrap();

        let action = AdminAction::CleanupWindows {
            caller_id: "u1".to_string(),
        };
        let outcome = action.execute(&manager, "ops@example.com").await.unwrap();
        assert_eq!(
            outcome,
            AdminOutcome::WindowsCleaned {
                caller_id: "u1".to_string(),
                removed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_health_report_serializes() {
        let report = manager().health_check().await;
        assert!(report.is_healthy());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["store"]["connected"], true);
        assert_eq!(json["config"]["allowed_emails_count"], 1);
        assert_eq!(json["config"]["failure_policy"], "fail_closed");
    }
}
