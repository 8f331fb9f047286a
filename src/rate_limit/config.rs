//! Rate Limit Configuration
//!
//! Limits for the request-rate window and the monthly cost quota, the admin
//! allowlist, and the store failure policy.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

/// Default rate limits
pub const DEFAULT_REQUESTS_PER_WINDOW: u64 = 60; // requests per window
pub const DEFAULT_WINDOW_SECONDS: u64 = 300; // 5 minutes
pub const DEFAULT_MONTHLY_COST_CAP_USD: f64 = 10.0;

/// Longest accepted window (one year)
pub const MAX_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

/// What admission does when the counter store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Deny the request
    #[default]
    FailClosed,
    /// Admit the request unmetered and flag the decision as degraded
    FailOpen,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_closed" | "closed" => Ok(FailurePolicy::FailClosed),
            "fail_open" | "open" => Ok(FailurePolicy::FailOpen),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::FailClosed => write!(f, "fail_closed"),
            FailurePolicy::FailOpen => write!(f, "fail_open"),
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per caller per window
    pub requests_per_window: u64,

    /// Fixed window length in seconds
    pub window_seconds: u64,

    /// Monthly cost cap per caller, in USD
    pub monthly_cost_cap_usd: f64,

    /// Emails exempt from all metering
    pub admin_emails: Vec<String>,

    /// Behaviour when the counter store is unavailable
    pub failure_policy: FailurePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: DEFAULT_REQUESTS_PER_WINDOW,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            monthly_cost_cap_usd: DEFAULT_MONTHLY_COST_CAP_USD,
            admin_emails: Vec::new(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl RateLimitConfig {
    /// Apply overrides from a variable lookup
    ///
    /// - GATEWAY_REQUESTS_PER_WINDOW
    /// - GATEWAY_WINDOW_SECONDS
    /// - MONTHLY_COST_CAP_USD
    /// - ALLOWED_EMAILS (comma separated)
    /// - GATEWAY_FAILURE_POLICY
    ///
    /// Unparseable values are logged and the current setting is kept.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = parse_override(&lookup, "GATEWAY_REQUESTS_PER_WINDOW") {
            self.requests_per_window = limit;
        }
        if let Some(secs) = parse_override(&lookup, "GATEWAY_WINDOW_SECONDS") {
            self.window_seconds = secs;
        }
        if let Some(cap) = parse_override(&lookup, "MONTHLY_COST_CAP_USD") {
            self.monthly_cost_cap_usd = cap;
        }
        if let Some(emails) = lookup("ALLOWED_EMAILS") {
            self.admin_emails = parse_email_list(&emails);
        }
        if let Some(policy) = parse_override(&lookup, "GATEWAY_FAILURE_POLICY") {
            self.failure_policy = policy;
        }
        self
    }

    /// Normalized admin allowlist (trimmed, lowercase, no blanks)
    pub fn admin_allowlist(&self) -> HashSet<String> {
        self.admin_emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect()
    }

    /// Check the limits are usable
    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_window == 0 {
            return Err("requests_per_window must be > 0".to_string());
        }
        if self.window_seconds == 0 {
            return Err("window_seconds must be > 0".to_string());
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(format!(
                "window_seconds must be at most {}, got {}",
                MAX_WINDOW_SECONDS, self.window_seconds
            ));
        }
        if !self.monthly_cost_cap_usd.is_finite() || self.monthly_cost_cap_usd < 0.0 {
            return Err(format!(
                "monthly_cost_cap_usd must be a non-negative number, got {}",
                self.monthly_cost_cap_usd
            ));
        }
        Ok(())
    }
}

/// Read and parse one override variable
///
/// Returns `None` when the variable is unset or does not parse; the latter
/// is logged so a typo never silently keeps the default.
pub fn parse_override<T, F>(lookup: F, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable override: {}", e);
            None
        }
    }
}

/// Split a comma separated email list
pub fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
