//! Admission Gateway Library
//!
//! Admission control for a metered document-generation service: per-caller
//! fixed-window rate limits, monthly cost quotas, and an admin bypass, all
//! backed by a shared atomic counter store.

pub mod config;
pub mod metrics;
pub mod metrics_server;
pub mod rate_limit;
