//! Rate Limiting and Quota Module
//!
//! Admission control for callers of a metered upstream. Every request must
//! pass two independent checks before any work is started:
//!
//! - a fixed-window request limiter (requests per `window_seconds`)
//! - a monthly cost quota (USD per calendar month, UTC)
//!
//! Callers whose email is on the admin allowlist bypass both checks and
//! leave no counter state behind.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Admission Manager                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐         │
//! │  │ Rate        │  │ Cost        │  │ Window      │         │
//! │  │ Limiter     │  │ Quota       │  │ Housekeeper │         │
//! │  └─────────────┘  └─────────────┘  └─────────────┘         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │          Counter Store (Memory or Redis)             │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod housekeeping;
pub mod keys;
pub mod limiter;
pub mod manager;
pub mod quota;
pub mod redis_store;
pub mod store;

#[cfg(test)]
mod proptests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FailurePolicy, RateLimitConfig};
pub use dashboard::{AdminAction, AdminOutcome, HealthReport, UserStats};
pub use error::{AdmissionError, StoreError};
pub use limiter::{RateDecision, Remaining, RequestRateLimiter};
pub use manager::{AdmissionManager, AdmissionTicket, Settlement};
pub use quota::{CostQuotaTracker, QuotaDecision};
pub use redis_store::RedisStore;
pub use store::{CounterStore, MemoryStore, StoreHealth};
