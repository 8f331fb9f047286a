//! Admission Error Types
//!
//! Errors surfaced by the rate limiter, the cost-quota tracker and the
//! counter store backing them. Every variant carries structured data so the
//! boundary layer can build a user-facing message without parsing strings.

/// Errors returned by a [`CounterStore`](super::store::CounterStore)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the command failed in transit
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// Operation against a key holding the wrong kind of value
    #[error("Key {0} holds a value of the wrong type")]
    WrongType(String),

    /// Stored value could not be parsed as a number
    #[error("Key {key} holds an unparseable value: {value}")]
    InvalidValue { key: String, value: String },

    /// Reply could not be converted to the expected Rust type
    #[error("Unexpected reply from counter store: {0}")]
    UnexpectedReply(String),
}

impl StoreError {
    /// Whether the failure is about stored data rather than connectivity
    pub fn is_corruption(&self) -> bool {
        !matches!(self, StoreError::Unavailable(_))
    }
}

/// Classify a Redis failure by its kind and server error code
fn classify_redis_error(kind: redis::ErrorKind, code: Option<&str>, message: String) -> StoreError {
    match (kind, code) {
        (_, Some("WRONGTYPE")) => StoreError::WrongType(message),
        (redis::ErrorKind::TypeError, _) => StoreError::UnexpectedReply(message),
        _ => StoreError::Unavailable(message),
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        classify_redis_error(err.kind(), err.code(), err.to_string())
    }
}

/// Admission failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    /// Too many requests in the current window
    #[error("Rate limit exceeded: maximum {limit} requests per {window_secs}s, retry after {retry_after_secs}s")]
    RateLimitExceeded {
        retry_after_secs: u64,
        limit: u64,
        window_secs: u64,
    },

    /// Monthly cost cap would be exceeded
    #[error("Monthly cost quota exceeded: current ${current_cost:.2}, limit ${limit:.2}")]
    QuotaExceeded { current_cost: f64, limit: f64 },

    /// Counter store failure while admission was fail-closed
    #[error("Admission store unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored counter state is of the wrong type or unparseable
    #[error("Admission state corrupt: {0}")]
    CorruptState(String),

    /// Cost that is negative, NaN or infinite
    #[error("Invalid cost value: {0}")]
    InvalidCost(f64),

    /// Admin-only action attempted by a non-admin
    #[error("Not authorized: {0}")]
    NotAuthorized(String),
}

impl AdmissionError {
    /// Whether the same request can succeed later without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdmissionError::RateLimitExceeded { .. } | AdmissionError::StoreUnavailable(_)
        )
    }

    /// Seconds the caller should wait, when known
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AdmissionError::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// HTTP status the gateway should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            AdmissionError::RateLimitExceeded { .. } => 429,
            AdmissionError::QuotaExceeded { .. } => 402,
            AdmissionError::StoreUnavailable(_) => 503,
            AdmissionError::CorruptState(_) => 500,
            AdmissionError::InvalidCost(_) => 400,
            AdmissionError::NotAuthorized(_) => 403,
        }
    }
}

impl From<StoreError> for AdmissionError {
    fn from(err: StoreError) -> Self {
        if err.is_corruption() {
            AdmissionError::CorruptState(err.to_string())
        } else {
            AdmissionError::StoreUnavailable(err.to_string())
        }
    }
}
