use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for a screening run.
///
/// Undefined metrics (CAGR over a non-positive base, margin over zero revenue)
/// are not errors: they surface as `None` from the metric functions.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScreenerError {
    /// Profile or TTM ratios missing; the security is skipped, not scored as failing.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Provider quota exhausted. Treated by the scheduler as a batch-level backoff signal.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl ScreenerError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ScreenerError::RateLimitExceeded(_))
    }
}
