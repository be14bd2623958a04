//! Error types for limiter internals.
//!
//! These errors never cross the public dispatcher boundary: every failure is
//! converted into an `Outcome::Unevaluated` and logged, so callers need no
//! error handling around rate-limit evaluation.

use thiserror::Error;

/// Result type for internal limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Internal error type for limiter operations.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// Shared store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors contacting or operating on the shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store operation failed (network, timeout, protocol).
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
    },

    /// Failed to establish a connection or acquire one from the pool.
    #[error("connection unavailable: {0}")]
    Unavailable(String),

    /// Stored state could not be decoded.
    #[error("corrupt store state: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed {
            message: message.into(),
        }
    }
}

/// Configuration gaps discovered at evaluation time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No primary limit was supplied per call or via the environment.
    #[error("no rate limit configured: {0}")]
    MissingLimit(String),

    /// Window resolved to zero.
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    /// Algorithm parameters that cannot produce a decision.
    #[error("invalid algorithm parameters: {0}")]
    InvalidAlgorithmParams(String),

    /// Action-style call without a path; evaluation cannot key per-route.
    #[error("action context is missing a path")]
    MissingPath,
}
