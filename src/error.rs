//! Error types for costpipe
//!
//! This module defines the error taxonomy used throughout the costpipe
//! library. All errors are derived from `thiserror` for convenient error
//! handling and automatic `From` implementations.
//!
//! The taxonomy separates transient upstream faults (timeouts, throttling,
//! 5xx responses) from terminal ones so the retry layer can decide whether
//! another attempt is worthwhile.

use thiserror::Error;

/// Main error type for costpipe operations
#[derive(Error, Debug)]
pub enum CostPipeError {
    /// Malformed filter or request parameter; never retried
    #[error("validation error: {0}")]
    Validation(String),

    /// Upstream request timed out
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Upstream throttled the request
    #[error("upstream throttled: {0}")]
    UpstreamThrottle(String),

    /// Upstream returned a non-success HTTP status
    #[error("upstream returned status {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The warehouse reported a terminal failure for a submitted query
    #[error("query execution failed: {reason}")]
    QueryExecutionFailed {
        /// Failure reason as stated by the warehouse
        reason: String,
    },

    /// The polling ceiling was reached without observing a terminal state
    #[error("query execution did not reach a terminal state after {attempts} polls")]
    QueryExecutionTimeout {
        /// Number of status polls performed before giving up
        attempts: u32,
    },

    /// A circuit breaker is open for the named dependency
    #[error("circuit breaker open for {dependency}")]
    CircuitOpen {
        /// The upstream dependency the breaker guards
        dependency: String,
    },

    /// JSON serialization or parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CostPipeError {
    /// Whether a retry of the same call could plausibly succeed.
    ///
    /// Timeouts, throttling, 5xx responses and connection-level faults are
    /// transient. Everything else (validation, 4xx, terminal query failures)
    /// fails immediately without retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::UpstreamTimeout(_) | Self::UpstreamThrottle(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Convenience type alias for Results in costpipe
pub type Result<T> = std::result::Result<T, CostPipeError>;
