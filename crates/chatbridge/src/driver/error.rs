//! Driver error types.

use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by a messaging driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// HTTP request to the sidecar failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The sidecar answered with an error response.
    #[error("sidecar error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The requested chat, contact or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A response could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The driver was shut down or never started.
    #[error("driver session is closed")]
    Closed,

    /// Any other failure reported by the underlying library.
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
