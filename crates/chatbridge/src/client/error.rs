//! Client adapter errors.

use thiserror::Error;

use crate::driver::DriverError;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// No driver handle exists (never initialized, or torn down by logout).
    #[error("messaging client not initialized")]
    NotInitialized,

    /// A handle exists but has not reached the ready state.
    #[error("messaging client not ready")]
    NotReady,

    #[error("{0}")]
    Validation(String),

    /// The driver rejected or failed the call.
    #[error("messaging client error: {0}")]
    Upstream(#[from] DriverError),
}

impl ClientError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
