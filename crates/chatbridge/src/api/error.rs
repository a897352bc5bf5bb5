//! Unified API error handling with structured responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::client::ClientError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),

    /// The messaging client failed; `details` carries its message.
    #[error("{message}")]
    Upstream {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn upstream(msg: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
            details: Some(details.into()),
        }
    }

    /// Wrap a client failure under a caller-chosen summary.
    ///
    /// Validation failures keep their own message and status.
    pub fn from_client(summary: &str, err: ClientError) -> Self {
        match err {
            ClientError::Validation(msg) => Self::BadRequest(msg),
            other => Self::upstream(summary, other.to_string()),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) | Self::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::Upstream { message, details } => {
                warn!(
                    error_code = code,
                    message = %message,
                    details = details.as_deref().unwrap_or_default(),
                    "Messaging client error"
                );
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let details = match self {
            ApiError::Upstream { details, .. } => details,
            _ => None,
        };
        let body = ErrorResponse {
            error: message,
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Validation(msg) => ApiError::BadRequest(msg),
            ClientError::NotInitialized | ClientError::NotReady => {
                ApiError::Internal(err.to_string())
            }
            ClientError::Upstream(e) => {
                ApiError::upstream("Messaging client request failed", e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
