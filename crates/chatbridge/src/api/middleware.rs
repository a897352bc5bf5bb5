//! Request gates.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::error::ApiError;
use super::state::AppState;

/// Header carrying the bot API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests while the messaging session is not authenticated.
pub async fn require_logged_in(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.client.is_logged_in().await {
        debug!(path = %req.uri().path(), "Rejected request: client not logged in");
        return Err(ApiError::unauthorized("Client is not logged in"));
    }
    Ok(next.run(req).await)
}

/// Rejects requests without the configured `X-API-Key`.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    match (state.api_key.as_deref(), provided) {
        (Some(expected), Some(given)) if expected == given => Ok(next.run(req).await),
        (None, _) => {
            debug!("Rejected bot request: no API key configured");
            Err(ApiError::unauthorized("Invalid API key"))
        }
        _ => {
            debug!(path = %req.uri().path(), "Rejected bot request: bad API key");
            Err(ApiError::unauthorized("Invalid API key"))
        }
    }
}
