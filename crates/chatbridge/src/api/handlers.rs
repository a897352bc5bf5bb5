//! HTTP request handlers.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::client::{
    ClientOverview, ClientStatus, DEFAULT_HISTORY_LIMIT, MessageView, UserProfile,
};
use crate::driver::{ChatSummary, RawMessage};

/// Largest page accepted by the history endpoints.
const MAX_HISTORY_LIMIT: usize = 500;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketStatus {
    pub is_connected: bool,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub client: ClientOverview,
    pub socket: SocketStatus,
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let connections = state.sockets.connection_count();
    Json(StatusResponse {
        client: state.client.overview().await,
        socket: SocketStatus {
            is_connected: connections > 0,
            connections,
        },
    })
}

#[derive(Debug, Serialize)]
pub struct ChatsResponse {
    pub chats: Vec<ChatSummary>,
}

/// GET /api/chats
#[instrument(skip(state))]
pub async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<ChatsResponse>> {
    let chats = state
        .client
        .list_chats()
        .await
        .map_err(|e| ApiError::from_client("Failed to fetch chats", e))?;
    Ok(Json(ChatsResponse { chats }))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

/// GET /api/chats/{chat_id}
///
/// Compact view of the latest messages.
#[instrument(skip(state))]
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<Vec<MessageView>>> {
    let messages = state
        .client
        .chat_messages(&chat_id, DEFAULT_HISTORY_LIMIT)
        .await
        .map_err(|e| ApiError::from_client("Failed to fetch messages", e))?;
    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

/// GET /api/chats/{chat_id}/messages?limit=N
#[instrument(skip(state))]
pub async fn get_chat_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<RawMessage>>> {
    let messages = state
        .client
        .chat_messages(&chat_id, query.limit())
        .await
        .map_err(|e| ApiError::from_client("Failed to fetch messages", e))?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct SendChatMessageRequest {
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub message_id: String,
    pub timestamp: i64,
}

/// POST /api/chats/{chat_id}/messages
#[instrument(skip(state, body))]
pub async fn send_chat_message(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    body: Result<Json<SendChatMessageRequest>, JsonRejection>,
) -> ApiResult<Json<SendMessageResponse>> {
    let message = body
        .ok()
        .and_then(|Json(req)| req.message)
        .filter(|m| !m.trim().is_empty());
    let Some(message) = message.filter(|_| !chat_id.trim().is_empty()) else {
        return Err(ApiError::bad_request("ChatId and message are required"));
    };

    let receipt = state
        .client
        .send_message(&chat_id, &message)
        .await
        .map_err(|e| ApiError::from_client("Failed to send message", e))?;

    info!(chat_id = %chat_id, message_id = %receipt.message_id, "Message sent");
    Ok(Json(SendMessageResponse {
        success: true,
        message: None,
        message_id: receipt.message_id,
        timestamp: receipt.timestamp,
    }))
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: UserProfile,
}

/// GET /api/user/{user_id}
#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserResponse>> {
    let user = state
        .client
        .user_profile(&user_id)
        .await
        .map_err(|e| ApiError::from_client("Failed to fetch user", e))?
        .ok_or_else(|| ApiError::not_found(format!("User not found: {user_id}")))?;
    Ok(Json(UserResponse { user }))
}

/// POST /api/logout
pub async fn logout(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state
        .client
        .logout()
        .await
        .map_err(|e| ApiError::from_client("Failed to logout", e))?;
    Ok(StatusCode::OK)
}

// ========== Bot API (X-API-Key) ==========

#[derive(Debug, Deserialize)]
pub struct BotSendRequest {
    pub number: Option<String>,
    pub message: Option<String>,
}

/// POST /api/bot/send
#[instrument(skip(state, body))]
pub async fn bot_send(
    State(state): State<AppState>,
    body: Result<Json<BotSendRequest>, JsonRejection>,
) -> ApiResult<Json<SendMessageResponse>> {
    let (number, message) = match body {
        Ok(Json(req)) => (req.number, req.message),
        Err(_) => (None, None),
    };
    let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(number), Some(message)) = (present(number), present(message)) else {
        return Err(ApiError::bad_request("Number and message are required"));
    };

    let receipt = state
        .client
        .send_message(&number, &message)
        .await
        .map_err(|e| ApiError::from_client("Failed to send message", e))?;

    info!(message_id = %receipt.message_id, "Bot message sent");
    Ok(Json(SendMessageResponse {
        success: true,
        message: Some("Message sent successfully".to_string()),
        message_id: receipt.message_id,
        timestamp: receipt.timestamp,
    }))
}

/// GET /api/bot/status
pub async fn bot_status(State(state): State<AppState>) -> Json<ClientStatus> {
    Json(state.client.status().await)
}

#[derive(Debug, Serialize)]
pub struct QrResponse {
    pub qr: String,
}

/// GET /api/bot/qr
pub async fn bot_qr(State(state): State<AppState>) -> ApiResult<Json<QrResponse>> {
    state
        .client
        .pairing_code()
        .await
        .map(|qr| Json(QrResponse { qr }))
        .ok_or_else(|| ApiError::not_found("QR code not available"))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/bot/logout
pub async fn bot_logout(State(state): State<AppState>) -> ApiResult<Json<LogoutResponse>> {
    state
        .client
        .logout()
        .await
        .map_err(|e| ApiError::from_client("Failed to logout", e))?;
    Ok(Json(LogoutResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_limit_defaults_and_clamps() {
        assert_eq!(HistoryQuery::default().limit(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(HistoryQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(HistoryQuery { limit: Some(10_000) }.limit(), MAX_HISTORY_LIMIT);
    }

    #[test]
    fn test_send_response_shape() {
        let value = serde_json::to_value(SendMessageResponse {
            success: true,
            message: None,
            message_id: "abc".to_string(),
            timestamp: 42,
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"success": true, "messageId": "abc", "timestamp": 42})
        );
    }
}
