//! API route definitions.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::middleware::{require_api_key, require_logged_in};
use super::state::AppState;
use crate::ws::ws_handler;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    // CORS: any origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Routes that need an authenticated messaging session
    let session_routes = Router::new()
        .route("/chats", get(handlers::list_chats))
        .route("/chats/{chat_id}", get(handlers::get_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(handlers::get_chat_messages).post(handlers::send_chat_message),
        )
        .route("/user/{user_id}", get(handlers::get_user))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_logged_in,
        ));

    // Programmatic bot API
    let bot_routes = Router::new()
        .route("/send", post(handlers::bot_send))
        .route("/status", get(handlers::bot_status))
        .route("/qr", get(handlers::bot_qr))
        .route("/logout", post(handlers::bot_logout))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let api_routes = Router::new()
        .route("/status", get(handlers::get_status))
        .route("/logout", post(handlers::logout))
        .merge(session_routes)
        .nest("/bot", bot_routes);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(trace_layer)
}
