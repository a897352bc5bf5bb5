//! WebSocket upgrade handler for browser clients.

use axum::{
    body::Bytes,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::RelayMode;
use super::relay::SocketSubscriptions;
use crate::api::AppState;

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    debug!("WebSocket upgrade request");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let registration = state.sockets.register();
    let conn_id = registration.id;
    let mut frames = registration.frames;

    let subscriptions = match state.relay.mode {
        RelayMode::Subscription => Some(SocketSubscriptions::new(
            &state.hub,
            conn_id,
            registration.sender,
        )),
        RelayMode::Broadcast => None,
    };
    info!("WebSocket connection {} opened ({:?} mode)", conn_id, state.relay.mode);

    let ping_every = Duration::from_secs(state.relay.ping_interval_secs.max(1));
    let mut ping_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);

    loop {
        tokio::select! {
            Some(event) = frames.recv() => {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize '{}' event: {}", event.name(), e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket connection {} closed by client", conn_id);
                    break;
                }
                Some(Ok(Message::Pong(_))) => {
                    debug!("Received pong on WebSocket connection {}", conn_id);
                }
                Some(Ok(_)) => {
                    // Inbound frames carry no commands.
                    debug!("Ignoring inbound frame on WebSocket connection {}", conn_id);
                }
                Some(Err(e)) => {
                    warn!("WebSocket error on connection {}: {}", conn_id, e);
                    break;
                }
            },
        }
    }

    // Release hub callbacks before the socket is gone.
    drop(subscriptions);
    state.sockets.unregister(conn_id);
    info!("WebSocket connection {} cleaned up", conn_id);
}
