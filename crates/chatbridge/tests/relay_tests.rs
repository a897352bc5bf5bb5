//! WebSocket relay tests against a live server.

use axum::http::Method;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

mod common;
use chatbridge::api::{self, AppState};
use chatbridge::hub::{BridgeEvent, EventKind, GroupChange};
use chatbridge::ws::{RelayMode, RelayOptions};
use common::{ADA_ID, TEST_API_KEY, TestBridge, eventually, inbound, paired_network, send};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(state: AppState) -> SocketAddr {
    let app = api::create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

/// Next JSON frame, skipping control frames.
async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if message.is_text() {
            return serde_json::from_str(message.to_text().unwrap()).unwrap();
        }
    }
}

async fn frame_named(socket: &mut Socket, name: &str) -> Value {
    loop {
        let frame = next_frame(socket).await;
        if frame["event"] == name {
            return frame;
        }
    }
}

fn team_change() -> GroupChange {
    GroupChange {
        chat_id: common::GROUP_ID.to_string(),
        group_name: "Team".to_string(),
        participants: vec![ADA_ID.to_string()],
    }
}

async fn wait_for_connections(state: &AppState, count: usize) {
    let sockets = state.sockets.clone();
    eventually("socket registration", move || {
        let done = sockets.connection_count() == count;
        async move { done }
    })
    .await;
}

#[tokio::test]
async fn test_socket_receives_lifecycle_and_messages() {
    let bridge = TestBridge::new(paired_network());
    let state = bridge.state(RelayOptions::default(), Some(TEST_API_KEY));
    let addr = serve(state.clone()).await;

    let mut socket = connect(addr).await;
    wait_for_connections(&state, 1).await;
    assert_eq!(state.hub.subscriber_count(EventKind::Status), 1);
    assert_eq!(state.hub.subscriber_count(EventKind::Message), 1);

    bridge.ready().await;
    assert_eq!(next_frame(&mut socket).await["event"], "loading_screen");
    assert_eq!(next_frame(&mut socket).await["event"], "authenticated");
    let ready = next_frame(&mut socket).await;
    assert_eq!(ready["event"], "ready");
    assert_eq!(ready["data"]["wid"], common::OWN_ID);

    bridge
        .factory
        .latest()
        .unwrap()
        .receive(inbound("m1", ADA_ID, ADA_ID, "hello"));
    let frame = frame_named(&mut socket, "message").await;
    assert_eq!(frame["data"]["id"], "m1");
    assert_eq!(frame["data"]["senderName"], "Ada");
    assert_eq!(frame["data"]["isGroup"], false);
}

#[tokio::test]
async fn test_closing_socket_releases_subscriptions() {
    let bridge = TestBridge::new(paired_network());
    let state = bridge.state(RelayOptions::default(), Some(TEST_API_KEY));
    let addr = serve(state.clone()).await;
    let app = api::create_router(state.clone());

    let mut socket = connect(addr).await;
    wait_for_connections(&state, 1).await;

    let (_, json) = send(&app, Method::GET, "/api/status", None, None).await;
    assert_eq!(json["socket"]["isConnected"], true);
    assert_eq!(json["socket"]["connections"], 1);

    socket.close(None).await.unwrap();
    wait_for_connections(&state, 0).await;

    let hub = state.hub.clone();
    eventually("subscriptions released", move || {
        let done = hub.subscriber_count(EventKind::Status) == 0
            && hub.subscriber_count(EventKind::Message) == 0;
        async move { done }
    })
    .await;

    // Nothing is left to call for the closed socket.
    assert_eq!(state.hub.publish(&BridgeEvent::Qr("after-close".to_string())), 0);
    assert_eq!(state.hub.publish(&BridgeEvent::GroupJoin(team_change())), 0);
}

#[tokio::test]
async fn test_socket_keeps_messages_after_logout() {
    let bridge = TestBridge::new(paired_network());
    let state = bridge.state(RelayOptions::default(), Some(TEST_API_KEY));
    let addr = serve(state.clone()).await;

    let mut socket = connect(addr).await;
    wait_for_connections(&state, 1).await;
    bridge.ready().await;
    frame_named(&mut socket, "ready").await;

    bridge.client.logout().await.unwrap();
    frame_named(&mut socket, "logged_out").await;

    let hub = state.hub.clone();
    eventually("message subscription renewed", move || {
        let done = hub.subscriber_count(EventKind::Message) == 1;
        async move { done }
    })
    .await;

    // Re-initialized session asks for pairing again.
    let qr = frame_named(&mut socket, "qr").await;
    assert_eq!(qr["data"], "memory-qr-2-1");
}

#[tokio::test]
async fn test_broadcast_mode_fans_out() {
    let bridge = TestBridge::new(paired_network());
    let relay = RelayOptions {
        mode: RelayMode::Broadcast,
        ..RelayOptions::default()
    };
    let state = bridge.state(relay, Some(TEST_API_KEY));
    let addr = serve(state.clone()).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    wait_for_connections(&state, 2).await;

    // One hub subscription per kind, however many sockets.
    assert_eq!(state.hub.subscriber_count(EventKind::Status), 1);
    assert_eq!(state.hub.subscriber_count(EventKind::Message), 1);

    state.hub.publish(&BridgeEvent::Qr("broadcast-code".to_string()));
    for socket in [&mut first, &mut second] {
        let frame = next_frame(socket).await;
        assert_eq!(frame["event"], "qr");
        assert_eq!(frame["data"], "broadcast-code");
    }

    bridge.ready().await;
    bridge.client.logout().await.unwrap();
    frame_named(&mut first, "logged_out").await;
    let hub = state.hub.clone();
    eventually("broadcast message subscription renewed", move || {
        let done = hub.subscriber_count(EventKind::Message) == 1;
        async move { done }
    })
    .await;
}
