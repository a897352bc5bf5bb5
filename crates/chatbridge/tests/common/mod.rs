//! Test utilities and common setup.

#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use chatbridge::api::{self, API_KEY_HEADER, AppState};
use chatbridge::client::{BackfillOptions, ClientAdapter, ClientOptions, ReconnectPolicy};
use chatbridge::driver::{ChatSummary, ClientInfo, Contact, MemoryDriverFactory, MemoryNetwork, RawMessage};
use chatbridge::hub::{BridgeEvent, EventHub, EventKind, Subscription};
use chatbridge::ws::RelayOptions;

pub const TEST_API_KEY: &str = "test-api-key";
pub const OWN_ID: &str = "10000000000@c.us";
pub const ADA_ID: &str = "15550000001@c.us";
pub const GROUP_ID: &str = "120363000000@g.us";

pub fn own_info() -> ClientInfo {
    ClientInfo {
        wid: OWN_ID.to_string(),
        pushname: Some("Bridge Test".to_string()),
        platform: Some("memory".to_string()),
    }
}

/// Network with one contact, one direct chat and one group.
pub fn seed(network: &MemoryNetwork) {
    network.add_contact(Contact {
        id: ADA_ID.to_string(),
        name: Some("Ada Lovelace".to_string()),
        pushname: Some("Ada".to_string()),
        number: Some("15550000001".to_string()),
    });
    network.add_chat(ChatSummary {
        id: ADA_ID.to_string(),
        name: "Ada".to_string(),
        is_group: false,
        unread_count: 0,
        timestamp: 100,
        last_message: None,
        participants: Vec::new(),
    });
    network.add_chat(ChatSummary {
        id: GROUP_ID.to_string(),
        name: "Team".to_string(),
        is_group: true,
        unread_count: 0,
        timestamp: 90,
        last_message: None,
        participants: vec![ADA_ID.to_string(), OWN_ID.to_string(), "15550000002@c.us".to_string()],
    });
}

pub fn paired_network() -> Arc<MemoryNetwork> {
    let network = MemoryNetwork::paired(own_info());
    seed(&network);
    Arc::new(network)
}

pub fn unpaired_network() -> Arc<MemoryNetwork> {
    let network = MemoryNetwork::new();
    seed(&network);
    Arc::new(network)
}

/// Options with short delays so lifecycle tests finish quickly.
pub fn fast_options() -> ClientOptions {
    ClientOptions {
        reconnect: ReconnectPolicy {
            initial_delay_ms: 10,
            multiplier: 2.0,
            max_delay_ms: 40,
            max_attempts: 3,
        },
        backfill: BackfillOptions {
            enabled: false,
            ..BackfillOptions::default()
        },
        reinit_delay: Duration::from_millis(50),
        ..ClientOptions::default()
    }
}

pub fn inbound(id: &str, chat_id: &str, from: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        from: from.to_string(),
        to: OWN_ID.to_string(),
        author: None,
        body: body.to_string(),
        timestamp: 1_700_000_000,
        from_me: false,
        kind: "chat".to_string(),
        has_media: false,
    }
}

/// A bridge over a memory network, not yet initialized.
pub struct TestBridge {
    pub network: Arc<MemoryNetwork>,
    pub factory: Arc<MemoryDriverFactory>,
    pub client: Arc<ClientAdapter>,
}

impl TestBridge {
    pub fn new(network: Arc<MemoryNetwork>) -> Self {
        Self::with_options(network, fast_options())
    }

    pub fn with_options(network: Arc<MemoryNetwork>, options: ClientOptions) -> Self {
        let factory = Arc::new(MemoryDriverFactory::new(network.clone()));
        let client = ClientAdapter::new(factory.clone(), EventHub::new(), options);
        Self {
            network,
            factory,
            client,
        }
    }

    pub fn hub(&self) -> &EventHub {
        self.client.hub()
    }

    pub fn state(&self, relay: RelayOptions, api_key: Option<&str>) -> AppState {
        AppState::new(
            self.client.clone(),
            relay,
            api_key.map(str::to_string),
        )
    }

    pub fn router(&self) -> Router {
        api::create_router(self.state(RelayOptions::default(), Some(TEST_API_KEY)))
    }

    /// Initialize and wait for the ready state (paired networks only).
    pub async fn ready(&self) {
        self.client.initialize().await.unwrap();
        let client = self.client.clone();
        eventually("client ready", || {
            let client = client.clone();
            async move { client.status().await.is_ready }
        })
        .await;
    }
}

/// Records everything published on the hub.
pub struct Recorder {
    events: Arc<Mutex<Vec<BridgeEvent>>>,
    _subscriptions: Vec<Subscription>,
}

impl Recorder {
    pub fn attach(hub: &EventHub) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriptions = [EventKind::Status, EventKind::Message]
            .into_iter()
            .map(|kind| {
                let events = events.clone();
                hub.subscribe(kind, move |event| {
                    events.lock().unwrap().push(event.clone());
                    Ok(())
                })
            })
            .collect();
        Self {
            events,
            _subscriptions: subscriptions,
        }
    }

    pub fn events(&self) -> Vec<BridgeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(BridgeEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub async fn wait_for(&self, name: &'static str) {
        let events = self.events.clone();
        eventually(name, move || {
            let found = events.lock().unwrap().iter().any(|e| e.name() == name);
            async move { found }
        })
        .await;
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Send a request through the router and decode the JSON body.
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    api_key: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).method(method);
    if let Some(key) = api_key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_string(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
