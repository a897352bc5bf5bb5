//! Application state shared across handlers.

use std::sync::Arc;

use crate::client::ClientAdapter;
use crate::hub::EventHub;
use crate::ws::{BroadcastRelay, RelayMode, RelayOptions, SocketRegistry};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<ClientAdapter>,
    pub hub: EventHub,
    pub sockets: Arc<SocketRegistry>,
    pub relay: RelayOptions,
    /// Key expected in `X-API-Key` for `/api/bot/*`; `None` rejects every request.
    pub api_key: Option<String>,
    /// Keeps the broadcast-mode hub subscriptions alive.
    #[allow(dead_code)]
    broadcast: Option<Arc<BroadcastRelay>>,
}

impl AppState {
    pub fn new(client: Arc<ClientAdapter>, relay: RelayOptions, api_key: Option<String>) -> Self {
        let hub = client.hub().clone();
        let sockets = Arc::new(SocketRegistry::new(relay.buffer));
        let broadcast = match relay.mode {
            RelayMode::Broadcast => Some(BroadcastRelay::install(&hub, sockets.clone())),
            RelayMode::Subscription => None,
        };

        Self {
            client,
            hub,
            sockets,
            relay,
            api_key: api_key.filter(|key| !key.is_empty()),
            broadcast,
        }
    }
}
