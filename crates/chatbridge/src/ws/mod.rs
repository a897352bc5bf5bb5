//! WebSocket relay for browser clients.
//!
//! Every [`BridgeEvent`](crate::hub::BridgeEvent) published on the hub is
//! forwarded to open sockets as `{"event": ..., "data": ...}`.
//!
//! ```text
//! ┌────────────┐  publish  ┌──────────┐  callback  ┌─────────────────┐  frame  ┌─────────┐
//! │ ClientAdpt │ ────────▶ │ EventHub │ ─────────▶ │ socket buffer   │ ──────▶ │ browser │
//! └────────────┘           └──────────┘            │ (SocketRegistry)│         └─────────┘
//!                                                  └─────────────────┘
//! ```
//!
//! In subscription mode each socket owns its hub subscriptions. In broadcast
//! mode a single [`BroadcastRelay`] fans out to the registry.

mod handler;
mod registry;
mod relay;

pub use handler::ws_handler;
pub use registry::{CONNECTION_BUFFER_SIZE, Registration, SocketRegistry, SocketSender};
pub use relay::BroadcastRelay;

use serde::{Deserialize, Serialize};

/// How sockets are attached to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// One message and one status subscription per socket.
    #[default]
    Subscription,
    /// One subscription per kind, fanned out to all sockets.
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayOptions {
    pub mode: RelayMode,
    pub ping_interval_secs: u64,
    /// Per-socket send buffer, in frames.
    pub buffer: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            mode: RelayMode::Subscription,
            ping_interval_secs: 30,
            buffer: CONNECTION_BUFFER_SIZE,
        }
    }
}
