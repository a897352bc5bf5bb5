//! Messaging drivers.
//!
//! A driver is the live connection to the messaging network. Everything hard
//! (pairing, session persistence, transport) happens behind it; the rest of
//! the crate only sees the [`MessagingDriver`] trait and the stream of
//! [`DriverEvent`]s it pushes into its [`EventSink`].
//!
//! ```text
//! ┌──────────────────┐  DriverEvent   ┌──────────────────┐
//! │ MessagingDriver  │ ─────────────▶ │  ClientAdapter   │
//! │ (sidecar/memory) │ ◀───────────── │  (event pump)    │
//! └──────────────────┘   calls        └──────────────────┘
//! ```

mod error;
pub mod memory;
pub mod sidecar;
mod types;

pub use error::{DriverError, DriverResult};
pub use memory::{MemoryDriver, MemoryDriverFactory, MemoryNetwork};
pub use sidecar::{SidecarDriver, SidecarDriverFactory, SidecarOptions};
pub use types::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle and message events emitted by a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    /// A pairing code was issued and is waiting to be scanned.
    Qr { code: String },
    /// Loading progress while the session restores.
    LoadingScreen { percent: u8, message: String },
    /// Pairing or restored credentials were accepted.
    Authenticated,
    /// The client is connected and can send messages.
    Ready,
    /// Connection to the network was lost.
    Disconnected { reason: String },
    /// Stored credentials were rejected.
    AuthFailure { message: String },
    /// Message written by a peer.
    Message { message: RawMessage },
    /// Message written by this account (from any linked device).
    MessageCreate { message: RawMessage },
    GroupJoin { notification: GroupNotification },
    GroupLeave { notification: GroupNotification },
}

/// Channel a driver pushes its events into.
pub type EventSink = mpsc::UnboundedSender<DriverEvent>;

/// The live handle to the underlying messaging client.
#[async_trait]
pub trait MessagingDriver: Send + Sync {
    /// Start (or restart after a disconnect) the client session.
    ///
    /// Lifecycle progress is reported through the event sink, not the return
    /// value; `Ok` only means the start request was accepted.
    async fn start(&self) -> DriverResult<()>;

    /// Log the account out and invalidate stored credentials.
    async fn logout(&self) -> DriverResult<()>;

    /// Stop the client without touching stored credentials.
    async fn shutdown(&self) -> DriverResult<()>;

    /// Information about the logged-in account, once known.
    async fn info(&self) -> DriverResult<Option<ClientInfo>>;

    async fn chats(&self) -> DriverResult<Vec<ChatSummary>>;

    async fn chat(&self, chat_id: &str) -> DriverResult<Option<ChatSummary>>;

    /// Most recent messages of a chat, oldest first.
    async fn fetch_messages(&self, chat_id: &str, limit: usize) -> DriverResult<Vec<RawMessage>>;

    async fn contact(&self, contact_id: &str) -> DriverResult<Option<Contact>>;

    async fn profile_pic_url(&self, contact_id: &str) -> DriverResult<Option<String>>;

    /// Send a text message. `chat_id` is already normalized.
    async fn send_message(&self, chat_id: &str, body: &str) -> DriverResult<DeliveryReceipt>;

    /// Reply to a message, quoting it.
    async fn reply(&self, message: &RawMessage, body: &str) -> DriverResult<DeliveryReceipt>;

    /// Download the attachment of a message; `None` if it has none anymore.
    async fn download_media(&self, message_id: &str) -> DriverResult<Option<MediaPayload>>;
}

/// Creates driver handles bound to an event sink.
pub trait DriverFactory: Send + Sync {
    fn create(&self, events: EventSink) -> DriverResult<Arc<dyn MessagingDriver>>;
}

/// Which driver implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Sidecar process running the browser-automation messaging library.
    #[default]
    Sidecar,
    /// In-process scripted network (offline demo).
    Memory,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverKind::Sidecar => write!(f, "sidecar"),
            DriverKind::Memory => write!(f, "memory"),
        }
    }
}
