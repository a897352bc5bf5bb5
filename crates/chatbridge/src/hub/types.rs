//! Events published on the hub and relayed to browsers.
//!
//! The wire form is `{"event": <name>, "data": <payload>}`; payload-less
//! events carry only the name.

use serde::{Deserialize, Serialize};

use crate::driver::{ClientInfo, MediaPayload};

/// Subscription channels of the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Messages and group notifications.
    Message,
    /// Client lifecycle transitions.
    Status,
}

/// A message after enrichment, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub from: String,
    pub to: String,
    /// Sender inside a group; equals `from` otherwise.
    pub author: String,
    pub body: String,
    /// Epoch seconds.
    pub timestamp: i64,
    pub from_me: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub has_media: bool,
    pub is_group: bool,
    pub sender_name: String,
    pub chat_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaPayload>,
}

/// Group membership change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChange {
    pub chat_id: String,
    pub group_name: String,
    pub participants: Vec<String>,
}

/// Loading progress while a session restores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub percent: u8,
    pub message: String,
}

/// Everything the hub carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BridgeEvent {
    // ========== Status ==========
    /// Pairing code waiting to be scanned.
    Qr(String),
    LoadingScreen(LoadingProgress),
    Authenticated,
    Ready(Option<ClientInfo>),
    Disconnected { reason: String },
    AuthFailure { message: String },
    LoggedOut,
    /// A reconnect attempt is scheduled.
    Reconnecting {
        attempt: u32,
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    /// Reconnect attempts are exhausted.
    ReconnectFailed { attempts: u32 },

    // ========== Message ==========
    /// Message written by a peer.
    Message(MessageRecord),
    /// Message written by this account.
    MessageCreate(MessageRecord),
    GroupJoin(GroupChange),
    GroupLeave(GroupChange),
}

impl BridgeEvent {
    /// Hub channel this event is published on.
    pub fn kind(&self) -> EventKind {
        match self {
            BridgeEvent::Message(_)
            | BridgeEvent::MessageCreate(_)
            | BridgeEvent::GroupJoin(_)
            | BridgeEvent::GroupLeave(_) => EventKind::Message,
            _ => EventKind::Status,
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::Qr(_) => "qr",
            BridgeEvent::LoadingScreen(_) => "loading_screen",
            BridgeEvent::Authenticated => "authenticated",
            BridgeEvent::Ready(_) => "ready",
            BridgeEvent::Disconnected { .. } => "disconnected",
            BridgeEvent::AuthFailure { .. } => "auth_failure",
            BridgeEvent::LoggedOut => "logged_out",
            BridgeEvent::Reconnecting { .. } => "reconnecting",
            BridgeEvent::ReconnectFailed { .. } => "reconnect_failed",
            BridgeEvent::Message(_) => "message",
            BridgeEvent::MessageCreate(_) => "message_create",
            BridgeEvent::GroupJoin(_) => "group_join",
            BridgeEvent::GroupLeave(_) => "group_leave",
        }
    }
}
