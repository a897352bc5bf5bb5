//! Data types exchanged with a messaging driver.
//!
//! These mirror what the underlying messaging library exposes. They are
//! serialized in camelCase because the same shapes go straight out over the
//! HTTP API and the sidecar protocol.

use serde::{Deserialize, Serialize};

/// Suffix the network uses for individual (non-group) chat identifiers.
pub const CONTACT_SUFFIX: &str = "@c.us";

/// Suffix the network uses for group chat identifiers.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Information about the logged-in account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Own account identifier (e.g. `15551234567@c.us`).
    pub wid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Short preview of the last message in a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub id: String,
    pub body: String,
    pub timestamp: i64,
    pub from_me: bool,
}

/// A chat as listed by the messaging library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    /// Participant identifiers; empty for one-to-one chats.
    #[serde(default)]
    pub participants: Vec<String>,
}

impl ChatSummary {
    /// Number of participants, counting one-to-one chats as a single peer.
    pub fn participant_count(&self) -> usize {
        if self.is_group {
            self.participants.len()
        } else {
            1
        }
    }
}

/// A contact known to the messaging library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

impl Contact {
    /// Display name: push name first, then saved name.
    pub fn display_name(&self) -> Option<&str> {
        self.pushname
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.name.as_deref().filter(|s| !s.is_empty()))
    }
}

/// Downloaded media attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub mimetype: String,
    /// Base64 encoded bytes.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// A message as delivered by the driver, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    /// Chat the message belongs to (the peer for inbound, the recipient for self-sent).
    pub chat_id: String,
    pub from: String,
    pub to: String,
    /// Group member who wrote the message; absent outside groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub body: String,
    /// Epoch seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub from_me: bool,
    #[serde(rename = "type", default = "default_message_type")]
    pub kind: String,
    #[serde(default)]
    pub has_media: bool,
}

fn default_message_type() -> String {
    "chat".to_string()
}

/// Group membership change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNotification {
    pub chat_id: String,
    #[serde(default)]
    pub recipient_ids: Vec<String>,
}

/// Receipt returned after a message was handed to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub message_id: String,
    /// Epoch seconds.
    pub timestamp: i64,
}

/// Normalize a recipient to the network's addressing scheme.
///
/// Bare numbers get the contact suffix; anything already carrying a domain
/// (`@c.us`, `@g.us`, ...) is left untouched.
pub fn normalize_recipient(recipient: &str) -> String {
    let trimmed = recipient.trim();
    if trimmed.contains('@') {
        trimmed.to_string()
    } else {
        format!("{trimmed}{CONTACT_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_number() {
        assert_eq!(normalize_recipient("15551234567"), "15551234567@c.us");
    }

    #[test]
    fn test_normalize_keeps_existing_suffix() {
        assert_eq!(normalize_recipient("15551234567@c.us"), "15551234567@c.us");
        assert_eq!(normalize_recipient("12036304@g.us"), "12036304@g.us");
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        assert_eq!(normalize_recipient(" 4915100 "), "4915100@c.us");
    }

    #[test]
    fn test_contact_display_name_prefers_pushname() {
        let contact = Contact {
            id: "1@c.us".to_string(),
            name: Some("Saved".to_string()),
            pushname: Some("Pushed".to_string()),
            number: None,
        };
        assert_eq!(contact.display_name(), Some("Pushed"));

        let contact = Contact {
            pushname: Some(String::new()),
            ..contact
        };
        assert_eq!(contact.display_name(), Some("Saved"));
    }

    #[test]
    fn test_raw_message_defaults_type() {
        let raw: RawMessage = serde_json::from_str(
            r#"{"id":"m1","chatId":"1@c.us","from":"1@c.us","to":"2@c.us","timestamp":10}"#,
        )
        .unwrap();
        assert_eq!(raw.kind, "chat");
        assert!(!raw.from_me);
        assert!(!raw.has_media);
    }
}
