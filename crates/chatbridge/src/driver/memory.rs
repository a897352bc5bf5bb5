//! In-process messaging driver.
//!
//! [`MemoryNetwork`] is a scripted stand-in for the messaging network: chats,
//! contacts and stored messages live in memory, and every driver created from
//! the same network shares them. Tests use it to fire lifecycle events and to
//! inject failures; `serve --driver memory` uses a seeded network as an
//! offline demo.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    ChatSummary, ClientInfo, Contact, DeliveryReceipt, DriverError, DriverEvent, DriverFactory,
    DriverResult, EventSink, GroupNotification, MediaPayload, MessagePreview, MessagingDriver,
    RawMessage,
};

/// A message sent through a memory driver.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: String,
    pub body: String,
    pub quoted_message_id: Option<String>,
    pub receipt: DeliveryReceipt,
}

#[derive(Debug, Default)]
struct NetworkData {
    paired: bool,
    info: Option<ClientInfo>,
    chats: Vec<ChatSummary>,
    messages: HashMap<String, Vec<RawMessage>>,
    contacts: HashMap<String, Contact>,
    pictures: HashMap<String, String>,
    media: HashMap<String, MediaPayload>,
    sent: Vec<SentMessage>,
    fail_start: bool,
    fail_logout: bool,
    fail_media: bool,
    fail_chats: bool,
}

/// Shared state of the simulated messaging network.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    data: Mutex<NetworkData>,
}

impl MemoryNetwork {
    /// An empty network with no stored credentials: drivers ask for pairing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A network with stored credentials for `info`: drivers come up ready.
    pub fn paired(info: ClientInfo) -> Self {
        let network = Self::default();
        {
            let mut data = network.lock();
            data.paired = true;
            data.info = Some(info);
        }
        network
    }

    /// A small seeded network for offline demos.
    pub fn demo() -> Self {
        let network = Self::paired(ClientInfo {
            wid: "10000000000@c.us".to_string(),
            pushname: Some("Chatbridge Demo".to_string()),
            platform: Some("memory".to_string()),
        });
        network.add_contact(Contact {
            id: "15550000001@c.us".to_string(),
            name: Some("Ada".to_string()),
            pushname: Some("ada".to_string()),
            number: Some("15550000001".to_string()),
        });
        network.add_chat(ChatSummary {
            id: "15550000001@c.us".to_string(),
            name: "Ada".to_string(),
            is_group: false,
            unread_count: 1,
            timestamp: Utc::now().timestamp(),
            last_message: None,
            participants: Vec::new(),
        });
        network.add_message(RawMessage {
            id: "demo-1".to_string(),
            chat_id: "15550000001@c.us".to_string(),
            from: "15550000001@c.us".to_string(),
            to: "10000000000@c.us".to_string(),
            author: None,
            body: "Hello from the demo network".to_string(),
            timestamp: Utc::now().timestamp(),
            from_me: false,
            kind: "chat".to_string(),
            has_media: false,
        });
        network
    }

    fn lock(&self) -> MutexGuard<'_, NetworkData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_info(&self, info: ClientInfo) {
        self.lock().info = Some(info);
    }

    pub fn add_chat(&self, chat: ChatSummary) {
        let mut data = self.lock();
        data.chats.retain(|c| c.id != chat.id);
        data.chats.push(chat);
    }

    pub fn add_contact(&self, contact: Contact) {
        self.lock().contacts.insert(contact.id.clone(), contact);
    }

    pub fn set_profile_pic(&self, contact_id: &str, url: &str) {
        self.lock()
            .pictures
            .insert(contact_id.to_string(), url.to_string());
    }

    /// Store a message in its chat's history.
    pub fn add_message(&self, message: RawMessage) {
        let mut data = self.lock();
        if let Some(chat) = data.chats.iter_mut().find(|c| c.id == message.chat_id) {
            chat.timestamp = message.timestamp;
            chat.last_message = Some(MessagePreview {
                id: message.id.clone(),
                body: message.body.clone(),
                timestamp: message.timestamp,
                from_me: message.from_me,
            });
        }
        data.messages
            .entry(message.chat_id.clone())
            .or_default()
            .push(message);
    }

    /// Attach raw bytes as the media of a message.
    pub fn add_media(&self, message_id: &str, mimetype: &str, bytes: &[u8]) {
        let payload = MediaPayload {
            mimetype: mimetype.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            filename: None,
        };
        self.lock().media.insert(message_id.to_string(), payload);
    }

    pub fn fail_start(&self, fail: bool) {
        self.lock().fail_start = fail;
    }

    pub fn fail_logout(&self, fail: bool) {
        self.lock().fail_logout = fail;
    }

    pub fn fail_media(&self, fail: bool) {
        self.lock().fail_media = fail;
    }

    pub fn fail_chats(&self, fail: bool) {
        self.lock().fail_chats = fail;
    }

    pub fn is_paired(&self) -> bool {
        self.lock().paired
    }

    /// Messages handed to the network so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }
}

/// Driver handle bound to a [`MemoryNetwork`].
pub struct MemoryDriver {
    serial: u64,
    network: Arc<MemoryNetwork>,
    events: EventSink,
    start_count: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryDriver {
    pub fn new(serial: u64, network: Arc<MemoryNetwork>, events: EventSink) -> Self {
        Self {
            serial,
            network,
            events,
            start_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Push an event as if it came from the network.
    pub fn emit(&self, event: DriverEvent) {
        if self.events.send(event).is_err() {
            debug!("memory driver {} has no listener", self.serial);
        }
    }

    /// Simulate the user scanning the pairing code.
    pub fn pair(&self, info: ClientInfo) {
        {
            let mut data = self.network.lock();
            data.paired = true;
            data.info = Some(info);
        }
        self.emit(DriverEvent::Authenticated);
        self.emit(DriverEvent::Ready);
    }

    /// Deliver an inbound message: stored in history and emitted.
    pub fn receive(&self, message: RawMessage) {
        self.network.add_message(message.clone());
        if message.from_me {
            self.emit(DriverEvent::MessageCreate { message });
        } else {
            self.emit(DriverEvent::Message { message });
        }
    }

    pub fn group_join(&self, chat_id: &str, recipient_ids: Vec<String>) {
        self.emit(DriverEvent::GroupJoin {
            notification: GroupNotification {
                chat_id: chat_id.to_string(),
                recipient_ids,
            },
        });
    }

    pub fn disconnect(&self, reason: &str) {
        self.emit(DriverEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Number of times `start` was called on this handle.
    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_closed() {
            Err(DriverError::Closed)
        } else {
            Ok(())
        }
    }

    fn record_sent(
        &self,
        chat_id: &str,
        body: &str,
        quoted_message_id: Option<String>,
    ) -> DeliveryReceipt {
        let receipt = DeliveryReceipt {
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now().timestamp(),
        };
        let own_id = self
            .network
            .lock()
            .info
            .as_ref()
            .map(|i| i.wid.clone())
            .unwrap_or_default();
        let message = RawMessage {
            id: receipt.message_id.clone(),
            chat_id: chat_id.to_string(),
            from: own_id,
            to: chat_id.to_string(),
            author: None,
            body: body.to_string(),
            timestamp: receipt.timestamp,
            from_me: true,
            kind: "chat".to_string(),
            has_media: false,
        };
        self.network.lock().sent.push(SentMessage {
            chat_id: chat_id.to_string(),
            body: body.to_string(),
            quoted_message_id,
            receipt: receipt.clone(),
        });
        self.receive(message);
        receipt
    }
}

#[async_trait]
impl MessagingDriver for MemoryDriver {
    async fn start(&self) -> DriverResult<()> {
        self.ensure_open()?;
        let attempt = self.start_count.fetch_add(1, Ordering::SeqCst) + 1;
        let (fail, paired) = {
            let data = self.network.lock();
            (data.fail_start, data.paired)
        };
        if fail {
            return Err(DriverError::other("memory network refused to start"));
        }

        if paired {
            self.emit(DriverEvent::LoadingScreen {
                percent: 100,
                message: "restoring session".to_string(),
            });
            self.emit(DriverEvent::Authenticated);
            self.emit(DriverEvent::Ready);
        } else {
            self.emit(DriverEvent::Qr {
                code: format!("memory-qr-{}-{}", self.serial, attempt),
            });
        }
        Ok(())
    }

    async fn logout(&self) -> DriverResult<()> {
        self.ensure_open()?;
        let mut data = self.network.lock();
        if data.fail_logout {
            return Err(DriverError::other("memory network refused to log out"));
        }
        data.paired = false;
        data.info = None;
        Ok(())
    }

    async fn shutdown(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn info(&self) -> DriverResult<Option<ClientInfo>> {
        let data = self.network.lock();
        Ok(if data.paired { data.info.clone() } else { None })
    }

    async fn chats(&self) -> DriverResult<Vec<ChatSummary>> {
        self.ensure_open()?;
        let data = self.network.lock();
        if data.fail_chats {
            return Err(DriverError::other("memory network failed to list chats"));
        }
        let mut chats = data.chats.clone();
        chats.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(chats)
    }

    async fn chat(&self, chat_id: &str) -> DriverResult<Option<ChatSummary>> {
        self.ensure_open()?;
        Ok(self
            .network
            .lock()
            .chats
            .iter()
            .find(|c| c.id == chat_id)
            .cloned())
    }

    async fn fetch_messages(&self, chat_id: &str, limit: usize) -> DriverResult<Vec<RawMessage>> {
        self.ensure_open()?;
        let data = self.network.lock();
        if !data.chats.iter().any(|c| c.id == chat_id) {
            return Err(DriverError::NotFound(format!("chat {chat_id}")));
        }
        let history = data.messages.get(chat_id).cloned().unwrap_or_default();
        let skip = history.len().saturating_sub(limit);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn contact(&self, contact_id: &str) -> DriverResult<Option<Contact>> {
        self.ensure_open()?;
        Ok(self.network.lock().contacts.get(contact_id).cloned())
    }

    async fn profile_pic_url(&self, contact_id: &str) -> DriverResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.network.lock().pictures.get(contact_id).cloned())
    }

    async fn send_message(&self, chat_id: &str, body: &str) -> DriverResult<DeliveryReceipt> {
        self.ensure_open()?;
        Ok(self.record_sent(chat_id, body, None))
    }

    async fn reply(&self, message: &RawMessage, body: &str) -> DriverResult<DeliveryReceipt> {
        self.ensure_open()?;
        Ok(self.record_sent(&message.chat_id, body, Some(message.id.clone())))
    }

    async fn download_media(&self, message_id: &str) -> DriverResult<Option<MediaPayload>> {
        self.ensure_open()?;
        let data = self.network.lock();
        if data.fail_media {
            return Err(DriverError::other("media download failed"));
        }
        Ok(data.media.get(message_id).cloned())
    }
}

/// Factory producing [`MemoryDriver`]s over one shared network.
pub struct MemoryDriverFactory {
    network: Arc<MemoryNetwork>,
    next_serial: AtomicU64,
    created: Mutex<Vec<Arc<MemoryDriver>>>,
}

impl MemoryDriverFactory {
    pub fn new(network: Arc<MemoryNetwork>) -> Self {
        Self {
            network,
            next_serial: AtomicU64::new(1),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn network(&self) -> &Arc<MemoryNetwork> {
        &self.network
    }

    /// Most recently created driver.
    pub fn latest(&self) -> Option<Arc<MemoryDriver>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Number of drivers created so far.
    pub fn created_count(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl DriverFactory for MemoryDriverFactory {
    fn create(&self, events: EventSink) -> DriverResult<Arc<dyn MessagingDriver>> {
        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        let driver = Arc::new(MemoryDriver::new(serial, self.network.clone(), events));
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(driver.clone());
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn driver(network: Arc<MemoryNetwork>) -> (MemoryDriver, mpsc::UnboundedReceiver<DriverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MemoryDriver::new(1, network, tx), rx)
    }

    #[tokio::test]
    async fn test_unpaired_start_issues_qr() {
        let (driver, mut rx) = driver(Arc::new(MemoryNetwork::new()));
        driver.start().await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(DriverEvent::Qr {
                code: "memory-qr-1-1".to_string()
            })
        );
        assert!(driver.info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_paired_start_becomes_ready() {
        let info = ClientInfo {
            wid: "1@c.us".to_string(),
            pushname: None,
            platform: None,
        };
        let (driver, mut rx) = driver(Arc::new(MemoryNetwork::paired(info.clone())));
        driver.start().await.unwrap();
        assert!(matches!(rx.recv().await, Some(DriverEvent::LoadingScreen { .. })));
        assert_eq!(rx.recv().await, Some(DriverEvent::Authenticated));
        assert_eq!(rx.recv().await, Some(DriverEvent::Ready));
        assert_eq!(driver.info().await.unwrap(), Some(info));
    }

    #[tokio::test]
    async fn test_fetch_messages_returns_latest() {
        let network = Arc::new(MemoryNetwork::demo());
        for i in 0..5 {
            network.add_message(RawMessage {
                id: format!("m{i}"),
                chat_id: "15550000001@c.us".to_string(),
                from: "15550000001@c.us".to_string(),
                to: "10000000000@c.us".to_string(),
                author: None,
                body: format!("message {i}"),
                timestamp: 100 + i,
                from_me: false,
                kind: "chat".to_string(),
                has_media: false,
            });
        }
        let (driver, _rx) = driver(network);
        let messages = driver.fetch_messages("15550000001@c.us", 2).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_send_records_and_emits_message_create() {
        let network = Arc::new(MemoryNetwork::demo());
        let (driver, mut rx) = driver(network.clone());
        let receipt = driver.send_message("15550000001@c.us", "hi").await.unwrap();

        let sent = network.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].receipt, receipt);
        match rx.recv().await {
            Some(DriverEvent::MessageCreate { message }) => {
                assert_eq!(message.id, receipt.message_id);
                assert!(message.from_me);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_driver_rejects_calls() {
        let (driver, _rx) = driver(Arc::new(MemoryNetwork::demo()));
        driver.shutdown().await.unwrap();
        assert!(matches!(
            driver.send_message("1@c.us", "x").await,
            Err(DriverError::Closed)
        ));
    }
}
