//! Lifecycle owner of the messaging driver.
//!
//! [`ClientAdapter`] holds at most one live driver handle. Driver events are
//! consumed by a single pump task per handle, translated into session state
//! changes and published on the [`EventHub`]. Each handle gets a generation
//! number; events and tasks belonging to an older generation are ignored.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::commands::{BotCommand, ChatFacts, CommandOptions};
use super::error::{ClientError, ClientResult};
use super::reconnect::ReconnectPolicy;
use crate::driver::{
    ChatSummary, ClientInfo, DeliveryReceipt, DriverError, DriverEvent, DriverFactory,
    EventSink, GROUP_SUFFIX, GroupNotification, MessagingDriver, RawMessage,
    normalize_recipient,
};
use crate::hub::{BridgeEvent, EventHub, EventKind, GroupChange, LoadingProgress, MessageRecord};

const UNKNOWN_SENDER: &str = "Unknown";
/// Command answers remembered so their echoes are not treated as commands.
const MAX_PENDING_BOT_REPLIES: usize = 32;

/// Default page size for chat history requests.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// History replay after the client becomes ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillOptions {
    pub enabled: bool,
    pub max_chats: usize,
    pub messages_per_chat: usize,
    /// Upper bound for each driver call made while backfilling.
    pub call_timeout_secs: u64,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chats: 25,
            messages_per_chat: DEFAULT_HISTORY_LIMIT,
            call_timeout_secs: 15,
        }
    }
}

/// Session artifacts removed on logout.
#[derive(Debug, Clone, Default)]
pub struct SessionPaths {
    pub auth_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub reconnect: ReconnectPolicy,
    pub backfill: BackfillOptions,
    pub commands: CommandOptions,
    pub session: SessionPaths,
    /// Pause between a logout and the next initialization.
    pub reinit_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            backfill: BackfillOptions::default(),
            commands: CommandOptions::default(),
            session: SessionPaths::default(),
            reinit_delay: Duration::from_millis(2_000),
        }
    }
}

/// Point-in-time view of the session flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    pub is_ready: bool,
    pub qr_code: Option<String>,
    pub is_authenticated: bool,
}

/// Connection summary for the status page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOverview {
    /// `online` or `offline`.
    pub status: String,
    pub is_connected: bool,
    pub info: Option<ClientInfo>,
    pub profile_pic_url: Option<String>,
}

impl ClientOverview {
    fn offline() -> Self {
        Self {
            status: "offline".to_string(),
            is_connected: false,
            info: None,
            profile_pic_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: Option<String>,
    pub pushname: Option<String>,
    pub number: Option<String>,
    pub profile_pic_url: Option<String>,
}

/// Compact message form used by chat listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub body: String,
    pub timestamp: i64,
    pub from: String,
    pub to: String,
}

impl From<RawMessage> for MessageView {
    fn from(message: RawMessage) -> Self {
        Self {
            id: message.id,
            body: message.body,
            timestamp: message.timestamp,
            from: message.from,
            to: message.to,
        }
    }
}

struct ActiveHandle {
    generation: u64,
    driver: Arc<dyn MessagingDriver>,
    /// Clone of the driver's sink, used to feed start failures back into the pump.
    sink: EventSink,
    /// Cancels the pump and every task spawned for this handle.
    cancel: CancellationToken,
}

#[derive(Default)]
struct SessionState {
    generation: u64,
    handle: Option<ActiveHandle>,
    ready: bool,
    authenticated: bool,
    pairing_code: Option<String>,
    reconnect_attempts: u32,
    backfill: Option<CancellationToken>,
    /// Ids of command answers still expected back as `message_create`.
    bot_replies: VecDeque<String>,
}

impl SessionState {
    fn current_generation(&self) -> Option<u64> {
        self.handle.as_ref().map(|h| h.generation)
    }

    fn reset_flags(&mut self) {
        self.ready = false;
        self.authenticated = false;
        self.pairing_code = None;
        self.reconnect_attempts = 0;
        if let Some(backfill) = self.backfill.take() {
            backfill.cancel();
        }
        self.bot_replies.clear();
    }
}

/// Owns the driver handle and the session state derived from its events.
pub struct ClientAdapter {
    factory: Arc<dyn DriverFactory>,
    hub: EventHub,
    options: ClientOptions,
    state: RwLock<SessionState>,
    /// Cancelled on shutdown; parent of every handle token.
    lifetime: CancellationToken,
}

impl ClientAdapter {
    pub fn new(factory: Arc<dyn DriverFactory>, hub: EventHub, options: ClientOptions) -> Arc<Self> {
        Arc::new(Self {
            factory,
            hub,
            options,
            state: RwLock::new(SessionState::default()),
            lifetime: CancellationToken::new(),
        })
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Create and start the driver unless one is already live.
    ///
    /// Calling this again while a handle exists returns that handle without
    /// creating a second one or registering handlers twice. A start failure
    /// is fed to the reconnect logic like a disconnect and reported here as
    /// [`ClientError::Upstream`].
    pub async fn initialize(self: &Arc<Self>) -> ClientResult<Arc<dyn MessagingDriver>> {
        if self.lifetime.is_cancelled() {
            debug!("client: initialize after shutdown ignored");
            return Err(ClientError::NotInitialized);
        }

        let (driver, sink) = {
            let mut state = self.state.write().await;
            if let Some(handle) = &state.handle {
                debug!(
                    "client: already initialized (generation {})",
                    handle.generation
                );
                return Ok(handle.driver.clone());
            }

            state.generation += 1;
            let generation = state.generation;
            let (tx, rx) = mpsc::unbounded_channel();
            let driver = self.factory.create(tx.clone())?;
            let cancel = self.lifetime.child_token();
            tokio::spawn(run_event_pump(
                Arc::downgrade(self),
                generation,
                rx,
                cancel.clone(),
            ));

            state.reset_flags();
            state.handle = Some(ActiveHandle {
                generation,
                driver: driver.clone(),
                sink: tx.clone(),
                cancel,
            });
            info!("client: created driver handle (generation {})", generation);
            (driver, tx)
        };

        if let Err(e) = driver.start().await {
            error!("client: failed to start driver: {}", e);
            report_start_failure(&sink, &e);
            return Err(e.into());
        }
        Ok(driver)
    }

    /// Send a text message to a contact or chat.
    pub async fn send_message(&self, recipient: &str, body: &str) -> ClientResult<DeliveryReceipt> {
        if recipient.trim().is_empty() {
            return Err(ClientError::validation("recipient is required"));
        }
        if body.trim().is_empty() {
            return Err(ClientError::validation("message body is required"));
        }

        let driver = {
            let state = self.state.read().await;
            let handle = state.handle.as_ref().ok_or(ClientError::NotInitialized)?;
            if !state.ready {
                return Err(ClientError::NotReady);
            }
            handle.driver.clone()
        };

        let chat_id = normalize_recipient(recipient);
        debug!("client: sending message to {}", chat_id);
        Ok(driver.send_message(&chat_id, body).await?)
    }

    pub async fn status(&self) -> ClientStatus {
        let state = self.state.read().await;
        ClientStatus {
            is_ready: state.ready && state.handle.is_some(),
            qr_code: state.pairing_code.clone(),
            is_authenticated: state.authenticated,
        }
    }

    pub async fn pairing_code(&self) -> Option<String> {
        self.state.read().await.pairing_code.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.handle.is_some()
    }

    /// Whether a handle exists and its session is authenticated.
    pub async fn is_logged_in(&self) -> bool {
        let state = self.state.read().await;
        state.handle.is_some() && state.authenticated
    }

    /// Generation of the live handle, if any.
    pub async fn generation(&self) -> Option<u64> {
        self.state.read().await.current_generation()
    }

    /// Log out, discard the handle and start over after the reinit delay.
    ///
    /// A failing driver logout still tears the session down; the failure is
    /// returned afterwards.
    pub async fn logout(self: &Arc<Self>) -> ClientResult<()> {
        let handle = {
            let mut state = self.state.write().await;
            let Some(handle) = state.handle.take() else {
                debug!("client: logout without a handle is a no-op");
                return Ok(());
            };
            state.reset_flags();
            handle
        };

        info!("client: logging out (generation {})", handle.generation);
        let result = handle.driver.logout().await;
        if let Err(e) = &result {
            error!("client: driver logout failed: {}", e);
        }
        self.teardown(handle).await;

        let cleared = self.hub.clear(EventKind::Message);
        debug!("client: dropped {} message subscriber(s)", cleared);
        self.hub.publish(&BridgeEvent::LoggedOut);

        self.remove_session_artifacts().await;
        self.schedule_reinit();

        result.map_err(ClientError::from)
    }

    /// Stop the driver for good, keeping stored credentials.
    pub async fn shutdown(&self) {
        self.lifetime.cancel();
        let handle = {
            let mut state = self.state.write().await;
            state.reset_flags();
            state.handle.take()
        };
        if let Some(handle) = handle {
            info!("client: shutting down (generation {})", handle.generation);
            self.teardown(handle).await;
        }
    }

    /// Own account info and avatar, when connected.
    pub async fn overview(&self) -> ClientOverview {
        let (driver, ready) = {
            let state = self.state.read().await;
            (state.handle.as_ref().map(|h| h.driver.clone()), state.ready)
        };
        let Some(driver) = driver.filter(|_| ready) else {
            return ClientOverview::offline();
        };

        let info = match driver.info().await {
            Ok(info) => info,
            Err(e) => {
                warn!("client: failed to read client info: {}", e);
                None
            }
        };
        let Some(info) = info else {
            return ClientOverview::offline();
        };
        let profile_pic_url = match driver.profile_pic_url(&info.wid).await {
            Ok(url) => url,
            Err(e) => {
                warn!("client: failed to read own profile picture: {}", e);
                None
            }
        };

        ClientOverview {
            status: "online".to_string(),
            is_connected: true,
            info: Some(info),
            profile_pic_url,
        }
    }

    pub async fn list_chats(&self) -> ClientResult<Vec<ChatSummary>> {
        Ok(self.driver().await?.chats().await?)
    }

    /// Most recent messages of a chat, oldest first.
    pub async fn chat_messages(&self, chat_id: &str, limit: usize) -> ClientResult<Vec<RawMessage>> {
        if chat_id.trim().is_empty() {
            return Err(ClientError::validation("chat id is required"));
        }
        let driver = self.driver().await?;
        Ok(driver.fetch_messages(chat_id.trim(), limit).await?)
    }

    /// Contact details with avatar; `None` for unknown users.
    pub async fn user_profile(&self, user_id: &str) -> ClientResult<Option<UserProfile>> {
        if user_id.trim().is_empty() {
            return Err(ClientError::validation("user id is required"));
        }
        let driver = self.driver().await?;
        let id = normalize_recipient(user_id);

        let Some(contact) = driver.contact(&id).await? else {
            return Ok(None);
        };
        let profile_pic_url = match driver.profile_pic_url(&id).await {
            Ok(url) => url,
            Err(e) => {
                warn!("client: failed to read profile picture of {}: {}", id, e);
                None
            }
        };

        Ok(Some(UserProfile {
            id: contact.id,
            name: contact.name,
            pushname: contact.pushname,
            number: contact.number,
            profile_pic_url,
        }))
    }

    async fn driver(&self) -> ClientResult<Arc<dyn MessagingDriver>> {
        self.state
            .read()
            .await
            .handle
            .as_ref()
            .map(|h| h.driver.clone())
            .ok_or(ClientError::NotInitialized)
    }

    async fn teardown(&self, handle: ActiveHandle) {
        handle.cancel.cancel();
        if let Err(e) = handle.driver.shutdown().await {
            warn!(
                "client: driver shutdown failed (generation {}): {}",
                handle.generation, e
            );
        }
    }

    async fn remove_session_artifacts(&self) {
        let session = &self.options.session;
        for dir in [&session.auth_dir, &session.cache_dir].into_iter().flatten() {
            match tokio::fs::remove_dir_all(dir).await {
                Ok(()) => info!("client: removed {}", dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("client: failed to remove {}: {}", dir.display(), e),
            }
        }
    }

    fn schedule_reinit(self: &Arc<Self>) {
        let adapter = Arc::clone(self);
        let delay = self.options.reinit_delay;
        let lifetime = self.lifetime.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = lifetime.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            debug!("client: re-initializing after logout");
            if let Err(e) = adapter.initialize().await {
                warn!("client: re-initialization failed: {}", e);
            }
        });
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.state.read().await.current_generation() == Some(generation)
    }

    /// Apply a state change if `generation` is still the live handle.
    async fn update_current(&self, generation: u64, apply: impl FnOnce(&mut SessionState)) -> bool {
        let mut state = self.state.write().await;
        if state.current_generation() != Some(generation) {
            return false;
        }
        apply(&mut *state);
        true
    }

    async fn handle_event(self: &Arc<Self>, generation: u64, event: DriverEvent) {
        let driver = {
            let state = self.state.read().await;
            match state.handle.as_ref().filter(|h| h.generation == generation) {
                Some(handle) => handle.driver.clone(),
                None => {
                    debug!("client: ignoring event from stale generation {}", generation);
                    return;
                }
            }
        };

        match event {
            DriverEvent::Qr { code } => {
                info!("client: pairing code received, waiting for scan");
                let stored = code.clone();
                if self
                    .update_current(generation, |s| {
                        s.pairing_code = Some(stored);
                        s.authenticated = false;
                        s.ready = false;
                    })
                    .await
                {
                    self.hub.publish(&BridgeEvent::Qr(code));
                }
            }
            DriverEvent::LoadingScreen { percent, message } => {
                debug!("client: loading {}% {}", percent, message);
                self.hub
                    .publish(&BridgeEvent::LoadingScreen(LoadingProgress { percent, message }));
            }
            DriverEvent::Authenticated => {
                info!("client: authenticated");
                if self
                    .update_current(generation, |s| {
                        s.authenticated = true;
                        s.pairing_code = None;
                    })
                    .await
                {
                    self.hub.publish(&BridgeEvent::Authenticated);
                }
            }
            DriverEvent::Ready => self.on_ready(generation, driver).await,
            DriverEvent::Disconnected { reason } => {
                warn!("client: disconnected: {}", reason);
                if self
                    .update_current(generation, |s| {
                        s.ready = false;
                        s.authenticated = false;
                        if let Some(backfill) = s.backfill.take() {
                            backfill.cancel();
                        }
                    })
                    .await
                {
                    self.hub.publish(&BridgeEvent::Disconnected { reason });
                    self.schedule_reconnect(generation).await;
                }
            }
            DriverEvent::AuthFailure { message } => {
                error!("client: authentication failed: {}", message);
                if self
                    .update_current(generation, |s| {
                        s.ready = false;
                        s.authenticated = false;
                    })
                    .await
                {
                    self.hub.publish(&BridgeEvent::AuthFailure { message });
                }
            }
            DriverEvent::Message { message } => {
                self.on_message(generation, &driver, message, false).await;
            }
            DriverEvent::MessageCreate { message } => {
                // Peer messages also surface as `message`.
                if message.from_me {
                    self.on_message(generation, &driver, message, true).await;
                }
            }
            DriverEvent::GroupJoin { notification } => {
                let change = self.group_change(&driver, notification).await;
                self.hub.publish(&BridgeEvent::GroupJoin(change));
            }
            DriverEvent::GroupLeave { notification } => {
                let change = self.group_change(&driver, notification).await;
                self.hub.publish(&BridgeEvent::GroupLeave(change));
            }
        }
    }

    async fn on_ready(self: &Arc<Self>, generation: u64, driver: Arc<dyn MessagingDriver>) {
        let backfill = {
            let mut state = self.state.write().await;
            let Some(handle) = state.handle.as_ref().filter(|h| h.generation == generation) else {
                return;
            };
            let token = handle.cancel.child_token();
            state.ready = true;
            state.authenticated = true;
            state.pairing_code = None;
            state.reconnect_attempts = 0;
            if let Some(previous) = state.backfill.replace(token.clone()) {
                previous.cancel();
            }
            token
        };
        info!("client: ready");

        let info = match driver.info().await {
            Ok(info) => info,
            Err(e) => {
                warn!("client: failed to read client info: {}", e);
                None
            }
        };
        self.hub.publish(&BridgeEvent::Ready(info));

        if self.options.backfill.enabled {
            tokio::spawn(Arc::clone(self).run_backfill(generation, driver, backfill));
        }
    }

    async fn on_message(
        &self,
        generation: u64,
        driver: &Arc<dyn MessagingDriver>,
        raw: RawMessage,
        own: bool,
    ) {
        let accepted = {
            let state = self.state.read().await;
            state.ready && state.current_generation() == Some(generation)
        };
        if !accepted {
            warn!("client: dropping message {} received while not ready", raw.id);
            return;
        }

        let (record, facts) = self.enrich(driver, &raw).await;
        let event = if own {
            BridgeEvent::MessageCreate(record)
        } else {
            BridgeEvent::Message(record)
        };
        self.hub.publish(&event);

        // Commands typed on the paired phone are answered too, but never the
        // bot's own answers.
        if own && self.take_bot_reply(&raw.id).await {
            return;
        }
        self.run_command(driver, &raw, &facts).await;
    }

    async fn take_bot_reply(&self, message_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.bot_replies.iter().position(|id| id == message_id) {
            Some(index) => {
                state.bot_replies.remove(index);
                true
            }
            None => false,
        }
    }

    /// Attach chat, sender and media details to a driver message.
    async fn enrich(
        &self,
        driver: &Arc<dyn MessagingDriver>,
        raw: &RawMessage,
    ) -> (MessageRecord, ChatFacts) {
        let chat = match driver.chat(&raw.chat_id).await {
            Ok(chat) => chat,
            Err(e) => {
                warn!("client: chat lookup for {} failed: {}", raw.chat_id, e);
                None
            }
        };
        let is_group = chat
            .as_ref()
            .map(|c| c.is_group)
            .unwrap_or_else(|| raw.chat_id.ends_with(GROUP_SUFFIX));
        let chat_name = chat
            .as_ref()
            .map(|c| c.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| raw.chat_id.clone());
        let participants = chat.as_ref().map(ChatSummary::participant_count).unwrap_or(1);

        let author = if is_group {
            raw.author
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| raw.from.clone())
        } else {
            raw.from.clone()
        };
        let sender_name = match driver.contact(&author).await {
            Ok(contact) => contact
                .as_ref()
                .and_then(|c| c.display_name())
                .unwrap_or(UNKNOWN_SENDER)
                .to_string(),
            Err(e) => {
                warn!("client: contact lookup for {} failed: {}", author, e);
                UNKNOWN_SENDER.to_string()
            }
        };

        let media = if raw.has_media {
            match driver.download_media(&raw.id).await {
                Ok(media) => media,
                Err(e) => {
                    warn!("client: media download for {} failed: {}", raw.id, e);
                    None
                }
            }
        } else {
            None
        };

        let record = MessageRecord {
            id: raw.id.clone(),
            chat_id: raw.chat_id.clone(),
            from: raw.from.clone(),
            to: raw.to.clone(),
            author,
            body: raw.body.clone(),
            timestamp: raw.timestamp,
            from_me: raw.from_me,
            kind: raw.kind.clone(),
            has_media: raw.has_media,
            is_group,
            sender_name,
            chat_name: chat_name.clone(),
            media,
        };
        let facts = ChatFacts {
            name: chat_name,
            is_group,
            participants,
        };
        (record, facts)
    }

    async fn run_command(&self, driver: &Arc<dyn MessagingDriver>, raw: &RawMessage, facts: &ChatFacts) {
        let commands = &self.options.commands;
        if !commands.enabled {
            return;
        }
        let Some(command) = BotCommand::parse(&commands.prefix, &raw.body) else {
            return;
        };

        info!("client: running {:?} command from {}", command, raw.from);
        let reply = command.reply(&commands.prefix, facts);
        match driver.reply(raw, &reply).await {
            Ok(receipt) => {
                let mut state = self.state.write().await;
                if state.bot_replies.len() >= MAX_PENDING_BOT_REPLIES {
                    state.bot_replies.pop_front();
                }
                state.bot_replies.push_back(receipt.message_id);
            }
            Err(e) => warn!("client: failed to answer {:?} command: {}", command, e),
        }
    }

    async fn group_change(
        &self,
        driver: &Arc<dyn MessagingDriver>,
        notification: GroupNotification,
    ) -> GroupChange {
        let group_name = match driver.chat(&notification.chat_id).await {
            Ok(Some(chat)) => chat.name,
            Ok(None) => notification.chat_id.clone(),
            Err(e) => {
                warn!("client: group lookup for {} failed: {}", notification.chat_id, e);
                notification.chat_id.clone()
            }
        };
        GroupChange {
            chat_id: notification.chat_id,
            group_name,
            participants: notification.recipient_ids,
        }
    }

    async fn schedule_reconnect(&self, generation: u64) {
        let (attempt, driver, sink, cancel) = {
            let mut state = self.state.write().await;
            let Some(handle) = state.handle.as_ref().filter(|h| h.generation == generation) else {
                return;
            };
            let driver = handle.driver.clone();
            let sink = handle.sink.clone();
            let cancel = handle.cancel.clone();
            state.reconnect_attempts += 1;
            (state.reconnect_attempts, driver, sink, cancel)
        };

        let Some(delay) = self.options.reconnect.delay_for(attempt) else {
            let attempts = self.options.reconnect.max_attempts;
            error!("client: giving up after {} reconnect attempt(s)", attempts);
            self.hub.publish(&BridgeEvent::ReconnectFailed { attempts });
            return;
        };

        info!("client: reconnect attempt {} in {:?}", attempt, delay);
        self.hub.publish(&BridgeEvent::Reconnecting {
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        // Failures loop back through the pump as disconnects.
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            debug!("client: reconnect attempt {} starting", attempt);
            if let Err(e) = driver.start().await {
                warn!("client: reconnect attempt {} failed: {}", attempt, e);
                report_start_failure(&sink, &e);
            }
        });
    }

    async fn run_backfill(
        self: Arc<Self>,
        generation: u64,
        driver: Arc<dyn MessagingDriver>,
        cancel: CancellationToken,
    ) {
        let options = &self.options.backfill;
        let call_timeout = Duration::from_secs(options.call_timeout_secs);

        let chats = tokio::select! {
            () = cancel.cancelled() => return,
            result = timeout(call_timeout, driver.chats()) => result,
        };
        let chats = match chats {
            Ok(Ok(chats)) => chats,
            Ok(Err(e)) => {
                warn!("client: backfill could not list chats: {}", e);
                return;
            }
            Err(_) => {
                warn!("client: backfill timed out listing chats");
                return;
            }
        };

        let mut replayed = 0usize;
        let mut visited = 0usize;
        for chat in chats.into_iter().take(options.max_chats) {
            visited += 1;
            let fetched = tokio::select! {
                () = cancel.cancelled() => return,
                result = timeout(
                    call_timeout,
                    driver.fetch_messages(&chat.id, options.messages_per_chat),
                ) => result,
            };
            let messages = match fetched {
                Ok(Ok(messages)) => messages,
                Ok(Err(e)) => {
                    warn!("client: backfill of {} failed: {}", chat.id, e);
                    continue;
                }
                Err(_) => {
                    warn!("client: backfill of {} timed out", chat.id);
                    continue;
                }
            };

            for raw in messages {
                if cancel.is_cancelled() || !self.is_current(generation).await {
                    debug!("client: backfill cancelled");
                    return;
                }
                let (record, _) = self.enrich(&driver, &raw).await;
                let event = if raw.from_me {
                    BridgeEvent::MessageCreate(record)
                } else {
                    BridgeEvent::Message(record)
                };
                self.hub.publish(&event);
                replayed += 1;
            }
        }
        info!(
            "client: backfilled {} message(s) from {} chat(s)",
            replayed, visited
        );
    }
}

async fn run_event_pump(
    adapter: Weak<ClientAdapter>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<DriverEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(adapter) = adapter.upgrade() else {
            break;
        };
        adapter.handle_event(generation, event).await;
    }
    debug!("client: event pump for generation {} stopped", generation);
}

fn report_start_failure(sink: &EventSink, err: &DriverError) {
    let reason = format!("start failed: {err}");
    if sink.send(DriverEvent::Disconnected { reason }).is_err() {
        debug!("client: event pump gone, start failure not reported");
    }
}
