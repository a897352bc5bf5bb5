//! Hub subscriptions feeding browser sockets.

use anyhow::anyhow;
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::error::TrySendError;

use super::registry::{SocketRegistry, SocketSender};
use crate::hub::{BridgeEvent, EventHub, EventKind, Subscription};

/// Hub callback pushing events into one socket's buffer.
pub(crate) fn forward_to(
    socket_id: u64,
    sender: SocketSender,
) -> impl Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync + 'static {
    move |event| match sender.try_send(event.clone()) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err(anyhow!(
            "WebSocket connection {socket_id} is lagging, frame dropped"
        )),
        Err(TrySendError::Closed(_)) => {
            Err(anyhow!("WebSocket connection {socket_id} is closed"))
        }
    }
}

/// Per-socket subscriptions used in subscription mode.
///
/// Logout drops every message subscription; the status callback takes a
/// fresh one as soon as it sees `LoggedOut`, whether or not the frame fits
/// in the socket's buffer.
pub(crate) struct SocketSubscriptions {
    #[allow(dead_code)]
    inner: Arc<SocketInner>,
}

struct SocketInner {
    hub: EventHub,
    socket_id: u64,
    sender: SocketSender,
    message: Mutex<Option<Subscription>>,
    status: Mutex<Option<Subscription>>,
}

impl SocketSubscriptions {
    pub(crate) fn new(hub: &EventHub, socket_id: u64, sender: SocketSender) -> Self {
        let inner = Arc::new(SocketInner {
            hub: hub.clone(),
            socket_id,
            sender,
            message: Mutex::new(None),
            status: Mutex::new(None),
        });
        inner.subscribe_messages();

        let weak = Arc::downgrade(&inner);
        let forward = forward_to(socket_id, inner.sender.clone());
        let status = hub.subscribe(EventKind::Status, move |event| {
            if matches!(event, BridgeEvent::LoggedOut)
                && let Some(inner) = weak.upgrade()
            {
                debug!(
                    "Renewing message subscription for WebSocket connection {}",
                    inner.socket_id
                );
                inner.subscribe_messages();
            }
            forward(event)
        });
        *inner.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        Self { inner }
    }
}

impl SocketInner {
    fn subscribe_messages(&self) {
        let subscription = self.hub.subscribe(
            EventKind::Message,
            forward_to(self.socket_id, self.sender.clone()),
        );
        let previous = self
            .message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscription);
        drop(previous);
    }
}

/// Fan-out used in broadcast mode: one hub subscription per kind, delivered
/// to every registered socket.
pub struct BroadcastRelay {
    hub: EventHub,
    sockets: Arc<SocketRegistry>,
    message: Mutex<Option<Subscription>>,
    status: Mutex<Option<Subscription>>,
}

impl BroadcastRelay {
    pub fn install(hub: &EventHub, sockets: Arc<SocketRegistry>) -> Arc<Self> {
        let relay = Arc::new(Self {
            hub: hub.clone(),
            sockets,
            message: Mutex::new(None),
            status: Mutex::new(None),
        });
        relay.subscribe_messages();

        let weak = Arc::downgrade(&relay);
        let status = hub.subscribe(EventKind::Status, move |event| {
            let Some(relay) = weak.upgrade() else {
                return Ok(());
            };
            relay.sockets.broadcast(event);
            if matches!(event, BridgeEvent::LoggedOut) {
                relay.subscribe_messages();
            }
            Ok(())
        });
        *relay.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        relay
    }

    fn subscribe_messages(&self) {
        let sockets = self.sockets.clone();
        let subscription = self.hub.subscribe(EventKind::Message, move |event| {
            sockets.broadcast(event);
            Ok(())
        });
        let previous = self
            .message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscription);
        drop(previous);
    }
}
