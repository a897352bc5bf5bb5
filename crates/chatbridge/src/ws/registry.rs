//! Registry of open browser sockets.

use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::hub::BridgeEvent;

/// Default size of the per-socket send buffer.
pub const CONNECTION_BUFFER_SIZE: usize = 64;

/// Sender half for frames destined to one socket.
pub type SocketSender = mpsc::Sender<BridgeEvent>;

/// A freshly registered socket.
pub struct Registration {
    pub id: u64,
    pub sender: SocketSender,
    pub frames: mpsc::Receiver<BridgeEvent>,
}

/// Tracks every open socket and its outbound buffer.
pub struct SocketRegistry {
    connections: DashMap<u64, SocketSender>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for SocketRegistry {
    fn default() -> Self {
        Self::new(CONNECTION_BUFFER_SIZE)
    }
}

impl SocketRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub fn register(&self) -> Registration {
        let (sender, frames) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.connections.insert(id, sender.clone());
        info!("Registered WebSocket connection {}", id);
        Registration { id, sender, frames }
    }

    pub fn unregister(&self, id: u64) {
        if self.connections.remove(&id).is_some() {
            info!("Unregistered WebSocket connection {}", id);
        }
    }

    /// Queue an event for every open socket.
    ///
    /// Sockets whose receiver is gone are dropped from the registry; a full
    /// buffer loses the frame. Returns how many sockets accepted it.
    pub fn broadcast(&self, event: &BridgeEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.connections.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "WebSocket connection {} is lagging, dropping '{}'",
                        entry.key(),
                        event.name()
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            debug!("Skipping closed WebSocket connection {}", id);
            self.connections.remove(&id);
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
