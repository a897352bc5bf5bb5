//! Process-wide event hub.
//!
//! Producers (the client adapter) publish [`BridgeEvent`]s; consumers (the
//! WebSocket relay, tests) subscribe per [`EventKind`]. Callbacks run
//! synchronously on the publishing task, in registration order. A callback
//! that errors or panics is logged and skipped; the others still run.

mod types;

pub use types::{BridgeEvent, EventKind, GroupChange, LoadingProgress, MessageRecord};

use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<EventKind, BTreeMap<u64, Callback>>>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<EventKind, BTreeMap<u64, Callback>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, kind: EventKind, id: u64) -> bool {
        self.lock()
            .get_mut(&kind)
            .map(|subs| subs.remove(&id).is_some())
            .unwrap_or(false)
    }
}

/// Publish/subscribe registry keyed by event kind.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one kind of event.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped, or the kind is cleared.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&BridgeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .lock()
            .entry(kind)
            .or_default()
            .insert(id, Arc::new(callback));
        debug!("hub: subscriber {} registered for {:?}", id, kind);

        Subscription {
            hub: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Deliver an event to every subscriber of its kind.
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, event: &BridgeEvent) -> usize {
        let kind = event.kind();
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<(u64, Callback)> = self
            .inner
            .lock()
            .get(&kind)
            .map(|subs| subs.iter().map(|(id, cb)| (*id, cb.clone())).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        "hub: subscriber {} failed on '{}': {}",
                        id,
                        event.name(),
                        e
                    );
                }
                Err(_) => {
                    warn!("hub: subscriber {} panicked on '{}'", id, event.name());
                }
            }
        }
        delivered
    }

    /// Drop every subscription of a kind.
    pub fn clear(&self, kind: EventKind) -> usize {
        let removed = self
            .inner
            .lock()
            .remove(&kind)
            .map(|subs| subs.len())
            .unwrap_or(0);
        debug!("hub: cleared {} subscriber(s) for {:?}", removed, kind);
        removed
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.lock().get(&kind).map(|s| s.len()).unwrap_or(0)
    }
}

/// Token for a registered callback.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    hub: Weak<HubInner>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Remove the callback now.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    /// Whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.hub
            .upgrade()
            .map(|hub| {
                hub.lock()
                    .get(&self.kind)
                    .is_some_and(|subs| subs.contains_key(&self.id))
            })
            .unwrap_or(false)
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade()
            && hub.remove(self.kind, self.id)
        {
            debug!("hub: subscriber {} removed from {:?}", self.id, self.kind);
        }
    }
}
