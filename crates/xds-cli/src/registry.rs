//! Event subscription registry.
//!
//! Maps an event type to the ordered list of local handlers interested in
//! it. The event channel reader calls [`EventRegistry::dispatch`] once per
//! envelope, in arrival order, from a single task. Handlers must not block.
//! A panicking handler is logged and skipped; the remaining handlers and
//! later envelopes are still delivered.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{trace, warn};
use xds_proto::EventEnvelope;

/// Event handler.
pub type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Subscription table shared by the event channel and its consumers.
#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<HashMap<String, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventRegistry")
            .field("event_types", &handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl EventRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attaches `handler` to `event_type`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped.
    #[must_use = "dropping the subscription unregisters the handler"]
    pub fn subscribe<F>(self: &Arc<Self>, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(event_type, id, "handler registered");

        Subscription {
            registry: Arc::downgrade(self),
            event_type: event_type.to_string(),
            id,
        }
    }

    fn unsubscribe(&self, event_type: &str, id: u64) {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(event_type) {
            list.retain(|(hid, _)| *hid != id);
            if list.is_empty() {
                handlers.remove(event_type);
            }
        }
    }

    /// Number of handlers attached to `event_type`.
    #[must_use]
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.read().get(event_type).map_or(0, Vec::len)
    }

    /// Invokes every handler of the envelope's type, in registration order.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe while running.
        let snapshot: Vec<Handler> = self
            .handlers
            .read()
            .get(&envelope.event_type)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        trace!(event_type = %envelope.event_type, handlers = snapshot.len(), "dispatch");

        snapshot
            .iter()
            .filter(|handler| {
                let ok = catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_ok();
                if !ok {
                    warn!(event_type = %envelope.event_type, "event handler panicked");
                }
                ok
            })
            .count()
    }
}

/// Registration guard returned by [`EventRegistry::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<EventRegistry>,
    event_type: String,
    id: u64,
}

impl Subscription {
    /// Event type this subscription listens to.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.event_type, self.id);
        }
    }
}
