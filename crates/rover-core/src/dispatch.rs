//! Named publish/subscribe hub.
//!
//! # Overview (for beginners)
//!
//! Components that produce events (the connection loop, the data-channel
//! manager) should not need to know who consumes them (a HUD, a logger, the
//! state receiver).  The [`EventHub`] sits between them:
//!
//! ```text
//! producer ──publish("state", ev)──► EventHub ──► handler A
//!                                              ├─► handler B  (panics → logged, skipped)
//!                                              └─► handler C
//! ```
//!
//! A handler that panics is caught at the dispatch site and logged; the
//! remaining handlers still run and the publisher never sees the panic.
//!
//! Handlers are called *after* the internal lock has been released, so a
//! handler may itself subscribe, unsubscribe, or publish without deadlocking.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

/// Handle returned by [`EventHub::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Events that know their own dispatch name.
pub trait NamedEvent {
    fn event_name(&self) -> &'static str;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A thread-safe, clonable event hub.
///
/// Cloning yields another handle onto the same subscriber table.
pub struct EventHub<E> {
    handlers: Arc<RwLock<HashMap<String, Vec<(SubscriptionId, Handler<E>)>>>>,
    next_id: Arc<AtomicU64>,
}

impl<E> Clone for EventHub<E> {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl<E> std::fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let counts: HashMap<&str, usize> =
            handlers.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("EventHub").field("handlers", &counts).finish()
    }
}

impl<E> EventHub<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events published under `name`.
    ///
    /// Unknown names are created on first use.
    pub fn subscribe<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a subscription.  Returns `false` if it was not registered.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(bucket) = handlers.get_mut(name) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|(sid, _)| *sid != id);
        bucket.len() != before
    }

    /// Number of handlers currently registered under `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.handlers.read().get(name).map_or(0, Vec::len)
    }

    /// Delivers `event` to every handler registered under `name`.
    ///
    /// Returns how many handlers completed without panicking.
    pub fn publish(&self, name: &str, event: &E) -> usize {
        let snapshot: Vec<Handler<E>> = match self.handlers.read().get(name) {
            Some(bucket) => bucket.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(event = name, %reason, "event handler panicked");
                }
            }
        }
        delivered
    }
}

impl<E: NamedEvent> EventHub<E> {
    /// Publishes `event` under its own [`NamedEvent::event_name`].
    pub fn emit(&self, event: &E) -> usize {
        self.publish(event.event_name(), event)
    }
}
