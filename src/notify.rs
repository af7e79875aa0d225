//! Subscriber contract and diff delivery.
//!
//! Delivery is synchronous: the poller does not start the next diff
//! until every subscriber has returned.  A slow subscriber therefore
//! stalls discovery, so subscriber work should stay non-blocking.

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use crate::store::{Diff, EndpointStore};
use crate::types::{Endpoint, EndpointMap};

/// Consumer of endpoint changes.
pub trait Notifier: Send + Sync {
    fn on_add(&self, added: &[Endpoint]);
    fn on_remove(&self, removed: &[Endpoint]);
    fn on_change(&self, changed: &[Endpoint]);
}

/// Delivers diffs to registered notifiers in registration order.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: Mutex<Vec<Arc<dyn Notifier>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a notifier.  It first receives the current snapshot as
    /// one `on_add`, then every later non-empty diff.
    ///
    /// Must not be called from inside a notifier callback.
    pub fn subscribe(&self, store: &EndpointStore, notifier: Arc<dyn Notifier>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = store.endpoints();
        if !existing.is_empty() {
            notifier.on_add(&existing);
        }
        subscribers.push(notifier);
        debug!("Registered notifier ({} total)", subscribers.len());
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swaps `current` into the store and delivers the resulting diff.
    /// Holding the subscriber lock across both keeps late subscribers
    /// from seeing a change twice or missing it.
    pub(crate) fn publish(&self, store: &EndpointStore, current: EndpointMap) -> Diff {
        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let diff = store.replace(current);
        deliver(&subscribers, &diff);
        diff
    }
}

fn deliver(subscribers: &[Arc<dyn Notifier>], diff: &Diff) {
    for subscriber in subscribers {
        if !diff.added.is_empty() {
            subscriber.on_add(&diff.added);
        }
        if !diff.removed.is_empty() {
            subscriber.on_remove(&diff.removed);
        }
        if !diff.changed.is_empty() {
            subscriber.on_change(&diff.changed);
        }
    }
}

/// Logs every change as JSON.  Used by the daemon binary.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    fn log(&self, kind: &str, endpoints: &[Endpoint]) {
        for endpoint in endpoints {
            match serde_json::to_string(endpoint) {
                Ok(json) => info!("Endpoint {}: {}", kind, json),
                Err(e) => warn!("Failed to serialize endpoint {}: {}", endpoint.id, e),
            }
        }
    }
}

impl Notifier for LoggingNotifier {
    fn on_add(&self, added: &[Endpoint]) {
        self.log("added", added);
    }

    fn on_remove(&self, removed: &[Endpoint]) {
        self.log("removed", removed);
    }

    fn on_change(&self, changed: &[Endpoint]) {
        self.log("changed", changed);
    }
}
