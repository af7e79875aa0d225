//! Last-known endpoint snapshot and the diff between snapshots.

use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{Endpoint, EndpointId, EndpointMap};

/// Result of comparing two snapshots.  Each bucket is sorted by ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<Endpoint>,
    pub removed: Vec<Endpoint>,
    pub changed: Vec<Endpoint>,
}

impl Diff {
    /// Compares `current` against `previous`.  Endpoints present in both
    /// with equal details produce no entry.
    pub fn compute(previous: &EndpointMap, current: &EndpointMap) -> Self {
        let mut diff = Diff::default();

        for (id, endpoint) in current {
            match previous.get(id) {
                None => diff.added.push(endpoint.clone()),
                Some(old) if old.details != endpoint.details => {
                    diff.changed.push(endpoint.clone())
                }
                Some(_) => {}
            }
        }
        for (id, endpoint) in previous {
            if !current.contains_key(id) {
                diff.removed.push(endpoint.clone());
            }
        }

        diff.added.sort_by(|a, b| a.id.cmp(&b.id));
        diff.removed.sort_by(|a, b| a.id.cmp(&b.id));
        diff.changed.sort_by(|a, b| a.id.cmp(&b.id));
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Holds the snapshot of the last successful cycle.
///
/// The poller is the only writer.  Readers get an `Arc` to a complete
/// snapshot and never see a half-built one.
#[derive(Debug, Default)]
pub struct EndpointStore {
    current: RwLock<Arc<EndpointMap>>,
}

impl EndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<EndpointMap> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Current endpoints, sorted by ID.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.snapshot().values().cloned().collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }

    pub fn get(&self, id: &EndpointId) -> Option<Endpoint> {
        self.snapshot().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Diffs `current` against the held snapshot and swaps it in.
    pub(crate) fn replace(&self, current: EndpointMap) -> Diff {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let diff = Diff::compute(&guard, &current);
        *guard = Arc::new(current);
        diff
    }
}
