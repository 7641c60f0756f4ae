//! Node-local cache of active session handles.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::handle::SessionHandle;

/// Mapping from cluster id to the handle this node is serving.
///
/// The cache's mutex doubles as the coordination lock: the coordinator holds
/// a [`CacheGuard`] across every store call it makes for a session. The lock
/// is not reentrant, so code holding a guard must not call back into any
/// method on this type.
#[derive(Debug, Default)]
pub struct LocalSessionCache {
    entries: Mutex<HashMap<String, SessionHandle>>,
}

impl LocalSessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the coordination lock.
    pub fn lock(&self) -> CacheGuard<'_> {
        CacheGuard {
            entries: self.entries.lock(),
        }
    }

    /// Number of cached handles.
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Copy of the current mapping.
    pub fn snapshot(&self) -> HashMap<String, SessionHandle> {
        self.entries.lock().clone()
    }

    pub fn get(&self, cluster_id: &str) -> Option<SessionHandle> {
        self.lock().get(cluster_id)
    }

    pub fn put(&self, cluster_id: &str, handle: SessionHandle) -> Option<SessionHandle> {
        self.lock().put(cluster_id, handle)
    }

    pub fn remove(&self, cluster_id: &str) -> Option<SessionHandle> {
        self.lock().remove(cluster_id)
    }
}

/// Exclusive access to the cache for the span of one coordinated operation.
pub struct CacheGuard<'a> {
    entries: MutexGuard<'a, HashMap<String, SessionHandle>>,
}

impl CacheGuard<'_> {
    pub fn get(&self, cluster_id: &str) -> Option<SessionHandle> {
        self.entries.get(cluster_id).cloned()
    }

    /// Insert a handle, evicting whatever handle it replaces.
    pub fn put(&mut self, cluster_id: &str, handle: SessionHandle) -> Option<SessionHandle> {
        let previous = self.entries.insert(cluster_id.to_string(), handle.clone());
        if let Some(old) = &previous {
            if !old.ptr_eq(&handle) {
                old.with_inner(|inner| inner.mark_evicted());
            }
        }
        trace!(cluster_id = %cluster_id, cache_size = self.entries.len(), "Handle cached");
        previous
    }

    /// Remove and evict the handle for `cluster_id`.
    pub fn remove(&mut self, cluster_id: &str) -> Option<SessionHandle> {
        let removed = self.entries.remove(cluster_id);
        if let Some(handle) = &removed {
            handle.with_inner(|inner| inner.mark_evicted());
            trace!(cluster_id = %cluster_id, "Handle evicted");
        }
        removed
    }

    /// Evict every handle.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, handle) in self.entries.drain() {
            handle.with_inner(|inner| inner.mark_evicted());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
