//! Fan-out of local evictions to every session context on this node.
//!
//! One session id can be cached by several contexts on the same node. When a
//! session is invalidated, each of them must drop its copy. Other nodes are
//! not notified; they discover the removal on their next store read.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::record::SessionContext;

/// Something holding cached session copies that can drop them on request.
pub trait LocalEvictor: Send + Sync {
    /// The context this evictor serves.
    fn context(&self) -> &SessionContext;

    /// Drop any cached copy of `cluster_id`. Returns whether one was held.
    ///
    /// Must not touch the backing store.
    fn evict_local(&self, cluster_id: &str) -> bool;
}

/// Registry of local contexts to notify on invalidation.
///
/// Holds weak references so a dropped context unregisters itself.
#[derive(Default)]
pub struct InvalidationBroadcaster {
    contexts: RwLock<Vec<Weak<dyn LocalEvictor>>>,
}

impl InvalidationBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: LocalEvictor + 'static>(&self, evictor: &Arc<E>) {
        let evictor: Arc<dyn LocalEvictor> = evictor.clone();
        debug!(context = %evictor.context(), "Context registered for invalidation");
        self.contexts.write().push(Arc::downgrade(&evictor));
    }

    /// Stop notifying the evictor serving `context`.
    pub fn unregister(&self, context: &SessionContext) {
        self.contexts.write().retain(|weak| match weak.upgrade() {
            Some(evictor) => evictor.context() != context,
            None => false,
        });
    }

    /// Tell every live context to drop `cluster_id`.
    ///
    /// Returns how many contexts actually held a copy. The registry lock is
    /// released before any evictor runs, so evictors may take their own locks.
    pub fn broadcast(&self, cluster_id: &str) -> usize {
        let live: Vec<Arc<dyn LocalEvictor>> = {
            let mut contexts = self.contexts.write();
            contexts.retain(|weak| weak.strong_count() > 0);
            contexts.iter().filter_map(|weak| weak.upgrade()).collect()
        };

        let evicted = live
            .iter()
            .filter(|evictor| evictor.evict_local(cluster_id))
            .count();

        debug!(
            cluster_id = %cluster_id,
            contexts = live.len(),
            evicted,
            "Invalidation broadcast"
        );
        evicted
    }

    /// Number of live registered contexts.
    pub fn len(&self) -> usize {
        self.contexts
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
