//! The per-node root that wires stores, contexts and the id registry together.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::broadcast::InvalidationBroadcaster;
use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::coordinator::SessionCoordinator;
use crate::error::Result;
use crate::ids::cluster_id_of;
use crate::record::SessionContext;
use crate::registry::ClusterIdRegistry;
use crate::store::BackingStore;

/// One application node: a shared store, an id registry, and one
/// coordinator per session-handling context.
///
/// Construct one per process and pass it (or its coordinators) to request
/// handling code explicitly.
pub struct SessionNode {
    config: NodeConfig,
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<ClusterIdRegistry>,
    broadcaster: Arc<InvalidationBroadcaster>,
    contexts: Mutex<HashMap<SessionContext, Arc<SessionCoordinator>>>,
}

impl SessionNode {
    pub fn new(config: NodeConfig, store: Arc<dyn BackingStore>, clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(ClusterIdRegistry::new(
            store.clone(),
            config.id_cache_capacity,
        ));
        info!(node = %config.node_id, "Session node started");
        Self {
            config,
            store,
            clock,
            registry,
            broadcaster: Arc::new(InvalidationBroadcaster::new()),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ClusterIdRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<InvalidationBroadcaster> {
        &self.broadcaster
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The coordinator for `context`, created on first use.
    pub fn context(&self, context: SessionContext) -> Arc<SessionCoordinator> {
        let mut contexts = self.contexts.lock();
        if let Some(existing) = contexts.get(&context) {
            return existing.clone();
        }

        let coordinator = Arc::new(
            SessionCoordinator::new(
                self.config.coordinator(context.clone()),
                self.store.clone(),
                self.clock.clone(),
            )
            .with_broadcaster(self.broadcaster.clone()),
        );
        self.broadcaster.register(&coordinator);
        contexts.insert(context, coordinator.clone());
        coordinator
    }

    /// Stop a context: drop its cached handles and stop notifying it.
    pub fn close_context(&self, context: &SessionContext) -> bool {
        let Some(coordinator) = self.contexts.lock().remove(context) else {
            return false;
        };
        self.broadcaster.unregister(context);
        coordinator.shutdown();
        true
    }

    /// Contexts currently open on this node.
    pub fn contexts(&self) -> Vec<SessionContext> {
        self.contexts.lock().keys().cloned().collect()
    }

    /// Release a cluster id and make every local context drop it.
    ///
    /// Stored session records are left to each context's own removal path.
    /// Returns how many contexts held a cached copy.
    pub fn invalidate_all(&self, id: &str) -> Result<usize> {
        let cluster_id = cluster_id_of(id);
        self.registry.unregister(cluster_id)?;
        let evicted = self.broadcaster.broadcast(cluster_id);
        info!(cluster_id = %cluster_id, evicted, "Session invalidated on all contexts");
        Ok(evicted)
    }

    /// Stop every context. Stored sessions are untouched.
    pub fn shutdown(&self) -> usize {
        let contexts: Vec<_> = self.contexts.lock().drain().collect();
        let mut dropped = 0;
        for (context, coordinator) in contexts {
            self.broadcaster.unregister(&context);
            dropped += coordinator.shutdown();
        }
        info!(node = %self.config.node_id, dropped, "Session node stopped");
        dropped
    }
}

impl fmt::Debug for SessionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionNode")
            .field("node_id", &self.config.node_id)
            .field("contexts", &self.contexts.lock().len())
            .finish_non_exhaustive()
    }
}
