//! The per-context session coordinator.
//!
//! Every cache mutation and every session read or write against the backing
//! store happens while holding the cache's coordination lock. Per cluster id,
//! local operations are therefore totally ordered. Across nodes the store
//! keeps whichever write lands last; staleness of a cached handle is bounded
//! by the save interval, not eliminated.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::broadcast::{InvalidationBroadcaster, LocalEvictor};
use crate::cache::LocalSessionCache;
use crate::clock::Clock;
use crate::config::CoordinatorConfig;
use crate::error::Result;
use crate::handle::{HandleState, SessionHandle};
use crate::record::{SessionContext, SessionRecord};
use crate::store::BackingStore;

/// Counters describing how the coordinator has served requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Handles currently cached.
    pub cached: usize,
    /// Acquires answered from the cache without a store read.
    pub hits: u64,
    /// Acquires that went to the store.
    pub misses: u64,
    /// Acquires that took ownership of a record and wrote it back.
    pub handoffs: u64,
    /// Write-backs at request completion.
    pub write_backs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    handoffs: AtomicU64,
    write_backs: AtomicU64,
}

/// Loads, caches, writes back and evicts the sessions of one context.
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn BackingStore>,
    cache: LocalSessionCache,
    clock: Arc<dyn Clock>,
    broadcaster: Option<Arc<InvalidationBroadcaster>>,
    counters: Counters,
}

impl SessionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn BackingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            cache: LocalSessionCache::new(),
            clock,
            broadcaster: None,
            counters: Counters::default(),
        }
    }

    /// Fan invalidations out through `broadcaster`.
    pub fn with_broadcaster(mut self, broadcaster: Arc<InvalidationBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.cache.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the local cache, keyed by cluster id.
    pub fn cached(&self) -> std::collections::HashMap<String, SessionHandle> {
        self.cache.snapshot()
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            cached: self.cache.size(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            handoffs: self.counters.handoffs.load(Ordering::Relaxed),
            write_backs: self.counters.write_backs.load(Ordering::Relaxed),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Load / Create
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve `cluster_id` to a live handle.
    ///
    /// A cached handle this node read, wrote or handed off within the last
    /// save interval is returned as-is.
    /// Otherwise the store is consulted. Returns `None` when the session does
    /// not exist or has expired, whether or not a copy was cached.
    ///
    /// If the stored record was last written by another node, or this node
    /// holds no handle for it, the record is claimed for this node and written
    /// back before the handle is returned.
    pub fn acquire(&self, cluster_id: &str) -> Result<Option<SessionHandle>> {
        let key = self.config.context.key(cluster_id)?;
        let interval = self.config.save_interval_ms();
        let now = self.clock.now_millis();

        let mut cache = self.cache.lock();
        let local = cache.get(cluster_id);

        if let Some(handle) = &local {
            let (expired, fresh) = handle.with_inner(|inner| {
                (inner.record.is_expired(now), inner.is_fresh(now, interval))
            });
            if expired {
                debug!(cluster_id = %cluster_id, "Cached session expired");
                cache.remove(cluster_id);
                return Ok(None);
            }
            if fresh {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(cluster_id = %cluster_id, "Session served from cache");
                return Ok(Some(handle.clone()));
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(cluster_id = %cluster_id, cached = local.is_some(), "Loading session from store");

        let Some(mut record) = self.store.read_session(&key)? else {
            if local.is_some() {
                debug!(cluster_id = %cluster_id, "Session gone from store, dropping cached copy");
                cache.remove(cluster_id);
            }
            return Ok(None);
        };

        if record.is_expired(now) {
            debug!(cluster_id = %cluster_id, expiry_at = record.times().expiry_at, "Stored session expired");
            cache.remove(cluster_id);
            return Ok(None);
        }

        if let Some(handle) = local {
            if record.last_node() == self.node_id() {
                let replaced = handle.with_inner(|inner| {
                    inner.mark_validated(now);
                    inner.refresh(record)
                });
                if !replaced {
                    trace!(cluster_id = %cluster_id, "Kept unsaved local changes over stored copy");
                }
                return Ok(Some(handle));
            }
        }

        let previous = record.last_node().to_string();
        record.set_last_node(self.node_id());
        record.mark_saved();
        self.store.update_session(&record)?;
        self.counters.handoffs.fetch_add(1, Ordering::Relaxed);

        if previous != self.node_id() {
            info!(
                cluster_id = %cluster_id,
                from = %previous,
                to = %self.node_id(),
                "Session handed off to this node"
            );
        } else {
            debug!(cluster_id = %cluster_id, "Session reclaimed by this node");
        }

        let handle = SessionHandle::new(record, HandleState::Persisted);
        handle.with_inner(|inner| inner.mark_validated(now));
        cache.put(cluster_id, handle.clone());
        Ok(Some(handle))
    }

    /// Create and persist a new session owned by this node.
    ///
    /// Fails with [`Error::Conflict`](crate::Error::Conflict) if a record for
    /// the id already exists in this context.
    pub fn create(&self, cluster_id: &str) -> Result<SessionHandle> {
        let key = self.config.context.key(cluster_id)?;
        let now = self.clock.now_millis();
        let mut record = SessionRecord::new(key, self.node_id(), self.config.max_idle_ms, now)?;
        record.mark_saved();

        let mut cache = self.cache.lock();
        self.store.save_session(&record)?;

        let handle = SessionHandle::new(record, HandleState::Persisted);
        cache.put(cluster_id, handle.clone());
        debug!(cluster_id = %cluster_id, context = %self.config.context, "Session created");
        Ok(handle)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an access at `now`.
    ///
    /// The handle becomes dirty only once a full save interval has passed
    /// since the last write-back. Returns whether a write-back is now due.
    pub fn touch(&self, handle: &SessionHandle, now: i64) -> bool {
        let interval = self.config.save_interval_ms();
        let _guard = self.cache.lock();
        handle.with_inner(|inner| {
            inner.record.access(now);
            let times = inner.record.times();
            if times.accessed.saturating_sub(times.last_saved) >= interval {
                inner.mark_dirty();
            }
            inner.state() == HandleState::Dirty
        })
    }

    /// Set (`Some`) or remove (`None`) an attribute. Always marks the handle
    /// dirty. Returns the previous value.
    pub fn mutate_attribute(
        &self,
        handle: &SessionHandle,
        name: &str,
        value: Option<Value>,
    ) -> Option<Value> {
        let _guard = self.cache.lock();
        handle.with_inner(|inner| {
            let previous = match value {
                Some(value) => inner.record.set_attribute(name, value),
                None => inner.record.remove_attribute(name),
            };
            inner.mark_dirty();
            previous
        })
    }

    /// Note that the session cookie was (re)issued on this access.
    pub fn cookie_set(&self, handle: &SessionHandle) {
        let _guard = self.cache.lock();
        handle.with_inner(|inner| {
            inner.record.mark_cookie_set();
            inner.mark_dirty();
        });
    }

    /// Write the handle back if it is dirty.
    ///
    /// Returns whether a write happened. Clean and evicted handles are left
    /// alone. On a store error the handle stays dirty.
    pub fn complete_request(&self, handle: &SessionHandle) -> Result<bool> {
        let _guard = self.cache.lock();
        let pending = handle.with_inner(|inner| match inner.state() {
            HandleState::Dirty => {
                let mut record = inner.record.clone();
                record.set_last_node(self.node_id());
                record.mark_saved();
                Some(record)
            }
            HandleState::Evicted => {
                debug!(cluster_id = %handle.cluster_id(), "Skipping write-back of evicted session");
                None
            }
            HandleState::Loaded | HandleState::Persisted => None,
        });
        let Some(record) = pending else {
            return Ok(false);
        };

        if let Err(e) = self.store.update_session(&record) {
            warn!(cluster_id = %handle.cluster_id(), error = %e, "Session write-back failed");
            return Err(e);
        }

        let now = self.clock.now_millis();
        handle.with_inner(|inner| {
            inner.record = record;
            inner.mark_persisted();
            inner.mark_validated(now);
        });
        self.counters.write_backs.fetch_add(1, Ordering::Relaxed);
        trace!(cluster_id = %handle.cluster_id(), "Session written back");
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Removal
    // ─────────────────────────────────────────────────────────────────────────

    /// Evict and delete a session. Returns whether a stored record existed.
    pub fn remove(&self, cluster_id: &str) -> Result<bool> {
        let key = self.config.context.key(cluster_id)?;
        let mut cache = self.cache.lock();
        cache.remove(cluster_id);
        let existed = self.store.delete_session(&key)?;
        debug!(cluster_id = %cluster_id, existed, "Session removed");
        Ok(existed)
    }

    /// Remove a session, then make every other context on this node drop its
    /// cached copy.
    pub fn invalidate(&self, cluster_id: &str) -> Result<bool> {
        // The coordination lock must be released before broadcasting, since
        // the broadcast reaches this coordinator too.
        let existed = self.remove(cluster_id)?;
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(cluster_id);
        }
        info!(cluster_id = %cluster_id, existed, "Session invalidated");
        Ok(existed)
    }

    /// Delete every stored session of this context whose expiry has passed.
    ///
    /// An explicit maintenance action; nothing calls it in the background.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let expired: Vec<SessionRecord> = self
            .store
            .read_all_sessions()?
            .into_iter()
            .filter(|record| self.config.context.owns(record.key()) && record.is_expired(now))
            .collect();

        let mut purged = 0;
        for record in expired {
            let mut cache = self.cache.lock();
            cache.remove(record.cluster_id());
            if self.store.delete_session(record.key())? {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(context = %self.config.context, purged, "Purged expired sessions");
        }
        Ok(purged)
    }

    /// Every stored session of this context, keyed by cluster id.
    ///
    /// Reads the whole store.
    pub fn sessions(&self) -> Result<BTreeMap<String, SessionRecord>> {
        Ok(self
            .store
            .read_all_sessions()?
            .into_iter()
            .filter(|record| self.config.context.owns(record.key()))
            .map(|record| (record.cluster_id().to_string(), record))
            .collect())
    }

    /// Drop every cached handle without touching the store.
    ///
    /// Sessions live on in the store for other nodes to pick up.
    pub fn shutdown(&self) -> usize {
        let dropped = self.cache.lock().clear();
        info!(context = %self.config.context, dropped, "Session context stopped");
        dropped
    }
}

impl LocalEvictor for SessionCoordinator {
    fn context(&self) -> &SessionContext {
        &self.config.context
    }

    fn evict_local(&self, cluster_id: &str) -> bool {
        self.cache.lock().remove(cluster_id).is_some()
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("node_id", &self.config.node_id)
            .field("context", &self.config.context)
            .field("cached", &self.cache.size())
            .finish_non_exhaustive()
    }
}
