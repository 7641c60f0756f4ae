//! Cluster-wide session id uniqueness.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::ids::cluster_id_of;
use crate::record::ClusterIdRecord;
use crate::store::BackingStore;

/// Tracks which cluster ids are claimed.
///
/// A stored [`ClusterIdRecord`] is the only proof that an id is taken. Ids
/// this node registered are also remembered in a bounded LRU so the common
/// "did I issue this?" check skips the store. The LRU's mutex is held across
/// the store call in every read-modify-write.
pub struct ClusterIdRegistry {
    store: Arc<dyn BackingStore>,
    known: Mutex<LruCache<String, i64>>,
}

impl ClusterIdRegistry {
    /// Create a registry remembering up to `capacity` locally issued ids.
    pub fn new(store: Arc<dyn BackingStore>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            known: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Whether `id` (bare or node-qualified) is claimed anywhere.
    ///
    /// Store failures are returned as errors, never as "not in use".
    pub fn is_in_use(&self, id: &str) -> Result<bool> {
        if id.trim().is_empty() {
            return Ok(false);
        }
        let cluster_id = cluster_id_of(id);
        if self.known.lock().contains(cluster_id) {
            trace!(cluster_id = %cluster_id, "Cluster id known locally");
            return Ok(true);
        }
        Ok(self.store.read_cluster_id(cluster_id)?.is_some())
    }

    /// Persist a claim for `id`, then remember it locally.
    pub fn register_new(&self, id: &str, now: i64) -> Result<ClusterIdRecord> {
        let mut known = self.known.lock();
        self.register_locked(&mut known, cluster_id_of(id), now)
    }

    /// Claim `id` if nobody holds it. Returns whether this call claimed it.
    pub fn claim(&self, id: &str, now: i64) -> Result<bool> {
        let cluster_id = cluster_id_of(id);
        let mut known = self.known.lock();
        if known.contains(cluster_id) || self.store.read_cluster_id(cluster_id)?.is_some() {
            return Ok(false);
        }
        match self.register_locked(&mut known, cluster_id, now) {
            Ok(_) => Ok(true),
            // Another node claimed it between the read and the write.
            Err(Error::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop the claim for `id`. Returns whether a stored claim existed.
    pub fn unregister(&self, id: &str) -> Result<bool> {
        let cluster_id = cluster_id_of(id);
        let mut known = self.known.lock();
        let existed = self.store.delete_cluster_id(cluster_id)?;
        known.pop(cluster_id);
        debug!(cluster_id = %cluster_id, existed, "Cluster id released");
        Ok(existed)
    }

    /// Number of ids remembered locally.
    pub fn known_len(&self) -> usize {
        self.known.lock().len()
    }

    fn register_locked(
        &self,
        known: &mut MutexGuard<'_, LruCache<String, i64>>,
        cluster_id: &str,
        now: i64,
    ) -> Result<ClusterIdRecord> {
        let record = ClusterIdRecord::new(cluster_id, now)?;
        self.store.save_cluster_id(&record)?;
        known.put(record.cluster_id.clone(), now);
        debug!(cluster_id = %cluster_id, "Cluster id registered");
        Ok(record)
    }
}

impl fmt::Debug for ClusterIdRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterIdRegistry")
            .field("known", &self.known_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::record::{SessionKey, SessionRecord};
    use crate::store::MemoryStore;

    /// A store whose id table is unreachable.
    struct DownStore;

    impl BackingStore for DownStore {
        fn read_session(&self, _: &SessionKey) -> Result<Option<SessionRecord>> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn read_all_sessions(&self) -> Result<Vec<SessionRecord>> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn save_session(&self, _: &SessionRecord) -> Result<()> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn update_session(&self, _: &SessionRecord) -> Result<()> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn delete_session(&self, _: &SessionKey) -> Result<bool> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn read_cluster_id(&self, _: &str) -> Result<Option<ClusterIdRecord>> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn save_cluster_id(&self, _: &ClusterIdRecord) -> Result<()> {
            Err(Error::StoreUnavailable("down".into()))
        }
        fn delete_cluster_id(&self, _: &str) -> Result<bool> {
            Err(Error::StoreUnavailable("down".into()))
        }
    }

    #[test]
    fn test_register_then_in_use() {
        let registry = ClusterIdRegistry::new(Arc::new(MemoryStore::new()), 16);
        assert!(!registry.is_in_use("s1").unwrap());

        registry.register_new("s1", 10).unwrap();
        assert!(registry.is_in_use("s1").unwrap());
        assert!(registry.is_in_use("s1.node-a").unwrap());
        assert_eq!(registry.known_len(), 1);
    }

    #[test]
    fn test_unregister_clears_both_layers() {
        let store = Arc::new(MemoryStore::new());
        let registry = ClusterIdRegistry::new(store.clone(), 16);
        registry.register_new("s1", 10).unwrap();

        assert!(registry.unregister("s1").unwrap());
        assert!(!registry.is_in_use("s1").unwrap());
        assert!(store.read_cluster_id("s1").unwrap().is_none());
        assert!(!registry.unregister("s1").unwrap());
    }

    #[test]
    fn test_sees_ids_issued_elsewhere() {
        let store = Arc::new(MemoryStore::new());
        let node_a = ClusterIdRegistry::new(store.clone(), 16);
        let node_b = ClusterIdRegistry::new(store, 16);

        node_a.register_new("s1", 10).unwrap();
        assert!(node_b.is_in_use("s1").unwrap());
        assert_eq!(node_b.known_len(), 0);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let node_a = ClusterIdRegistry::new(store.clone(), 16);
        let node_b = ClusterIdRegistry::new(store, 16);

        assert!(node_a.claim("s1", 1).unwrap());
        assert!(!node_b.claim("s1", 2).unwrap());
        assert!(!node_a.claim("s1", 3).unwrap());
    }

    #[test]
    fn test_blank_id_never_in_use() {
        let registry = ClusterIdRegistry::new(Arc::new(DownStore), 16);
        assert!(!registry.is_in_use("").unwrap());
        assert!(!registry.is_in_use("   ").unwrap());
    }

    #[test]
    fn test_store_failure_propagates() {
        let registry = ClusterIdRegistry::new(Arc::new(DownStore), 16);
        let err = registry.is_in_use("s1").unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert!(registry.register_new("s1", 1).is_err());
        assert_eq!(registry.known_len(), 0);
    }

    #[test]
    fn test_lru_bounds_local_memory() {
        let store = Arc::new(MemoryStore::new());
        let registry = ClusterIdRegistry::new(store, 2);
        for id in ["s1", "s2", "s3"] {
            registry.register_new(id, 1).unwrap();
        }
        assert_eq!(registry.known_len(), 2);
        // Evicted locally, still proven by the store.
        assert!(registry.is_in_use("s1").unwrap());
    }
}
