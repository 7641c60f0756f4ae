//! The backing store contract and an in-memory implementation.
//!
//! The coherence layer never assumes transactions or notifications from the
//! store. Every operation is a single-row read or write, and the store is
//! expected to synchronize itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::record::{ClusterIdRecord, SessionKey, SessionRecord};

/// Durable CRUD for session records and cluster id claims.
///
/// Transport failures must surface as [`Error::StoreUnavailable`] and
/// undecodable rows as [`Error::CorruptRecord`]. A missing row is `Ok(None)`
/// from reads and `Ok(false)` from deletes, never an error.
pub trait BackingStore: Send + Sync {
    /// Read one session record.
    fn read_session(&self, key: &SessionKey) -> Result<Option<SessionRecord>>;

    /// Read every session record in the store, in no particular order.
    ///
    /// Potentially expensive; keep it off request paths.
    fn read_all_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Insert a new record. Fails with [`Error::Conflict`] if the key exists.
    fn save_session(&self, record: &SessionRecord) -> Result<()>;

    /// Overwrite the whole stored record.
    fn update_session(&self, record: &SessionRecord) -> Result<()>;

    /// Delete the row for `key`. Returns whether a row existed.
    fn delete_session(&self, key: &SessionKey) -> Result<bool>;

    fn read_cluster_id(&self, cluster_id: &str) -> Result<Option<ClusterIdRecord>>;

    /// Insert a cluster id claim. Fails with [`Error::Conflict`] if present.
    fn save_cluster_id(&self, record: &ClusterIdRecord) -> Result<()>;

    fn delete_cluster_id(&self, cluster_id: &str) -> Result<bool>;
}

impl<T: BackingStore + ?Sized> BackingStore for Arc<T> {
    fn read_session(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        (**self).read_session(key)
    }

    fn read_all_sessions(&self) -> Result<Vec<SessionRecord>> {
        (**self).read_all_sessions()
    }

    fn save_session(&self, record: &SessionRecord) -> Result<()> {
        (**self).save_session(record)
    }

    fn update_session(&self, record: &SessionRecord) -> Result<()> {
        (**self).update_session(record)
    }

    fn delete_session(&self, key: &SessionKey) -> Result<bool> {
        (**self).delete_session(key)
    }

    fn read_cluster_id(&self, cluster_id: &str) -> Result<Option<ClusterIdRecord>> {
        (**self).read_cluster_id(cluster_id)
    }

    fn save_cluster_id(&self, record: &ClusterIdRecord) -> Result<()> {
        (**self).save_cluster_id(record)
    }

    fn delete_cluster_id(&self, cluster_id: &str) -> Result<bool> {
        (**self).delete_cluster_id(cluster_id)
    }
}

/// A process-local store.
///
/// Several coordinators sharing one `Arc<MemoryStore>` behave like nodes
/// sharing a real store, which makes it the natural test double. Session
/// reads and writes are counted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionKey, SessionRecord>>,
    cluster_ids: Mutex<HashMap<String, ClusterIdRecord>>,
    session_reads: AtomicU64,
    session_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of single-session reads served.
    pub fn session_reads(&self) -> u64 {
        self.session_reads.load(Ordering::Relaxed)
    }

    /// Number of session inserts and updates applied.
    pub fn session_writes(&self) -> u64 {
        self.session_writes.load(Ordering::Relaxed)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl BackingStore for MemoryStore {
    fn read_session(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        self.session_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.sessions.lock().get(key).cloned())
    }

    fn read_all_sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.sessions.lock().values().cloned().collect())
    }

    fn save_session(&self, record: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(record.key()) {
            return Err(Error::Conflict(record.key().to_string()));
        }
        sessions.insert(record.key().clone(), record.clone());
        self.session_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn update_session(&self, record: &SessionRecord) -> Result<()> {
        self.sessions
            .lock()
            .insert(record.key().clone(), record.clone());
        self.session_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete_session(&self, key: &SessionKey) -> Result<bool> {
        Ok(self.sessions.lock().remove(key).is_some())
    }

    fn read_cluster_id(&self, cluster_id: &str) -> Result<Option<ClusterIdRecord>> {
        Ok(self.cluster_ids.lock().get(cluster_id).cloned())
    }

    fn save_cluster_id(&self, record: &ClusterIdRecord) -> Result<()> {
        let mut ids = self.cluster_ids.lock();
        if ids.contains_key(&record.cluster_id) {
            return Err(Error::Conflict(record.cluster_id.clone()));
        }
        ids.insert(record.cluster_id.clone(), record.clone());
        Ok(())
    }

    fn delete_cluster_id(&self, cluster_id: &str) -> Result<bool> {
        Ok(self.cluster_ids.lock().remove(cluster_id).is_some())
    }
}
