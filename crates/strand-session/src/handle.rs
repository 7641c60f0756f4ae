//! Node-local handles wrapping a cached session record.
//!
//! A handle moves through these states during a request:
//!
//! ```text
//! Loaded ──mutate/threshold──▶ Dirty ──write-back──▶ Persisted
//!    ▲                           ▲                        │
//!    └──────── refresh ──────────┴────── mutate ──────────┘
//!
//! any state ──evict──▶ Evicted (terminal)
//! ```
//!
//! Transitions are made by the coordinator while it holds its coordination
//! lock. The handle's own mutex only protects readers from torn records.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::record::{SessionKey, SessionRecord};

/// Where a handle is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Matches what was read from the store.
    Loaded,
    /// Diverged from the store and needs a write-back.
    Dirty,
    /// Matches what this node last wrote.
    Persisted,
    /// Dropped from the local cache. Never written again.
    Evicted,
}

pub(crate) struct HandleInner {
    pub(crate) record: SessionRecord,
    state: HandleState,
    /// When this node last confirmed the record against the store.
    validated_at: i64,
}

impl HandleInner {
    pub(crate) fn state(&self) -> HandleState {
        self.state
    }

    pub(crate) fn mark_dirty(&mut self) {
        if self.state != HandleState::Evicted {
            self.state = HandleState::Dirty;
        }
    }

    pub(crate) fn mark_persisted(&mut self) {
        if self.state != HandleState::Evicted {
            self.state = HandleState::Persisted;
        }
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.state = HandleState::Evicted;
    }

    /// Note that the store was read or written for this record at `now`.
    pub(crate) fn mark_validated(&mut self, now: i64) {
        self.validated_at = self.validated_at.max(now);
    }

    /// Whether the cached record may be served without re-reading the store.
    pub(crate) fn is_fresh(&self, now: i64, interval: i64) -> bool {
        now.saturating_sub(self.validated_at) < interval
    }

    /// Replace the record with a fresher copy from the store.
    ///
    /// Unsaved local changes win; returns whether the record was replaced.
    pub(crate) fn refresh(&mut self, record: SessionRecord) -> bool {
        match self.state {
            HandleState::Dirty | HandleState::Evicted => false,
            HandleState::Loaded | HandleState::Persisted => {
                self.record = record;
                self.state = HandleState::Loaded;
                true
            }
        }
    }
}

/// A shared reference to one cached session.
///
/// Cloning is cheap; all clones observe the same record and state. The
/// attribute map is only ever handed out as a copy.
#[derive(Clone)]
pub struct SessionHandle {
    key: Arc<SessionKey>,
    inner: Arc<Mutex<HandleInner>>,
}

impl SessionHandle {
    pub(crate) fn new(record: SessionRecord, state: HandleState) -> Self {
        let validated_at = record.times().last_saved;
        Self {
            key: Arc::new(record.key().clone()),
            inner: Arc::new(Mutex::new(HandleInner {
                record,
                state,
                validated_at,
            })),
        }
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut HandleInner) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn cluster_id(&self) -> &str {
        self.key.id()
    }

    pub fn state(&self) -> HandleState {
        self.inner.lock().state
    }

    pub fn is_dirty(&self) -> bool {
        self.state() == HandleState::Dirty
    }

    pub fn is_evicted(&self) -> bool {
        self.state() == HandleState::Evicted
    }

    /// Copy of one attribute value.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.inner.lock().record.attribute(name).cloned()
    }

    /// Copy of the full attribute map.
    pub fn attributes(&self) -> HashMap<String, Value> {
        self.inner.lock().record.attributes().clone()
    }

    /// Copy of the wrapped record.
    pub fn record(&self) -> SessionRecord {
        self.inner.lock().record.clone()
    }

    pub fn last_node(&self) -> String {
        self.inner.lock().record.last_node().to_string()
    }

    pub fn expiry_at(&self) -> i64 {
        self.inner.lock().record.times().expiry_at
    }

    /// Whether two handles share the same cached state.
    pub fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SessionHandle")
            .field("key", &self.key.to_string())
            .field("state", &inner.state)
            .field("last_node", &inner.record.last_node())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SessionContext;

    fn handle(state: HandleState) -> SessionHandle {
        let key = SessionContext::root().key("s1").unwrap();
        let record = SessionRecord::new(key, "node-a", 1000, 0).unwrap();
        SessionHandle::new(record, state)
    }

    #[test]
    fn test_dirty_then_persisted() {
        let h = handle(HandleState::Loaded);
        h.with_inner(|inner| inner.mark_dirty());
        assert!(h.is_dirty());
        h.with_inner(|inner| inner.mark_persisted());
        assert_eq!(h.state(), HandleState::Persisted);
    }

    #[test]
    fn test_evicted_is_terminal() {
        let h = handle(HandleState::Dirty);
        h.with_inner(|inner| inner.mark_evicted());
        h.with_inner(|inner| inner.mark_dirty());
        h.with_inner(|inner| inner.mark_persisted());
        assert!(h.is_evicted());
    }

    #[test]
    fn test_refresh_keeps_unsaved_changes() {
        let h = handle(HandleState::Loaded);
        h.with_inner(|inner| {
            inner.record.set_attribute("k", Value::from("local"));
            inner.mark_dirty();
        });

        let key = SessionContext::root().key("s1").unwrap();
        let stored = SessionRecord::new(key, "node-b", 1000, 0).unwrap();
        assert!(!h.with_inner(|inner| inner.refresh(stored)));
        assert_eq!(h.attribute("k"), Some(Value::from("local")));
    }

    #[test]
    fn test_refresh_replaces_clean_record() {
        let h = handle(HandleState::Persisted);
        let key = SessionContext::root().key("s1").unwrap();
        let mut stored = SessionRecord::new(key, "node-a", 1000, 0).unwrap();
        stored.set_attribute("k", Value::from("remote"));

        assert!(h.with_inner(|inner| inner.refresh(stored)));
        assert_eq!(h.state(), HandleState::Loaded);
        assert_eq!(h.attribute("k"), Some(Value::from("remote")));
    }

    #[test]
    fn test_freshness_follows_last_validation() {
        let h = handle(HandleState::Loaded);
        assert!(h.with_inner(|inner| inner.is_fresh(99, 100)));
        assert!(!h.with_inner(|inner| inner.is_fresh(100, 100)));

        h.with_inner(|inner| inner.mark_validated(500));
        assert!(h.with_inner(|inner| inner.is_fresh(599, 100)));
        // Validation never moves backwards.
        h.with_inner(|inner| inner.mark_validated(10));
        assert!(h.with_inner(|inner| inner.is_fresh(599, 100)));
    }

    #[test]
    fn test_clones_share_state() {
        let a = handle(HandleState::Loaded);
        let b = a.clone();
        a.with_inner(|inner| inner.mark_dirty());
        assert!(b.is_dirty());
        assert!(a.ptr_eq(&b));
        assert_eq!(b.cluster_id(), "s1");
    }

    #[test]
    fn test_attributes_are_copies() {
        let h = handle(HandleState::Loaded);
        let mut attrs = h.attributes();
        attrs.insert("k".into(), Value::from(1));
        assert!(h.attribute("k").is_none());
    }
}
