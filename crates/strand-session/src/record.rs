//! Durable session state: keys, records and cluster id claims.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FALLBACK_EXPIRY_WINDOW_MS;
use crate::error::{Error, Result};

/// Virtual host recorded when a context is not bound to one.
pub const DEFAULT_VIRTUAL_HOST: &str = "0.0.0.0";

/// Canonicalize a context path for use inside a storage key.
///
/// Separators that would be ambiguous in a row key (`/`, `.`, `\`) become
/// `_`. A missing path is the empty string.
pub fn canonical_context_path(path: Option<&str>) -> String {
    match path {
        None => String::new(),
        Some(path) => path.replace(['/', '.', '\\'], "_"),
    }
}

/// Compute the expiry timestamp for an access at `accessed`.
pub fn expiry_for(accessed: i64, max_idle_ms: i64) -> i64 {
    if max_idle_ms < 0 {
        accessed.saturating_add(FALLBACK_EXPIRY_WINDOW_MS)
    } else {
        accessed.saturating_add(max_idle_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

/// The session-handling context a record belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionContext {
    path: String,
    virtual_host: String,
}

impl SessionContext {
    /// Build a context from a raw context path and optional virtual host.
    pub fn new(path: Option<&str>, virtual_host: Option<&str>) -> Self {
        let virtual_host = match virtual_host {
            Some(host) if !host.trim().is_empty() => host.to_string(),
            _ => DEFAULT_VIRTUAL_HOST.to_string(),
        };
        Self {
            path: canonical_context_path(path),
            virtual_host,
        }
    }

    /// The root context on the default virtual host.
    pub fn root() -> Self {
        Self::new(Some("/"), None)
    }

    /// Canonical context path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    /// Build the storage key for `cluster_id` in this context.
    pub fn key(&self, cluster_id: &str) -> Result<SessionKey> {
        if cluster_id.trim().is_empty() {
            return Err(Error::InvalidId(cluster_id.to_string()));
        }
        Ok(SessionKey {
            id: cluster_id.to_string(),
            context_path: self.path.clone(),
            virtual_host: self.virtual_host.clone(),
        })
    }

    /// Whether `key` was issued by this context.
    pub fn owns(&self, key: &SessionKey) -> bool {
        key.context_path == self.path && key.virtual_host == self.virtual_host
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path, self.virtual_host)
    }
}

/// Composite storage key: cluster id, canonical context path, virtual host.
///
/// Renders as `id:context:vhost`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    id: String,
    context_path: String,
    virtual_host: String,
}

impl SessionKey {
    /// The cluster session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    /// The context this key belongs to.
    pub fn context(&self) -> SessionContext {
        SessionContext {
            path: self.context_path.clone(),
            virtual_host: self.virtual_host.clone(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.id, self.context_path, self.virtual_host)
    }
}

impl FromStr for SessionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::InvalidId(s.to_string()));
        }
        let parts: Vec<&str> = s.split(':').collect();
        let [id, context_path, virtual_host] = parts.as_slice() else {
            return Err(Error::InvalidId(s.to_string()));
        };
        if id.trim().is_empty() {
            return Err(Error::InvalidId(s.to_string()));
        }
        Ok(Self {
            id: (*id).to_string(),
            context_path: (*context_path).to_string(),
            virtual_host: (*virtual_host).to_string(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Record
// ─────────────────────────────────────────────────────────────────────────────

/// Timestamps carried by a session record, all epoch milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created: i64,
    pub accessed: i64,
    pub last_accessed: i64,
    /// The `accessed` value captured by the most recent write-back.
    pub last_saved: i64,
    pub cookie_set_at: i64,
    pub expiry_at: i64,
}

/// The durable representation of one session.
///
/// The key is fixed at construction. Attributes change only through the
/// coordinator, and the map is only ever handed out by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    key: SessionKey,
    times: Timestamps,
    max_idle_ms: i64,
    last_node: String,
    attributes: HashMap<String, Value>,
}

impl SessionRecord {
    /// Create a fresh record first accessed at `now` on `last_node`.
    pub fn new(
        key: SessionKey,
        last_node: impl Into<String>,
        max_idle_ms: i64,
        now: i64,
    ) -> Result<Self> {
        let last_node = last_node.into();
        if last_node.trim().is_empty() {
            return Err(Error::InvalidId(last_node));
        }
        Ok(Self {
            key,
            times: Timestamps {
                created: now,
                accessed: now,
                last_accessed: now,
                last_saved: 0,
                cookie_set_at: 0,
                expiry_at: expiry_for(now, max_idle_ms),
            },
            max_idle_ms,
            last_node,
            attributes: HashMap::new(),
        })
    }

    /// Rebuild a record from its stored parts.
    pub fn restore(
        key: SessionKey,
        times: Timestamps,
        max_idle_ms: i64,
        last_node: impl Into<String>,
        attributes: HashMap<String, Value>,
    ) -> Self {
        Self {
            key,
            times,
            max_idle_ms,
            last_node: last_node.into(),
            attributes,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// The cluster session id.
    pub fn cluster_id(&self) -> &str {
        self.key.id()
    }

    pub fn times(&self) -> &Timestamps {
        &self.times
    }

    pub fn max_idle_ms(&self) -> i64 {
        self.max_idle_ms
    }

    /// Node that most recently wrote this record.
    pub fn last_node(&self) -> &str {
        &self.last_node
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Whether the record is past its expiry at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.times.expiry_at <= now
    }

    /// Record an access at `now` and push the expiry forward.
    pub(crate) fn access(&mut self, now: i64) {
        self.times.last_accessed = self.times.accessed;
        self.times.accessed = now;
        self.times.expiry_at = expiry_for(now, self.max_idle_ms);
    }

    pub(crate) fn set_attribute(&mut self, name: &str, value: Value) -> Option<Value> {
        self.attributes.insert(name.to_string(), value)
    }

    pub(crate) fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    pub(crate) fn set_last_node(&mut self, node: &str) {
        self.last_node = node.to_string();
    }

    pub(crate) fn mark_cookie_set(&mut self) {
        self.times.cookie_set_at = self.times.accessed;
    }

    /// Capture the current access time as the last save.
    pub(crate) fn mark_saved(&mut self) {
        self.times.last_saved = self.times.accessed;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cluster Id Record
// ─────────────────────────────────────────────────────────────────────────────

/// Proof that a cluster id is claimed somewhere in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdRecord {
    pub cluster_id: String,
    pub created_at: i64,
}

impl ClusterIdRecord {
    pub fn new(cluster_id: impl Into<String>, created_at: i64) -> Result<Self> {
        let cluster_id = cluster_id.into();
        if cluster_id.trim().is_empty() {
            return Err(Error::InvalidId(cluster_id));
        }
        Ok(Self {
            cluster_id,
            created_at,
        })
    }
}
