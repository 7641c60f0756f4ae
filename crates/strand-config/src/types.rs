//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [node]
//! id = "node-a"
//!
//! [session]
//! save_interval_secs = 300
//! max_idle_ms = 1800000
//! id_cache_capacity = 10000
//!
//! [[session.contexts]]
//! path = "/shop"
//! virtual_host = "shop.example.com"
//!
//! [store]
//! path = "sessions.db"
//!
//! [logging]
//! dir = "/var/log/strand"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strand_session::{
    CoordinatorConfig, DEFAULT_ID_CACHE_CAPACITY, DEFAULT_MAX_IDLE_MS, DEFAULT_NODE_ID,
    DEFAULT_SAVE_INTERVAL, NodeConfig, SessionContext,
};

use crate::error::ConfigError;

/// Application name for platform directory resolution.
pub(crate) const APP_NAME: &str = "strand";

/// Default SQLite file name under the data directory.
const DEFAULT_STORE_FILE: &str = "sessions.db";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    pub node: Option<NodeSection>,
    pub session: Option<SessionConfig>,
    pub store: Option<StoreConfig>,
    pub logging: Option<LoggingConfig>,
}

impl StrandConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        let config: StrandConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: StrandConfig) {
        if other.node.is_some() {
            self.node = other.node;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if let Some(node) = &self.node
            && node.id.trim().is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "node.id".to_string(),
                reason: "must not be blank".to_string(),
            });
        }
        if let Some(session) = &self.session
            && session.save_interval_secs == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "session.save_interval_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// This node's identity, falling back to [`DEFAULT_NODE_ID`].
    pub fn node_id(&self) -> &str {
        self.node
            .as_ref()
            .map(|n| n.id.as_str())
            .unwrap_or(DEFAULT_NODE_ID)
    }

    /// Session settings, or the defaults.
    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// Node settings for the session layer.
    pub fn node_config(&self) -> NodeConfig {
        self.session().node_config(self.node_id())
    }

    /// Resolved SQLite file path.
    pub fn store_path(&self) -> PathBuf {
        self.store.clone().unwrap_or_default().resolved_path()
    }

    /// Directory for JSON log files, if one is known.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.logging
            .as_ref()
            .and_then(|l| l.dir.clone())
            .or_else(|| data_dir().map(|d| d.join("logs")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node
// ─────────────────────────────────────────────────────────────────────────────

/// `[node]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Identity written as the last node of every record this node saves.
    pub id: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: DEFAULT_NODE_ID.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum seconds between write-backs of a touched but unchanged session.
    pub save_interval_secs: u64,
    /// Idle timeout. Negative selects the fallback expiry window.
    pub max_idle_ms: i64,
    /// Entries kept in the cluster id existence cache.
    pub id_cache_capacity: usize,
    /// Session-handling contexts served by this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<ContextConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: DEFAULT_SAVE_INTERVAL.as_secs(),
            max_idle_ms: DEFAULT_MAX_IDLE_MS,
            id_cache_capacity: DEFAULT_ID_CACHE_CAPACITY,
            contexts: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn node_config(&self, node_id: &str) -> NodeConfig {
        NodeConfig::new(node_id)
            .with_save_interval(self.save_interval())
            .with_max_idle_ms(self.max_idle_ms)
            .with_id_cache_capacity(self.id_cache_capacity)
    }

    pub fn coordinator_config(&self, node_id: &str, context: SessionContext) -> CoordinatorConfig {
        CoordinatorConfig::new(node_id)
            .with_context(context)
            .with_save_interval(self.save_interval())
            .with_max_idle_ms(self.max_idle_ms)
    }

    /// Configured contexts, or just the root context when none are listed.
    pub fn session_contexts(&self) -> Vec<SessionContext> {
        if self.contexts.is_empty() {
            return vec![SessionContext::root()];
        }
        self.contexts.iter().map(ContextConfig::context).collect()
    }
}

/// One `[[session.contexts]]` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub path: Option<String>,
    pub virtual_host: Option<String>,
}

impl ContextConfig {
    pub fn context(&self) -> SessionContext {
        SessionContext::new(self.path.as_deref(), self.virtual_host.as_deref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// `[store]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file. Relative paths resolve against the data directory.
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE));
        resolve_against_data_dir(&path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// `[logging]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily-rolling JSON log files.
    pub dir: Option<PathBuf>,
}

/// Platform data directory for strand (`~/.local/share/strand` on Linux).
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_NAME))
}

fn resolve_against_data_dir(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match data_dir() {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}
