//! CLI command handlers.

pub mod config;
pub mod ids;
pub mod sessions;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use strand_config::{ConfigSource, StrandConfig};
use strand_session::{SessionNode, SystemClock};
use strand_store::SqliteStore;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration after file layers and CLI overrides.
    pub config: StrandConfig,
    /// Config files that were checked.
    pub sources: Vec<ConfigSource>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Open the configured SQLite store.
    pub fn open_store(&self) -> Result<SqliteStore> {
        let path = self.config.store_path();
        SqliteStore::open(&path)
            .with_context(|| format!("opening session store {}", path.display()))
    }

    /// Open the configured store and start a node on it.
    pub fn open_node(&self) -> Result<SessionNode> {
        Ok(SessionNode::new(
            self.config.node_config(),
            Arc::new(self.open_store()?),
            Arc::new(SystemClock),
        ))
    }
}

/// Render epoch milliseconds as RFC 3339, or `-` for unset timestamps.
pub fn format_millis(ms: i64) -> String {
    if ms <= 0 {
        return "-".to_string();
    }
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}
