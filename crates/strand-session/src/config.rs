//! Configuration for session coordinators and nodes.

use std::time::Duration;

use crate::record::SessionContext;

/// Default minimum time between write-backs of a touched, unmodified session.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(300);

/// Default idle timeout for new sessions (30 minutes).
pub const DEFAULT_MAX_IDLE_MS: i64 = 30 * 60 * 1000;

/// Expiry window applied when the configured idle timeout is negative.
pub const FALLBACK_EXPIRY_WINDOW_MS: i64 = 30 * 60 * 1000;

/// Default capacity of the cluster id existence cache.
pub const DEFAULT_ID_CACHE_CAPACITY: usize = 10_000;

/// Node identity used when none is configured.
pub const DEFAULT_NODE_ID: &str = "node";

/// Configuration for one [`SessionCoordinator`](crate::SessionCoordinator).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// This node's identity, written as `last_node` on every write.
    pub node_id: String,

    /// The context whose sessions this coordinator manages.
    pub context: SessionContext,

    /// Minimum time between write-backs of a touched but unmodified session.
    /// Also bounds how long a cached handle is trusted without a store read.
    pub save_interval: Duration,

    /// Idle timeout for new sessions. Negative selects the fallback window.
    pub max_idle_ms: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID.to_string(),
            context: SessionContext::root(),
            save_interval: DEFAULT_SAVE_INTERVAL,
            max_idle_ms: DEFAULT_MAX_IDLE_MS,
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration for `node_id` with default values.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: SessionContext) -> Self {
        self.context = context;
        self
    }

    /// Set the write-back throttle interval.
    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_max_idle_ms(mut self, max_idle_ms: i64) -> Self {
        self.max_idle_ms = max_idle_ms;
        self
    }

    /// Save interval in milliseconds, saturating at `i64::MAX`.
    pub fn save_interval_ms(&self) -> i64 {
        i64::try_from(self.save_interval.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Configuration shared by every context on one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub save_interval: Duration,
    pub max_idle_ms: i64,

    /// Number of locally issued cluster ids remembered by the registry.
    pub id_cache_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID.to_string(),
            save_interval: DEFAULT_SAVE_INTERVAL,
            max_idle_ms: DEFAULT_MAX_IDLE_MS,
            id_cache_capacity: DEFAULT_ID_CACHE_CAPACITY,
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    pub fn with_save_interval(mut self, interval: Duration) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_max_idle_ms(mut self, max_idle_ms: i64) -> Self {
        self.max_idle_ms = max_idle_ms;
        self
    }

    pub fn with_id_cache_capacity(mut self, capacity: usize) -> Self {
        self.id_cache_capacity = capacity;
        self
    }

    /// Coordinator settings for `context` on this node.
    pub fn coordinator(&self, context: SessionContext) -> CoordinatorConfig {
        CoordinatorConfig {
            node_id: self.node_id.clone(),
            context,
            save_interval: self.save_interval,
            max_idle_ms: self.max_idle_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.save_interval, Duration::from_secs(300));
        assert_eq!(config.save_interval_ms(), 300_000);
        assert_eq!(config.node_id, DEFAULT_NODE_ID);
    }

    #[test]
    fn test_node_config_carries_into_coordinator() {
        let node = NodeConfig::new("node-b")
            .with_save_interval(Duration::from_secs(5))
            .with_max_idle_ms(-1);
        let ctx = SessionContext::new(Some("/shop"), None);
        let config = node.coordinator(ctx.clone());

        assert_eq!(config.node_id, "node-b");
        assert_eq!(config.context, ctx);
        assert_eq!(config.save_interval_ms(), 5_000);
        assert_eq!(config.max_idle_ms, -1);
    }

    #[test]
    fn test_huge_interval_saturates() {
        let config = CoordinatorConfig::new("n").with_save_interval(Duration::MAX);
        assert_eq!(config.save_interval_ms(), i64::MAX);
    }
}
