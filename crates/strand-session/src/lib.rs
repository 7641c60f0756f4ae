//! Session coherence for a cluster of stateless application nodes.
//!
//! Session state lives in a shared [`BackingStore`]. Each node fronts it with
//! a local cache of [`SessionHandle`]s so most requests avoid a store round
//! trip. This crate defines the rules for moving state between the two:
//!
//! - A cached handle is trusted for at most one save interval; after that
//!   the store is re-read.
//! - The first access on a node that did not write a session last claims it
//!   by writing the record back with this node as `last_node`.
//! - Touches are written back at most once per save interval; attribute
//!   changes are always written back when the request completes.
//! - Expiry is checked lazily on access.
//! - Invalidation evicts the session from every context on this node. Other
//!   nodes find out through the store.
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_session::{MemoryStore, NodeConfig, SessionContext, SessionNode, SystemClock};
//!
//! let node = SessionNode::new(
//!     NodeConfig::new("node-a"),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//! );
//! let sessions = node.context(SessionContext::root());
//!
//! let handle = sessions.create("abc123")?;
//! sessions.mutate_attribute(&handle, "user", Some("alice".into()));
//! sessions.complete_request(&handle)?;
//! ```

mod broadcast;
mod cache;
mod clock;
mod config;
mod coordinator;
mod error;
mod handle;
mod ids;
mod node;
mod record;
mod registry;
mod store;

pub use broadcast::{InvalidationBroadcaster, LocalEvictor};
pub use cache::{CacheGuard, LocalSessionCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CoordinatorConfig, DEFAULT_ID_CACHE_CAPACITY, DEFAULT_MAX_IDLE_MS, DEFAULT_NODE_ID,
    DEFAULT_SAVE_INTERVAL, FALLBACK_EXPIRY_WINDOW_MS, NodeConfig,
};
pub use coordinator::{CoordinatorStats, SessionCoordinator};
pub use error::{Error, Result};
pub use handle::{HandleState, SessionHandle};
pub use ids::{cluster_id_of, node_qualified_id};
pub use node::SessionNode;
pub use record::{
    ClusterIdRecord, DEFAULT_VIRTUAL_HOST, SessionContext, SessionKey, SessionRecord, Timestamps,
    canonical_context_path, expiry_for,
};
pub use registry::ClusterIdRegistry;
pub use store::{BackingStore, MemoryStore};
