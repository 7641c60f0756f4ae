//! Two nodes, each with its own connection to one database file.

use std::sync::Arc;

use serde_json::json;
use strand_session::{ManualClock, NodeConfig, SessionContext, SessionNode};
use strand_store::SqliteStore;
use tempfile::TempDir;

fn node(id: &str, dir: &TempDir, clock: Arc<ManualClock>) -> SessionNode {
    let store = SqliteStore::open(dir.path().join("sessions.db")).unwrap();
    SessionNode::new(NodeConfig::new(id), Arc::new(store), clock)
}

#[test]
fn test_session_moves_between_nodes() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000_000));
    let node_a = node("node-a", &dir, clock.clone());
    let node_b = node("node-b", &dir, clock.clone());

    let shop_a = node_a.context(SessionContext::new(Some("/shop"), None));
    let handle = shop_a.create("s1").unwrap();
    shop_a.mutate_attribute(&handle, "cart", Some(json!(["apple"])));
    shop_a.complete_request(&handle).unwrap();

    let shop_b = node_b.context(SessionContext::new(Some("/shop"), None));
    let on_b = shop_b.acquire("s1").unwrap().unwrap();
    assert_eq!(on_b.attribute("cart"), Some(json!(["apple"])));
    assert_eq!(on_b.last_node(), "node-b");
}

#[test]
fn test_reopen_preserves_sessions_and_ids() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(1_000_000));
    {
        let first = node("node-a", &dir, clock.clone());
        first.registry().register_new("s1", 1_000_000).unwrap();
        first.context(SessionContext::root()).create("s1").unwrap();
        first.shutdown();
    }

    let second = node("node-a", &dir, clock);
    assert!(second.registry().is_in_use("s1").unwrap());
    let sessions = second.context(SessionContext::root());
    assert!(sessions.acquire("s1").unwrap().is_some());
}

#[test]
fn test_open_creates_parent_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("sessions.db");
    let store = SqliteStore::open(&path).unwrap();

    assert!(path.exists());
    assert_eq!(store.path(), Some(path.as_path()));
}
