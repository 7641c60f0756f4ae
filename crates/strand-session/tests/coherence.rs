//! Cross-node coherence tests.
//!
//! Each "node" is a `SessionNode` with its own local caches; all of them
//! share one `MemoryStore` and one manual clock.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::{Value, json};
use strand_session::{
    BackingStore, Clock, HandleState, LocalEvictor, ManualClock, MemoryStore, NodeConfig,
    SessionContext, SessionCoordinator, SessionNode,
};

const START: i64 = 1_700_000_000_000;
const SAVE_INTERVAL_MS: i64 = 300_000;

struct Cluster {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

impl Cluster {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(START)),
        }
    }

    fn node(&self, id: &str, max_idle_ms: i64) -> SessionNode {
        let config = NodeConfig::new(id)
            .with_save_interval(Duration::from_millis(SAVE_INTERVAL_MS as u64))
            .with_max_idle_ms(max_idle_ms);
        SessionNode::new(config, self.store.clone(), self.clock.clone())
    }

    fn root(&self, id: &str) -> Arc<SessionCoordinator> {
        self.node(id, 1_800_000).context(SessionContext::root())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / Create
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_create_then_acquire_same_node() {
    let cluster = Cluster::new();
    let node_a = cluster.root("A");

    let created = node_a.create("s1").unwrap();
    node_a.mutate_attribute(&created, "cart", Some(json!(["apple"])));
    node_a.complete_request(&created).unwrap();

    let acquired = node_a.acquire("s1").unwrap().unwrap();
    assert_eq!(acquired.attributes(), created.attributes());
    assert_eq!(acquired.last_node(), "A");
}

#[test]
fn test_expired_session_absent_everywhere() {
    let cluster = Cluster::new();
    let node_a = cluster.root("A");
    let node_b = cluster.root("B");

    let handle = node_a.create("s1").unwrap();
    cluster.clock.set(handle.expiry_at());

    assert!(node_a.acquire("s1").unwrap().is_none());
    assert!(node_b.acquire("s1").unwrap().is_none());
}

#[test]
fn test_concrete_lifecycle_scenario() {
    let cluster = Cluster::new();
    let node = cluster.node("A", 1000).context(SessionContext::root());

    let handle = node.create("s1").unwrap();
    let now = cluster.clock.now_millis();
    node.touch(&handle, now);
    node.mutate_attribute(&handle, "k", Some(Value::from("v")));
    node.complete_request(&handle).unwrap();

    let acquired = node.acquire("s1").unwrap().unwrap();
    assert_eq!(acquired.attribute("k"), Some(Value::from("v")));
    assert_eq!(acquired.expiry_at(), now + 1000);
}

#[test]
fn test_remove_then_acquire_absent_and_id_released() {
    let cluster = Cluster::new();
    let node = cluster.node("A", 1_800_000);
    let sessions = node.context(SessionContext::root());

    node.registry().register_new("s1", START).unwrap();
    sessions.create("s1").unwrap();

    assert!(sessions.remove("s1").unwrap());
    assert!(sessions.acquire("s1").unwrap().is_none());

    assert!(node.registry().unregister("s1").unwrap());
    assert!(!node.registry().is_in_use("s1").unwrap());
}

// ─────────────────────────────────────────────────────────────────────────────
// Write-back
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_complete_request_idempotent() {
    let cluster = Cluster::new();
    let node = cluster.root("A");
    let handle = node.create("s1").unwrap();
    let baseline = cluster.store.session_writes();

    node.complete_request(&handle).unwrap();
    node.complete_request(&handle).unwrap();
    assert_eq!(cluster.store.session_writes(), baseline);

    node.mutate_attribute(&handle, "k", Some(json!(1)));
    node.complete_request(&handle).unwrap();
    node.complete_request(&handle).unwrap();
    assert_eq!(cluster.store.session_writes(), baseline + 1);
}

#[test]
fn test_gap_of_full_interval_marks_dirty() {
    let cluster = Cluster::new();
    let node = cluster.root("A");
    let handle = node.create("s1").unwrap();

    let now = cluster.clock.advance(SAVE_INTERVAL_MS);
    assert!(node.touch(&handle, now));
    assert_eq!(handle.state(), HandleState::Dirty);
}

#[test]
fn test_mutation_visible_from_other_node() {
    let cluster = Cluster::new();
    let node_a = cluster.root("A");
    let node_b = cluster.root("B");

    let handle = node_a.create("s1").unwrap();
    node_a.mutate_attribute(&handle, "user", Some(json!({"name": "alice"})));
    node_a.complete_request(&handle).unwrap();

    let seen = node_b.acquire("s1").unwrap().unwrap();
    assert_eq!(seen.attribute("user"), Some(json!({"name": "alice"})));
}

#[test]
fn test_unsaved_mutation_invisible_to_other_node() {
    let cluster = Cluster::new();
    let node_a = cluster.root("A");
    let node_b = cluster.root("B");

    let handle = node_a.create("s1").unwrap();
    node_a.mutate_attribute(&handle, "user", Some(json!("alice")));

    let seen = node_b.acquire("s1").unwrap().unwrap();
    assert!(seen.attribute("user").is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Handoff
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_handoff_updates_last_node() {
    let cluster = Cluster::new();
    let node_a = cluster.root("A");
    let node_b = cluster.root("B");

    node_a.create("s1").unwrap();

    let on_b = node_b.acquire("s1").unwrap().unwrap();
    assert_eq!(on_b.last_node(), "B");
    let key = SessionContext::root().key("s1").unwrap();
    let stored = cluster.store.read_session(&key).unwrap().unwrap();
    assert_eq!(stored.last_node(), "B");

    node_a.evict_local("s1");
    let back_on_a = node_a.acquire("s1").unwrap().unwrap();
    // A reads B's claim, then claims the session back.
    assert_eq!(back_on_a.last_node(), "A");
    assert_eq!(node_a.stats().handoffs, 1);
}

#[test]
fn test_stale_copy_replaced_after_other_node_took_over() {
    let cluster = Cluster::new();
    let node_a = cluster.root("A");
    let node_b = cluster.root("B");

    let original = node_a.create("s1").unwrap();
    let on_b = node_b.acquire("s1").unwrap().unwrap();
    node_b.mutate_attribute(&on_b, "step", Some(json!(2)));
    node_b.complete_request(&on_b).unwrap();

    // Within the save interval A still trusts its own copy.
    let cached = node_a.acquire("s1").unwrap().unwrap();
    assert!(cached.ptr_eq(&original));
    assert!(cached.attribute("step").is_none());

    // After the interval A re-reads, sees B's write and takes over.
    cluster.clock.advance(SAVE_INTERVAL_MS);
    let refreshed = node_a.acquire("s1").unwrap().unwrap();
    assert!(!refreshed.ptr_eq(&original));
    assert!(original.is_evicted());
    assert_eq!(refreshed.attribute("step"), Some(json!(2)));
    assert_eq!(refreshed.last_node(), "A");
}

#[test]
fn test_removal_on_other_node_seen_after_interval() {
    let cluster = Cluster::new();
    let node_a = cluster.root("A");
    let node_b = cluster.root("B");

    let handle = node_a.create("s1").unwrap();
    node_b.remove("s1").unwrap();

    assert!(node_a.acquire("s1").unwrap().is_some());
    cluster.clock.advance(SAVE_INTERVAL_MS);
    assert!(node_a.acquire("s1").unwrap().is_none());
    assert!(handle.is_evicted());
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_concurrent_acquire_shares_one_handle() {
    let cluster = Cluster::new();
    cluster.root("A").create("s1").unwrap();

    let node_b = cluster.root("B");
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let node_b = node_b.clone();
            thread::spawn(move || node_b.acquire("s1").unwrap().unwrap())
        })
        .collect();
    let handles: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert!(handles.iter().all(|h| h.ptr_eq(&handles[0])));
    assert_eq!(node_b.stats().handoffs, 1);
    assert_eq!(cluster.store.session_reads(), 1);
}

#[test]
fn test_idle_session_served_from_cache_after_handoff() {
    let cluster = Cluster::new();
    cluster.root("A").create("s1").unwrap();
    // Idle for two save intervals, still well inside max idle.
    cluster.clock.advance(2 * SAVE_INTERVAL_MS);

    let node_b = cluster.root("B");
    let reads_before = cluster.store.session_reads();
    let first = node_b.acquire("s1").unwrap().unwrap();
    for _ in 0..2 {
        let again = node_b.acquire("s1").unwrap().unwrap();
        assert!(again.ptr_eq(&first));
    }

    assert_eq!(cluster.store.session_reads() - reads_before, 1);
    let stats = node_b.stats();
    assert_eq!(stats.handoffs, 1);
    assert_eq!(stats.hits, 2);
}

#[test]
fn test_idle_own_session_served_from_cache_after_refresh() {
    let cluster = Cluster::new();
    let node_a = cluster.root("A");
    let created = node_a.create("s1").unwrap();
    cluster.clock.advance(2 * SAVE_INTERVAL_MS);

    let reads_before = cluster.store.session_reads();
    for _ in 0..3 {
        let acquired = node_a.acquire("s1").unwrap().unwrap();
        assert!(acquired.ptr_eq(&created));
    }

    assert_eq!(cluster.store.session_reads() - reads_before, 1);
    assert_eq!(node_a.stats().hits, 2);
}

#[test]
fn test_concurrent_mutations_all_persisted() {
    let cluster = Cluster::new();
    let node = cluster.root("A");
    let handle = node.create("s1").unwrap();

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let node = node.clone();
            let handle = handle.clone();
            thread::spawn(move || {
                node.mutate_attribute(&handle, &format!("k{i}"), Some(json!(i)));
                node.complete_request(&handle).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let other = cluster.root("B");
    let seen = other.acquire("s1").unwrap().unwrap();
    assert_eq!(seen.attributes().len(), 8);
}

// ─────────────────────────────────────────────────────────────────────────────
// Throttling
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_touches_within_interval_write_at_most_once(
        gaps in proptest::collection::vec(1i64..SAVE_INTERVAL_MS, 1..40)
    ) {
        let cluster = Cluster::new();
        let node = cluster.root("A");
        let handle = node.create("s1").unwrap();
        let baseline = cluster.store.session_writes();

        for gap in &gaps {
            let now = cluster.clock.advance(*gap);
            node.touch(&handle, now);
            node.complete_request(&handle).unwrap();
        }

        let span: i64 = gaps.iter().sum();
        let writes = cluster.store.session_writes() - baseline;
        // One write-back per elapsed save interval, at most.
        prop_assert!(writes as i64 <= span / SAVE_INTERVAL_MS);
        if span < SAVE_INTERVAL_MS {
            prop_assert_eq!(writes, 0);
        }
    }
}
