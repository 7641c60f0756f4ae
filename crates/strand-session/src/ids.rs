//! Conversions between cluster ids and node-qualified ids.
//!
//! Sticky routing appends `.worker` to the cluster id handed to clients;
//! storage and registry lookups always use the bare cluster id.

/// Strip a trailing `.worker` suffix, if present.
pub fn cluster_id_of(node_qualified: &str) -> &str {
    match node_qualified.rfind('.') {
        Some(dot) if dot > 0 => &node_qualified[..dot],
        _ => node_qualified,
    }
}

/// Append `.worker` to a cluster id when a worker name is configured.
pub fn node_qualified_id(cluster_id: &str, worker: Option<&str>) -> String {
    match worker {
        Some(worker) if !worker.is_empty() => format!("{cluster_id}.{worker}"),
        _ => cluster_id.to_string(),
    }
}
