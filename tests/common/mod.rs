//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use memtree_core::{
    config::EngineConfig,
    properties::NodeId,
    store::{MemoryStore, TreeStore},
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Engine config with a focus retry loop short enough for tests.
#[allow(dead_code)]
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        focus_retry_attempts: 2,
        focus_retry_interval_ms: 1,
        ..Default::default()
    }
}

/// Seed `parent` with one child per name, keyed 0, 1, 2, ...
#[allow(dead_code)]
pub fn seed_children(store: &MemoryStore, parent: Option<NodeId>, names: &[&str]) -> Vec<NodeId> {
    names
        .iter()
        .enumerate()
        .map(|(key, name)| store.seed(parent, key as i64, name))
        .collect()
}

/// Order keys of `parent`'s children as the store holds them, in sibling order.
#[allow(dead_code)]
pub async fn stored_keys<S: TreeStore>(store: &S, parent: NodeId) -> Vec<(NodeId, i64)> {
    let mut children = store
        .fetch_children(parent)
        .await
        .expect("children should be fetchable");
    children.sort_by_key(|r| r.sort_key());
    children.iter().map(|r| (r.id, r.order_key)).collect()
}
