//! The remote store gateway.
//!
//! [TreeStore] is the only way the engine talks to the source of truth. It is a plain async
//! oracle: point queries and writes, no business logic. [MemoryStore] implements it in process
//! for tests and demos; the SQLite implementation lives in [crate::db] behind the `service`
//! feature.

use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    future::Future,
};

use crate::{
    error::MemtreeError,
    properties::{NewNode, NodeId, NodePatch, NodeRecord, ViewScope},
};

pub trait TreeStore: Sync {
    /// Top-level nodes for `scope`, in no particular order.
    fn fetch_roots(
        &self,
        scope: ViewScope,
    ) -> impl Future<Output = Result<Vec<NodeRecord>, MemtreeError>> + Send;

    fn fetch_children(
        &self,
        parent: NodeId,
    ) -> impl Future<Output = Result<Vec<NodeRecord>, MemtreeError>> + Send;

    /// The chain from the root down to and including `id`. Empty if `id` is unknown to the
    /// store.
    fn fetch_ancestor_chain(
        &self,
        id: NodeId,
    ) -> impl Future<Output = Result<Vec<NodeRecord>, MemtreeError>> + Send;

    fn fetch_node(
        &self,
        id: NodeId,
    ) -> impl Future<Output = Result<Option<NodeRecord>, MemtreeError>> + Send;

    /// Insert a node. The store assigns the id and returns the canonical record.
    fn insert_node(
        &self,
        fields: NewNode,
    ) -> impl Future<Output = Result<NodeRecord, MemtreeError>> + Send;

    fn insert_many(
        &self,
        fields: Vec<NewNode>,
    ) -> impl Future<Output = Result<Vec<NodeRecord>, MemtreeError>> + Send;

    fn update_fields(
        &self,
        id: NodeId,
        patch: &NodePatch,
    ) -> impl Future<Output = Result<(), MemtreeError>> + Send;

    fn update_parent(
        &self,
        ids: &[NodeId],
        new_parent: Option<NodeId>,
    ) -> impl Future<Output = Result<(), MemtreeError>> + Send;

    /// Delete a single node. No cascade is assumed: children must already be gone.
    fn delete_node(&self, id: NodeId) -> impl Future<Output = Result<(), MemtreeError>> + Send;

    fn count_direct_children(
        &self,
        id: NodeId,
    ) -> impl Future<Output = Result<u32, MemtreeError>> + Send;

    /// Delete every id in `ids`, children listed before their parents.
    ///
    /// The default deletes one row at a time and is therefore not atomic. Implementors with
    /// a batch primitive should override it.
    fn delete_nodes(&self, ids: &[NodeId]) -> impl Future<Output = Result<(), MemtreeError>> + Send {
        async move {
            for id in ids {
                self.delete_node(*id).await?;
            }
            Ok(())
        }
    }

    /// One past the highest order key under `parent`, or 0 for an empty scope.
    fn next_order_key(
        &self,
        parent: Option<NodeId>,
    ) -> impl Future<Output = Result<i64, MemtreeError>> + Send {
        async move {
            let siblings = match parent {
                Some(id) => self.fetch_children(id).await?,
                None => self.fetch_roots(ViewScope::All).await?,
            };
            Ok(siblings
                .iter()
                .map(|r| r.order_key)
                .max()
                .map(|key| key + 1)
                .unwrap_or(0))
        }
    }

    /// Case-insensitive substring search over name, description and code snippet.
    fn search(
        &self,
        text: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<NodeRecord>, MemtreeError>> + Send;
}

/// Operations of [MemoryStore], used to count calls and target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreOp {
    FetchRoots,
    FetchChildren,
    FetchAncestorChain,
    FetchNode,
    InsertNode,
    InsertMany,
    UpdateFields,
    UpdateParent,
    DeleteNode,
    DeleteNodes,
    CountDirectChildren,
    NextOrderKey,
    Search,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<NodeId, NodeRecord>,
    last_id: i64,
    calls: BTreeMap<StoreOp, usize>,
    /// 1-based call numbers that fail, per operation.
    failures: BTreeMap<StoreOp, BTreeSet<usize>>,
    /// Yields before answering, consumed one entry per call.
    queued_yields: BTreeMap<StoreOp, VecDeque<usize>>,
    default_yields: usize,
    /// Records cut from the end of every ancestor chain.
    chain_lag: usize,
}

impl MemoryState {
    fn child_count(&self, id: NodeId) -> u32 {
        self.rows
            .values()
            .filter(|r| r.parent_id == Some(id))
            .count() as u32
    }

    fn with_count(&self, record: &NodeRecord) -> NodeRecord {
        let mut out = record.clone();
        out.child_count = Some(self.child_count(record.id));
        out
    }

    fn insert(&mut self, fields: NewNode) -> Result<NodeRecord, MemtreeError> {
        if let Some(parent) = fields.parent_id {
            if !self.rows.contains_key(&parent) {
                return Err(MemtreeError::Store(format!(
                    "parent {parent} does not exist"
                )));
            }
        }
        self.last_id += 1;
        let record = fields.into_record(NodeId(self.last_id));
        self.rows.insert(record.id, record.clone());
        Ok(record)
    }
}

/// An in-process [TreeStore].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row without going through the async API. Returns the assigned id.
    pub fn seed(&self, parent: Option<NodeId>, order_key: i64, name: &str) -> NodeId {
        let mut state = self.state.lock();
        state.last_id += 1;
        let id = NodeId(state.last_id);
        state
            .rows
            .insert(id, NodeRecord::new(id, parent, order_key, name));
        id
    }

    /// Seed a fully specified row, keeping its id.
    pub fn seed_record(&self, record: NodeRecord) {
        let mut state = self.state.lock();
        state.last_id = state.last_id.max(record.id.0);
        let mut record = record;
        record.child_count = None;
        state.rows.insert(record.id, record);
    }

    pub fn record(&self, id: NodeId) -> Option<NodeRecord> {
        let state = self.state.lock();
        state.rows.get(&id).map(|r| state.with_count(r))
    }

    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().rows.is_empty()
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Make the `nth` (1-based, counted from now on) call of `op` fail with a fetch error.
    pub fn fail_on(&self, op: StoreOp, nth: usize) {
        let mut state = self.state.lock();
        let base = state.calls.get(&op).copied().unwrap_or(0);
        state.failures.entry(op).or_default().insert(base + nth);
    }

    /// The next call of `op` yields `count` times to the scheduler before answering.
    pub fn queue_yields(&self, op: StoreOp, count: usize) {
        self.state
            .lock()
            .queued_yields
            .entry(op)
            .or_default()
            .push_back(count);
    }

    /// Yields before every call that has no queued entry.
    pub fn set_default_yields(&self, count: usize) {
        self.state.lock().default_yields = count;
    }

    /// Ancestor chains come back missing their last `count` records, as from a replica that
    /// has not caught up with recent inserts.
    pub fn set_chain_lag(&self, count: usize) {
        self.state.lock().chain_lag = count;
    }

    /// Count the call and settle its latency and outcome before any data is read.
    async fn begin(&self, op: StoreOp) -> Result<(), MemtreeError> {
        let (call, yields, fail) = {
            let mut state = self.state.lock();
            let call = {
                let entry = state.calls.entry(op).or_insert(0);
                *entry += 1;
                *entry
            };
            let yields = state
                .queued_yields
                .get_mut(&op)
                .and_then(|q| q.pop_front())
                .unwrap_or(state.default_yields);
            let fail = state
                .failures
                .get_mut(&op)
                .map(|f| f.remove(&call))
                .unwrap_or(false);
            (call, yields, fail)
        };
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
        if fail {
            tracing::debug!("[MemoryStore.begin] injected failure on {:?} call {}", op, call);
            return Err(MemtreeError::Fetch(format!(
                "injected failure on {op:?} call {call}"
            )));
        }
        Ok(())
    }
}

impl TreeStore for MemoryStore {
    async fn fetch_roots(&self, scope: ViewScope) -> Result<Vec<NodeRecord>, MemtreeError> {
        self.begin(StoreOp::FetchRoots).await?;
        let state = self.state.lock();
        Ok(state
            .rows
            .values()
            .filter(|r| scope.admits_root(r))
            .map(|r| state.with_count(r))
            .collect())
    }

    async fn fetch_children(&self, parent: NodeId) -> Result<Vec<NodeRecord>, MemtreeError> {
        self.begin(StoreOp::FetchChildren).await?;
        let state = self.state.lock();
        Ok(state
            .rows
            .values()
            .filter(|r| r.parent_id == Some(parent))
            .map(|r| state.with_count(r))
            .collect())
    }

    async fn fetch_ancestor_chain(&self, id: NodeId) -> Result<Vec<NodeRecord>, MemtreeError> {
        self.begin(StoreOp::FetchAncestorChain).await?;
        let state = self.state.lock();
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(MemtreeError::Store(format!(
                    "parent cycle in store at {current}"
                )));
            }
            let Some(record) = state.rows.get(&current) else {
                break;
            };
            chain.push(state.with_count(record));
            cursor = record.parent_id;
        }
        chain.reverse();
        chain.truncate(chain.len().saturating_sub(state.chain_lag));
        Ok(chain)
    }

    async fn fetch_node(&self, id: NodeId) -> Result<Option<NodeRecord>, MemtreeError> {
        self.begin(StoreOp::FetchNode).await?;
        let state = self.state.lock();
        Ok(state.rows.get(&id).map(|r| state.with_count(r)))
    }

    async fn insert_node(&self, fields: NewNode) -> Result<NodeRecord, MemtreeError> {
        self.begin(StoreOp::InsertNode).await?;
        self.state.lock().insert(fields)
    }

    async fn insert_many(&self, fields: Vec<NewNode>) -> Result<Vec<NodeRecord>, MemtreeError> {
        self.begin(StoreOp::InsertMany).await?;
        let mut state = self.state.lock();
        let before = state.last_id;
        let mut inserted = Vec::with_capacity(fields.len());
        for new_node in fields {
            match state.insert(new_node) {
                Ok(record) => inserted.push(record),
                Err(e) => {
                    for record in &inserted {
                        state.rows.remove(&record.id);
                    }
                    state.last_id = before;
                    return Err(e);
                }
            }
        }
        Ok(inserted)
    }

    async fn update_fields(&self, id: NodeId, patch: &NodePatch) -> Result<(), MemtreeError> {
        self.begin(StoreOp::UpdateFields).await?;
        let mut state = self.state.lock();
        let record = state
            .rows
            .get_mut(&id)
            .ok_or_else(|| MemtreeError::NotFound(format!("node {id}")))?;
        record.apply_patch(patch);
        Ok(())
    }

    async fn update_parent(
        &self,
        ids: &[NodeId],
        new_parent: Option<NodeId>,
    ) -> Result<(), MemtreeError> {
        self.begin(StoreOp::UpdateParent).await?;
        let mut state = self.state.lock();
        if let Some(parent) = new_parent {
            if !state.rows.contains_key(&parent) {
                return Err(MemtreeError::NotFound(format!("node {parent}")));
            }
        }
        if let Some(missing) = ids.iter().find(|id| !state.rows.contains_key(id)) {
            return Err(MemtreeError::NotFound(format!("node {missing}")));
        }
        for id in ids {
            if let Some(record) = state.rows.get_mut(id) {
                record.parent_id = new_parent;
            }
        }
        Ok(())
    }

    async fn delete_node(&self, id: NodeId) -> Result<(), MemtreeError> {
        self.begin(StoreOp::DeleteNode).await?;
        let mut state = self.state.lock();
        if state.child_count(id) > 0 {
            return Err(MemtreeError::Store(format!(
                "node {id} still has children"
            )));
        }
        state.rows.remove(&id);
        Ok(())
    }

    /// All-or-nothing: rejected without changes if a surviving row would be orphaned.
    async fn delete_nodes(&self, ids: &[NodeId]) -> Result<(), MemtreeError> {
        self.begin(StoreOp::DeleteNodes).await?;
        let mut state = self.state.lock();
        let doomed: BTreeSet<NodeId> = ids.iter().copied().collect();
        if let Some(orphan) = state
            .rows
            .values()
            .find(|r| !doomed.contains(&r.id) && r.parent_id.is_some_and(|p| doomed.contains(&p)))
        {
            return Err(MemtreeError::Store(format!(
                "deleting would orphan node {}",
                orphan.id
            )));
        }
        for id in &doomed {
            state.rows.remove(id);
        }
        Ok(())
    }

    async fn count_direct_children(&self, id: NodeId) -> Result<u32, MemtreeError> {
        self.begin(StoreOp::CountDirectChildren).await?;
        Ok(self.state.lock().child_count(id))
    }

    async fn next_order_key(&self, parent: Option<NodeId>) -> Result<i64, MemtreeError> {
        self.begin(StoreOp::NextOrderKey).await?;
        let state = self.state.lock();
        Ok(state
            .rows
            .values()
            .filter(|r| r.parent_id == parent)
            .map(|r| r.order_key)
            .max()
            .map(|key| key + 1)
            .unwrap_or(0))
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<NodeRecord>, MemtreeError> {
        self.begin(StoreOp::Search).await?;
        let needle = text.trim().to_lowercase();
        let state = self.state.lock();
        Ok(state
            .rows
            .values()
            .filter(|r| r.matches_text(&needle))
            .take(limit)
            .map(|r| state.with_count(r))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (MemoryStore, NodeId, NodeId, NodeId) {
        let store = MemoryStore::new();
        let a = store.seed(None, 0, "alpha");
        let b = store.seed(Some(a), 0, "beta");
        let c = store.seed(Some(b), 4, "gamma");
        (store, a, b, c)
    }

    #[tokio::test]
    async fn ancestor_chain_is_root_first() {
        let (store, a, b, c) = sample();
        let chain = store.fetch_ancestor_chain(c).await.unwrap();
        let ids: Vec<NodeId> = chain.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert_eq!(chain[0].child_count, Some(1));
        assert_eq!(chain[2].child_count, Some(0));
        assert!(store.fetch_ancestor_chain(NodeId(99)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lagging_chains_lose_their_tail() {
        let (store, a, b, c) = sample();
        store.set_chain_lag(1);
        let chain = store.fetch_ancestor_chain(c).await.unwrap();
        assert_eq!(chain.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);
        store.set_chain_lag(5);
        assert!(store.fetch_ancestor_chain(c).await.unwrap().is_empty());
        assert!(store.fetch_node(c).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn injected_failures_hit_the_requested_call() {
        let (store, a, _, _) = sample();
        store.fail_on(StoreOp::FetchChildren, 2);
        assert!(store.fetch_children(a).await.is_ok());
        let err = store.fetch_children(a).await.unwrap_err();
        assert!(matches!(err, MemtreeError::Fetch(_)));
        assert!(store.fetch_children(a).await.is_ok());
        assert_eq!(store.calls(StoreOp::FetchChildren), 3);
    }

    #[tokio::test]
    async fn next_key_and_batch_delete() {
        let (store, a, b, c) = sample();
        assert_eq!(store.next_order_key(Some(b)).await.unwrap(), 5);
        assert_eq!(store.next_order_key(Some(c)).await.unwrap(), 0);
        assert_eq!(store.next_order_key(None).await.unwrap(), 1);

        assert!(store.delete_nodes(&[b]).await.is_err());
        assert_eq!(store.len(), 3);
        store.delete_nodes(&[c, b]).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.record(a).is_some());
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let (store, _, b, _) = sample();
        let hits = store.search("  BET ", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, b);
    }
}
