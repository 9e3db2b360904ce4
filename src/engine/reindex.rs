use std::collections::BTreeMap;

use crate::{
    error::MemtreeError,
    event::{EventOrigin, Severity, TreeEvent},
    forest::{merge_fetched, Children},
    mutation::replace_children,
    properties::{NodeId, NodePatch, NodeRecord},
    store::TreeStore,
};

use super::TreeEngine;

impl<S: TreeStore> TreeEngine<S> {
    /// Renumber the run of siblings from `anchor` onward as `start, start + 1, …`.
    ///
    /// The run is every sibling whose key is at least the anchor's, ordered by `(key, id)` as
    /// the store reports them at call time. Siblings below the anchor keep their keys. The
    /// root list is never resequenced. Keys are written one row at a time; a failure stops the
    /// run and reports how many rows were already committed, and those stay committed.
    #[tracing::instrument(skip(self))]
    pub async fn reindex_from(&self, anchor: NodeId, start: i64) -> Result<usize, MemtreeError> {
        if start < 0 {
            return Err(self.reject(format!("re-index start {start} must not be negative")));
        }
        let known = self.node(anchor).map(|r| (*r).clone());
        let anchor_record = match known {
            Some(record) => record,
            None => match self.store.fetch_node(anchor).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return Err(self.reject(format!("re-index anchor {anchor} does not exist")))
                }
                Err(e) => {
                    self.report(&e);
                    return Err(e);
                }
            },
        };
        let Some(parent) = anchor_record.parent_id else {
            return Err(self.reject(format!(
                "{anchor} is a root; root order is not re-indexed"
            )));
        };

        let siblings = match self.store.fetch_children(parent).await {
            Ok(siblings) => siblings,
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };
        let Some(anchor_key) = siblings
            .iter()
            .find(|r| r.id == anchor)
            .map(|r| r.order_key)
        else {
            return Err(self.reject(format!(
                "re-index anchor {anchor} is no longer under {parent}"
            )));
        };

        let mut run = siblings
            .iter()
            .filter(|r| r.order_key >= anchor_key)
            .collect::<Vec<_>>();
        run.sort_by(|a, b| NodeRecord::cmp_siblings(a, b));
        let plan = run
            .iter()
            .zip(start..)
            .map(|(record, key)| (record.id, key))
            .collect::<Vec<_>>();

        let mut committed = BTreeMap::new();
        let mut failure = None;
        for (id, key) in &plan {
            match self
                .store
                .update_fields(*id, &NodePatch::order_key(*key))
                .await
            {
                Ok(()) => {
                    committed.insert(*id, *key);
                }
                Err(e) => {
                    failure = Some(MemtreeError::ReindexAborted {
                        updated: committed.len(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        let updated = siblings
            .into_iter()
            .map(|mut record| {
                if let Some(key) = committed.get(&record.id) {
                    record.order_key = *key;
                }
                record
            })
            .collect::<Vec<_>>();
        self.apply_sibling_scope(parent, updated);
        self.emit_forest(EventOrigin::Remote);

        match failure {
            Some(e) => {
                tracing::error!("[TreeEngine.reindex_from] {}", e);
                self.report(&e);
                Err(e)
            }
            None => {
                tracing::info!(
                    "[TreeEngine.reindex_from] re-indexed {} sibling(s) under {} from {}",
                    committed.len(),
                    parent,
                    start
                );
                self.emit(TreeEvent::message(
                    format!("Re-indexed {} item(s)", committed.len()),
                    Severity::Success,
                ));
                Ok(committed.len())
            }
        }
    }

    /// Install a freshly fetched full sibling list for `parent`, keeping loaded subtrees.
    fn apply_sibling_scope(&self, parent: NodeId, siblings: Vec<NodeRecord>) {
        let mut state = self.state.lock();
        state.index.absorb_all(&siblings);
        let Some(children) = state.forest.children_of(Some(parent)) else {
            return;
        };
        let merged = merge_fetched(children.known(), siblings);
        let next = if children.is_loading() {
            children.with_nodes(merged)
        } else {
            Children::Loaded(merged)
        };
        state.forest = replace_children(&state.forest, Some(parent), next);
    }
}
