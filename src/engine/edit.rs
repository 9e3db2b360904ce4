use std::{collections::BTreeSet, sync::Arc};

use crate::{
    error::MemtreeError,
    event::{EventOrigin, Severity, TreeEvent},
    forest::{Children, TreeNode},
    mutation::{insert_child, remove_by_id, update_by_id},
    properties::{NewNode, NodeFlag, NodeId, NodePatch, NodeRecord},
    store::TreeStore,
};

use super::TreeEngine;

impl<S: TreeStore> TreeEngine<S> {
    /// Append a default-named child to `parent` (a new root for `None`), expand the parent and
    /// focus the new node.
    #[tracing::instrument(skip(self))]
    pub async fn create_child(&self, parent: Option<NodeId>) -> Result<NodeRecord, MemtreeError> {
        let name = self.config.new_child_name.clone();
        let record = self.insert_one(NewNode::named(parent, 0, &name)).await?;
        if let Some(parent) = parent {
            if let Err(e) = self.expand(parent).await {
                tracing::warn!("[TreeEngine.create_child] could not expand {}: {}", parent, e);
            }
        }
        self.request_focus(record.id).await;
        Ok(record)
    }

    /// Append a new root flagged as a list marker.
    #[tracing::instrument(skip(self))]
    pub async fn create_list(&self) -> Result<NodeRecord, MemtreeError> {
        let fields = NewNode {
            is_list_marker: true,
            ..NewNode::named(None, 0, &self.config.new_list_name)
        };
        let record = self.insert_one(fields).await?;
        self.request_focus(record.id).await;
        Ok(record)
    }

    /// Insert `fields` at the end of its sibling group. The order key in `fields` is replaced.
    async fn insert_one(&self, mut fields: NewNode) -> Result<NodeRecord, MemtreeError> {
        let inserted = async move {
            fields.order_key = self.store.next_order_key(fields.parent_id).await?;
            self.store.insert_node(fields).await
        }
        .await;
        let record = match inserted {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("[TreeEngine.insert_one] insert failed: {}", e);
                self.report(&e);
                return Err(e);
            }
        };
        tracing::info!(
            "[TreeEngine.insert_one] created {} under {:?}",
            record.id,
            record.parent_id
        );
        self.apply_inserted(std::slice::from_ref(&record));
        Ok(record)
    }

    /// Bulk insert `count` numbered children under `parent` with consecutive keys after the
    /// current last sibling.
    #[tracing::instrument(skip(self))]
    pub async fn insert_many(
        &self,
        parent: NodeId,
        count: usize,
    ) -> Result<Vec<NodeRecord>, MemtreeError> {
        if count == 0 {
            return Err(self.reject("insert count must be at least 1".to_string()));
        }
        let inserted = async {
            let first_key = self.store.next_order_key(Some(parent)).await?;
            let fields = (1..=count)
                .zip(first_key..)
                .map(|(n, key)| {
                    NewNode::named(
                        Some(parent),
                        key,
                        &format!("{} {}", self.config.new_child_name, n),
                    )
                })
                .collect::<Vec<_>>();
            self.store.insert_many(fields).await
        }
        .await;
        let records = match inserted {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("[TreeEngine.insert_many] insert under {} failed: {}", parent, e);
                self.report(&e);
                return Err(e);
            }
        };
        tracing::info!(
            "[TreeEngine.insert_many] created {} item(s) under {}",
            records.len(),
            parent
        );
        self.apply_inserted(&records);
        self.emit(TreeEvent::message(
            format!("Added {} item(s)", records.len()),
            Severity::Success,
        ));
        Ok(records)
    }

    fn apply_inserted(&self, records: &[NodeRecord]) {
        {
            let mut state = self.state.lock();
            for record in records {
                state.index.absorb(record);
                let visible = match record.parent_id {
                    Some(_) => true,
                    None => state.scope.admits_root(record),
                };
                if visible {
                    state.forest = insert_child(&state.forest, record.parent_id, record.clone());
                }
            }
        }
        self.emit_forest(EventOrigin::Remote);
    }

    /// Apply `patch` locally right away, then persist it. If the store rejects it the previous
    /// values are put back.
    #[tracing::instrument(skip(self))]
    pub async fn update_fields(&self, id: NodeId, patch: NodePatch) -> Result<(), MemtreeError> {
        if patch.is_empty() {
            return Ok(());
        }
        let inverse = {
            let mut state = self.state.lock();
            let before = match (state.index.get(id), state.forest.find(id)) {
                (Some(record), _) => (**record).clone(),
                (None, Some(node)) => node.record.clone(),
                (None, None) => {
                    return Err(MemtreeError::NotFound(format!("node {id}")));
                }
            };
            state.forest = update_by_id(&state.forest, id, &patch);
            state.index.apply_patch(id, &patch);
            patch.inverse(&before)
        };
        self.emit_forest(EventOrigin::Local);

        if let Err(e) = self.store.update_fields(id, &patch).await {
            {
                let mut state = self.state.lock();
                state.forest = update_by_id(&state.forest, id, &inverse);
                state.index.apply_patch(id, &inverse);
            }
            tracing::error!("[TreeEngine.update_fields] update of {} failed, reverted: {}", id, e);
            self.emit_forest(EventOrigin::Local);
            self.report(&e);
            return Err(e);
        }
        tracing::info!("[TreeEngine.update_fields] updated {}", id);
        Ok(())
    }

    pub async fn set_flag(&self, id: NodeId, flag: NodeFlag, value: bool) -> Result<(), MemtreeError> {
        self.update_fields(id, NodePatch::flag(flag, value)).await
    }

    /// Flip the starred flag. Returns the new value.
    pub async fn toggle_starred(&self, id: NodeId) -> Result<bool, MemtreeError> {
        let current = self
            .node(id)
            .map(|r| r.starred)
            .ok_or_else(|| MemtreeError::NotFound(format!("node {id}")))?;
        self.set_flag(id, NodeFlag::Starred, !current).await?;
        Ok(!current)
    }

    /// Delete `id` and everything below it.
    ///
    /// The subtree is collected from the store with an explicit worklist, deleted in one batch
    /// children first, and only removed locally once the whole batch succeeded. On any failure
    /// the local forest is left exactly as it was.
    #[tracing::instrument(skip(self))]
    pub async fn delete_subtree(&self, id: NodeId) -> Result<usize, MemtreeError> {
        let doomed = match self.collect_subtree(id).await {
            Ok(ids) => ids,
            Err(e) => {
                let err = MemtreeError::DeleteAborted {
                    reason: e.to_string(),
                };
                tracing::error!("[TreeEngine.delete_subtree] {}", err);
                self.report(&err);
                return Err(err);
            }
        };
        if let Err(e) = self.store.delete_nodes(&doomed).await {
            let err = MemtreeError::DeleteAborted {
                reason: e.to_string(),
            };
            tracing::error!("[TreeEngine.delete_subtree] {}", err);
            self.report(&err);
            return Err(err);
        }
        tracing::info!(
            "[TreeEngine.delete_subtree] deleted {} node(s) rooted at {}",
            doomed.len(),
            id
        );

        let removed = doomed.iter().copied().collect::<BTreeSet<_>>();
        let (selection, selection_changed) = {
            let mut state = self.state.lock();
            state.forest = remove_by_id(&state.forest, id);
            state.index.remove_all(&doomed);
            let before = state.selection.clone();
            state.selection.retain(|s| !removed.contains(&s));
            state.expanded.retain(|e| !removed.contains(&e));
            (state.selection.clone(), before != state.selection)
        };
        self.emit_forest(EventOrigin::Remote);
        if selection_changed {
            self.emit_selection(&selection);
        }
        self.emit(TreeEvent::message(
            format!("Deleted {} item(s)", doomed.len()),
            Severity::Success,
        ));
        Ok(doomed.len())
    }

    /// `id` and all its descendants as the store reports them, children before parents.
    async fn collect_subtree(&self, id: NodeId) -> Result<Vec<NodeId>, MemtreeError> {
        if self.store.fetch_node(id).await?.is_none() {
            return Err(MemtreeError::NotFound(format!("node {id}")));
        }
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let mut worklist = vec![id];
        while let Some(current) = worklist.pop() {
            if !seen.insert(current) {
                continue;
            }
            order.push(current);
            for child in self.store.fetch_children(current).await? {
                worklist.push(child.id);
            }
        }
        order.reverse();
        Ok(order)
    }

    /// Search the store. Hits land in the node index, not the forest, so a following
    /// [TreeEngine::reveal_path] already has their fields.
    #[tracing::instrument(skip(self))]
    pub async fn search(&self, text: &str) -> Result<Vec<NodeRecord>, MemtreeError> {
        let needle = text.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let hits = match self.store.search(needle, self.config.search_limit).await {
            Ok(hits) => hits,
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };
        tracing::debug!("[TreeEngine.search] {} hit(s) for {:?}", hits.len(), needle);
        self.state.lock().index.absorb_all(&hits);
        Ok(hits)
    }

    /// Reconcile the child count hint of `id` without loading its children. A loaded list the
    /// count disagrees with is demoted so the next expansion refetches it.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_child_count(&self, id: NodeId) -> Result<u32, MemtreeError> {
        let count = match self.store.count_direct_children(id).await {
            Ok(count) => count,
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };
        {
            let mut state = self.state.lock();
            if let Some(record) = state.index.get(id).map(|r| (**r).clone()) {
                let mut next = record;
                next.child_count = Some(count);
                state.index.absorb(&next);
            }
            if let Some(next) = state.forest.rewrite_node(id, |node| {
                let mut record = node.record.clone();
                record.child_count = Some(count);
                let children = match &node.children {
                    Children::Loaded(nodes) if nodes.len() as u32 != count => {
                        Children::Unloaded.with_nodes(nodes.clone())
                    }
                    other => other.clone(),
                };
                Some(TreeNode { record, children })
            }) {
                state.forest = next;
            }
        }
        self.emit_forest(EventOrigin::Remote);
        Ok(count)
    }

    /// The materialized node for `id`, if it is in the forest.
    pub fn materialized(&self, id: NodeId) -> Option<Arc<TreeNode>> {
        self.state.lock().forest.find(id).cloned()
    }
}
