use std::collections::BTreeSet;

use crate::{
    error::MemtreeError,
    event::EventOrigin,
    mutation::move_node,
    properties::NodeId,
    selection::{resolve_drop, DropAction, DropGesture},
    store::TreeStore,
};

use super::{Outcome, TreeEngine};

impl<S: TreeStore> TreeEngine<S> {
    /// Move every id in `moved` under `new_parent` (`None` detaches to the root list).
    ///
    /// Rejected before any write when the target is one of the moved nodes or sits anywhere
    /// below one of them. The parent change is persisted in one bulk update, applied locally,
    /// and then only the affected sibling scopes are refetched. Order keys are left as they
    /// were, so the receiving group may hold duplicate keys until it is re-indexed.
    #[tracing::instrument(skip(self))]
    pub async fn reparent(
        &self,
        moved: &[NodeId],
        new_parent: Option<NodeId>,
    ) -> Result<Outcome<usize>, MemtreeError> {
        let mut ids = Vec::with_capacity(moved.len());
        for id in moved {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        if ids.is_empty() {
            return Ok(Outcome::Skipped);
        }

        if let Some(target) = new_parent {
            if ids.contains(&target) {
                return Err(self.reject(format!("cannot move {target} under itself")));
            }
            let local_cycle = {
                let state = self.state.lock();
                let known_ancestors = state.index.ancestors(target);
                ids.iter().copied().find(|id| {
                    state.forest.is_descendant(*id, target) || known_ancestors.contains(id)
                })
            };
            if let Some(ancestor) = local_cycle {
                return Err(self.reject(format!(
                    "cannot move {ancestor} under its own descendant {target}"
                )));
            }
            let chain = match self.store.fetch_ancestor_chain(target).await {
                Ok(chain) => chain,
                Err(e) => {
                    self.report(&e);
                    return Err(e);
                }
            };
            if chain.is_empty() {
                return Err(self.reject(format!("move target {target} does not exist")));
            }
            if let Some(ancestor) = chain.iter().find(|r| ids.contains(&r.id)) {
                return Err(self.reject(format!(
                    "cannot move {} under its own descendant {target}",
                    ancestor.id
                )));
            }
            self.state.lock().index.absorb_all(&chain);
        }

        let old_parents = {
            let state = self.state.lock();
            ids.iter()
                .filter_map(|id| {
                    state
                        .forest
                        .parent_of(*id)
                        .or_else(|| state.index.get(*id).map(|r| r.parent_id))
                })
                .collect::<BTreeSet<Option<NodeId>>>()
        };

        if let Err(e) = self.store.update_parent(&ids, new_parent).await {
            tracing::error!("[TreeEngine.reparent] update of {:?} failed: {}", ids, e);
            self.report(&e);
            return Err(e);
        }
        tracing::info!(
            "[TreeEngine.reparent] moved {} node(s) under {:?}",
            ids.len(),
            new_parent
        );

        {
            let mut state = self.state.lock();
            for id in &ids {
                state.forest = move_node(&state.forest, *id, new_parent);
                state.index.set_parent(*id, new_parent);
            }
        }
        self.emit_forest(EventOrigin::Local);

        let mut scopes = old_parents;
        scopes.insert(new_parent);
        for scope in scopes {
            self.refresh_scope(scope).await;
        }
        Ok(Outcome::Applied(ids.len()))
    }

    /// Resolve a drag-and-drop release into a move of the selection plus the dragged item.
    #[tracing::instrument(skip(self))]
    pub async fn drop_items(
        &self,
        dragged: NodeId,
        gesture: DropGesture,
    ) -> Result<Outcome<usize>, MemtreeError> {
        let Some(action) = resolve_drop(dragged, &gesture, self.config.drag_detach_threshold)
        else {
            return Ok(Outcome::Skipped);
        };
        let moved = self.selection().move_set(dragged);
        match action {
            DropAction::Onto(target) => self.reparent(&moved, Some(target)).await,
            DropAction::Detach => self.reparent(&moved, None).await,
        }
    }

    /// Refetch one sibling scope if it is materialized. Failures are reported, not returned:
    /// the write they follow has already been committed.
    pub(crate) async fn refresh_scope(&self, scope: Option<NodeId>) {
        let result = match scope {
            None => {
                let roots_loaded = self.state.lock().forest.roots().is_loaded();
                if !roots_loaded {
                    return;
                }
                self.reload().await
            }
            Some(id) => {
                let materialized = {
                    let state = self.state.lock();
                    state
                        .forest
                        .find(id)
                        .map(|n| !n.children.is_unloaded())
                        .unwrap_or(false)
                };
                if !materialized {
                    return;
                }
                self.refresh_children(id).await
            }
        };
        if let Err(e) = result {
            tracing::warn!("[TreeEngine.refresh_scope] refresh of {:?} failed: {}", scope, e);
        }
    }

    pub(crate) fn reject(&self, reason: String) -> MemtreeError {
        tracing::warn!("[TreeEngine] rejected: {}", reason);
        let err = MemtreeError::Validation(reason);
        self.report(&err);
        err
    }
}
