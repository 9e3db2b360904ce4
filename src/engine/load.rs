use crate::{
    error::MemtreeError,
    event::{EventOrigin, TreeEvent},
    forest::{merge_fetched, Children},
    mutation::replace_children,
    properties::{NodeId, ViewScope},
    store::TreeStore,
};

use super::{Outcome, TreeEngine};

impl<S: TreeStore> TreeEngine<S> {
    /// Fetch the root list for `scope` and make it the forest's root list.
    ///
    /// Roots that survive the fetch keep their loaded subtrees. The result is dropped if a
    /// newer forest-replacing load was issued while this one was in flight.
    #[tracing::instrument(skip(self))]
    pub async fn load_roots(&self, scope: ViewScope) -> Result<Outcome<usize>, MemtreeError> {
        let token = self.epoch.advance();
        self.state.lock().scope = scope;

        let fetched = self.store.fetch_roots(scope).await;

        let records = match fetched {
            Ok(records) => records,
            Err(e) if !self.epoch.is_current(token) => {
                tracing::debug!(
                    "[TreeEngine.load_roots] superseded load {} failed, ignoring: {}",
                    token.generation(),
                    e
                );
                return Ok(Outcome::Discarded);
            }
            Err(e) => {
                tracing::error!("[TreeEngine.load_roots] fetch failed: {}", e);
                self.report(&e);
                return Err(e);
            }
        };

        let count = records.len();
        {
            let mut state = self.state.lock();
            if !self.epoch.is_current(token) {
                tracing::warn!(
                    "[TreeEngine.load_roots] discarding stale root list (load {} superseded by {})",
                    token.generation(),
                    self.epoch.current()
                );
                return Ok(Outcome::Discarded);
            }
            state.index.absorb_all(&records);
            let roots = merge_fetched(state.forest.root_nodes(), records);
            state.forest = state.forest.with_roots(Children::Loaded(roots));
        }
        tracing::debug!("[TreeEngine.load_roots] applied {} root(s)", count);
        self.emit_forest(EventOrigin::Remote);
        Ok(Outcome::Applied(count))
    }

    /// Reload the root list for the current scope.
    pub async fn reload(&self) -> Result<Outcome<usize>, MemtreeError> {
        let scope = self.scope();
        self.load_roots(scope).await
    }

    /// Fetch the direct children of `id` unless they are already loaded or being loaded.
    #[tracing::instrument(skip(self))]
    pub async fn load_children(&self, id: NodeId) -> Result<Outcome<usize>, MemtreeError> {
        self.fetch_children_of(id, false).await
    }

    /// Like [TreeEngine::load_children], but also refetches an already loaded list. A load
    /// already in flight still short-circuits.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_children(&self, id: NodeId) -> Result<Outcome<usize>, MemtreeError> {
        self.fetch_children_of(id, true).await
    }

    async fn fetch_children_of(
        &self,
        id: NodeId,
        force: bool,
    ) -> Result<Outcome<usize>, MemtreeError> {
        {
            let mut state = self.state.lock();
            let Some(node) = state.forest.find(id) else {
                return Err(MemtreeError::NotFound(format!(
                    "node {id} is not in the loaded forest"
                )));
            };
            let wanted = match &node.children {
                Children::Loading { .. } => false,
                Children::Loaded(_) => force,
                Children::Unloaded | Children::Partial(_) => true,
            };
            if !wanted {
                tracing::debug!(
                    "[TreeEngine.load_children] {} skipped, children already {}",
                    id,
                    if node.children.is_loading() {
                        "loading"
                    } else {
                        "loaded"
                    }
                );
                return Ok(Outcome::Skipped);
            }
            let loading = node.children.begin_loading();
            state.forest = replace_children(&state.forest, Some(id), loading);
        }
        self.emit_forest(EventOrigin::Local);

        let records = match self.store.fetch_children(id).await {
            Ok(records) => records,
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    if let Some(children) = state.forest.children_of(Some(id)) {
                        let restored = children.fail_loading();
                        state.forest = replace_children(&state.forest, Some(id), restored);
                    }
                }
                tracing::error!("[TreeEngine.load_children] fetch for {} failed: {}", id, e);
                self.emit_forest(EventOrigin::Local);
                self.report(&e);
                return Err(e);
            }
        };

        let count = records.len();
        {
            let mut state = self.state.lock();
            let Some(children) = state.forest.children_of(Some(id)) else {
                tracing::debug!(
                    "[TreeEngine.load_children] {} left the forest while loading, dropping result",
                    id
                );
                state.index.absorb_all(&records);
                return Ok(Outcome::Discarded);
            };
            let merged = merge_fetched(children.known(), records.clone());
            state.forest = replace_children(&state.forest, Some(id), Children::Loaded(merged));
            state.index.absorb_all(&records);
        }
        tracing::debug!("[TreeEngine.load_children] {} has {} child(ren)", id, count);
        self.emit_forest(EventOrigin::Remote);
        Ok(Outcome::Applied(count))
    }

    /// The single expansion funnel. Replaces the expansion set with `next` and loads children
    /// only for ids newly added, in `next`'s order. Collapsing never discards fetched children.
    #[tracing::instrument(skip(self))]
    pub async fn set_expanded(&self, next: &[NodeId]) -> Result<(), MemtreeError> {
        let diff = {
            let mut state = self.state.lock();
            let diff = state.expanded.diff(next);
            state.expanded.replace(next);
            diff
        };
        if diff.added.is_empty() && diff.removed.is_empty() {
            return Ok(());
        }
        self.emit(TreeEvent::ExpansionChanged(next.to_vec()));

        let mut first_error = None;
        for id in diff.added {
            let needs_fetch = {
                let state = self.state.lock();
                state.forest.find(id).map(|n| n.children.needs_fetch())
            };
            match needs_fetch {
                Some(true) => {
                    if let Err(e) = self.load_children(id).await {
                        first_error.get_or_insert(e);
                    }
                }
                Some(false) => {}
                None => tracing::debug!(
                    "[TreeEngine.set_expanded] {} expanded but not materialized",
                    id
                ),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn expand(&self, id: NodeId) -> Result<(), MemtreeError> {
        let mut next = self.expanded();
        if !next.contains(&id) {
            next.push(id);
        }
        self.set_expanded(&next).await
    }

    pub async fn collapse(&self, id: NodeId) -> Result<(), MemtreeError> {
        let mut next = self.expanded();
        next.retain(|e| *e != id);
        self.set_expanded(&next).await
    }

    pub async fn toggle_expanded(&self, id: NodeId) -> Result<(), MemtreeError> {
        if self.is_expanded(id) {
            self.collapse(id).await
        } else {
            self.expand(id).await
        }
    }
}
