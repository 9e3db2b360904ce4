use crate::{
    error::MemtreeError,
    event::EventOrigin,
    forest::{merge_fetched, Children},
    mutation::splice_chain_node,
    properties::{NodeId, NodeRecord},
    store::TreeStore,
};

use super::{Outcome, TreeEngine};

impl<S: TreeStore> TreeEngine<S> {
    /// Make `target` reachable, expanded, selected and focused, whatever is loaded so far.
    ///
    /// Roots and the ancestor chain are fetched concurrently (roots are reused when the root
    /// list is already loaded). The chain is merged by id, so loaded siblings and subtrees along
    /// the way survive. Ancestors are then expanded root first through the expansion funnel,
    /// which fills in their full child lists. Returns the expanded ancestors, root first.
    #[tracing::instrument(skip(self))]
    pub async fn reveal_path(&self, target: NodeId) -> Result<Outcome<Vec<NodeId>>, MemtreeError> {
        let token = self.epoch.advance();
        let (scope, reuse_roots) = {
            let state = self.state.lock();
            (state.scope, state.forest.roots().is_loaded())
        };

        let roots_fut = async {
            if reuse_roots {
                Ok(None)
            } else {
                self.store.fetch_roots(scope).await.map(Some)
            }
        };
        let chain_fut = self.store.fetch_ancestor_chain(target);
        let (roots, mut chain) = match tokio::try_join!(roots_fut, chain_fut) {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!("[TreeEngine.reveal_path] fetch for {} failed: {}", target, e);
                self.report(&e);
                return Err(e);
            }
        };

        if chain.last().map(|r| r.id) != Some(target) {
            tracing::debug!(
                "[TreeEngine.reveal_path] chain for {} did not end at the target, fetching it directly",
                target
            );
            match self.store.fetch_node(target).await {
                Ok(Some(record)) => chain.push(record),
                Ok(None) => {
                    let e = MemtreeError::NotFound(format!("node {target}"));
                    self.report(&e);
                    return Err(e);
                }
                Err(e) => {
                    self.report(&e);
                    return Err(e);
                }
            }
        }

        let (ancestors, next_expanded) = {
            let mut state = self.state.lock();
            if !self.epoch.is_current(token) {
                tracing::warn!(
                    "[TreeEngine.reveal_path] discarding path to {} (load {} superseded by {})",
                    target,
                    token.generation(),
                    self.epoch.current()
                );
                return Ok(Outcome::Discarded);
            }
            if let Some(roots) = roots {
                state.index.absorb_all(&roots);
                let merged = merge_fetched(state.forest.root_nodes(), roots);
                state.forest = state.forest.with_roots(Children::Loaded(merged));
            }
            for record in &chain {
                state.index.absorb(record);
                state.forest = splice_chain_node(&state.forest, record);
            }
            state.selection.replace(target);

            let ancestors = chain_ancestors(&chain, target);
            let mut next_expanded = state.expanded.ids().to_vec();
            for id in &ancestors {
                if !next_expanded.contains(id) {
                    next_expanded.push(*id);
                }
            }
            (ancestors, next_expanded)
        };
        self.emit_forest(EventOrigin::Remote);
        self.emit_selection(&self.selection());

        if let Err(e) = self.set_expanded(&next_expanded).await {
            tracing::warn!(
                "[TreeEngine.reveal_path] expanding the path to {} was incomplete: {}",
                target,
                e
            );
        }
        if !self.request_focus(target).await {
            tracing::debug!("[TreeEngine.reveal_path] {} revealed without focus", target);
        }
        Ok(Outcome::Applied(ancestors))
    }
}

/// Ids of the chain above `target`, root first. Only the run linked upward from the
/// target's own parent counts; a stale chain is cut where the links stop.
fn chain_ancestors(chain: &[NodeRecord], target: NodeId) -> Vec<NodeId> {
    let Some(pos) = chain.iter().position(|r| r.id == target) else {
        return Vec::new();
    };
    let mut expected = chain[pos].parent_id;
    let mut ancestors = Vec::new();
    for record in chain[..pos].iter().rev() {
        if Some(record.id) != expected {
            break;
        }
        ancestors.push(record.id);
        expected = record.parent_id;
    }
    ancestors.reverse();
    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_ancestors_follow_links() {
        let chain = vec![
            NodeRecord::new(NodeId(1), None, 0, "a"),
            NodeRecord::new(NodeId(2), Some(NodeId(1)), 0, "b"),
            NodeRecord::new(NodeId(3), Some(NodeId(2)), 0, "c"),
        ];
        assert_eq!(chain_ancestors(&chain, NodeId(3)), vec![NodeId(1), NodeId(2)]);
        assert!(chain_ancestors(&chain[..1], NodeId(1)).is_empty());
    }

    #[test]
    fn chain_ancestors_stop_at_a_missing_link() {
        // 3 sits under 2, which the chain skipped.
        let chain = vec![
            NodeRecord::new(NodeId(1), None, 0, "a"),
            NodeRecord::new(NodeId(3), Some(NodeId(2)), 0, "c"),
        ];
        assert!(chain_ancestors(&chain, NodeId(3)).is_empty());

        let chain = vec![
            NodeRecord::new(NodeId(7), None, 0, "stale"),
            NodeRecord::new(NodeId(1), None, 0, "a"),
            NodeRecord::new(NodeId(2), Some(NodeId(1)), 0, "b"),
            NodeRecord::new(NodeId(3), Some(NodeId(2)), 0, "c"),
        ];
        assert_eq!(chain_ancestors(&chain, NodeId(3)), vec![NodeId(1), NodeId(2)]);
        assert!(chain_ancestors(&chain, NodeId(9)).is_empty());
    }
}
