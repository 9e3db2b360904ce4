//! Id-keyed record cache covering every node the client has seen.
//!
//! The index is broader than the forest: search hits and ancestor-chain fetches land here even
//! when the node is not (yet) materialized under a loaded parent. Entries are shared through
//! [Arc] and replaced only when a fetch actually changes a field, so holders of an entry can
//! compare by pointer to detect change.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::properties::{NodeId, NodePatch, NodeRecord};

#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    records: BTreeMap<NodeId, Arc<NodeRecord>>,
}

impl NodeIndex {
    pub fn get(&self, id: NodeId) -> Option<&Arc<NodeRecord>> {
        self.records.get(&id)
    }

    /// Merge a fetched record. The existing entry is kept as-is when nothing changed.
    pub fn absorb(&mut self, record: &NodeRecord) -> Arc<NodeRecord> {
        match self.records.get(&record.id) {
            Some(existing) => {
                let mut next = (**existing).clone();
                next.overlay(record);
                if next == **existing {
                    existing.clone()
                } else {
                    let next = Arc::new(next);
                    self.records.insert(record.id, next.clone());
                    next
                }
            }
            None => {
                let entry = Arc::new(record.clone());
                self.records.insert(record.id, entry.clone());
                entry
            }
        }
    }

    pub fn absorb_all<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a NodeRecord>,
    {
        for record in records {
            self.absorb(record);
        }
    }

    pub fn apply_patch(&mut self, id: NodeId, patch: &NodePatch) {
        if let Some(entry) = self.records.get_mut(&id) {
            Arc::make_mut(entry).apply_patch(patch);
        }
    }

    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        if let Some(entry) = self.records.get_mut(&id) {
            if entry.parent_id != parent {
                Arc::make_mut(entry).parent_id = parent;
            }
        }
    }

    pub fn remove_all<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a NodeId>,
    {
        for id in ids {
            self.records.remove(id);
        }
    }

    /// Known ancestors of `id`, root first, excluding `id`. Stops where the chain leaves the
    /// index (or loops, which a consistent store never produces).
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::from([id]);
        let mut cursor = self.records.get(&id).and_then(|r| r.parent_id);
        while let Some(parent) = cursor {
            if !seen.insert(parent) {
                tracing::warn!("[NodeIndex.ancestors] parent cycle detected at {}", parent);
                break;
            }
            chain.push(parent);
            cursor = self.records.get(&parent).and_then(|r| r.parent_id);
        }
        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, parent: Option<i64>, key: i64) -> NodeRecord {
        NodeRecord::new(NodeId(id), parent.map(NodeId), key, &format!("n{id}"))
    }

    #[test]
    fn absorb_keeps_identity_when_unchanged() {
        let mut index = NodeIndex::default();
        let first = index.absorb(&record(1, None, 0));
        let again = index.absorb(&record(1, None, 0));
        assert!(Arc::ptr_eq(&first, &again));

        let mut renamed = record(1, None, 0);
        renamed.name = "renamed".to_string();
        let changed = index.absorb(&renamed);
        assert!(!Arc::ptr_eq(&first, &changed));
        assert_eq!(index.get(NodeId(1)).unwrap().name, "renamed");
    }

    #[test]
    fn ancestors_walk_parent_links() {
        let mut index = NodeIndex::default();
        index.absorb_all(&[record(1, None, 0), record(2, Some(1), 0), record(3, Some(2), 0)]);
        assert_eq!(index.ancestors(NodeId(3)), vec![NodeId(1), NodeId(2)]);
        assert!(index.ancestors(NodeId(1)).is_empty());

        index.absorb(&record(9, Some(8), 0));
        assert_eq!(index.ancestors(NodeId(9)), vec![NodeId(8)]);
    }

    #[test]
    fn ancestors_survive_parent_cycles() {
        let mut index = NodeIndex::default();
        index.absorb_all(&[record(1, Some(2), 0), record(2, Some(1), 0)]);
        assert_eq!(index.ancestors(NodeId(1)), vec![NodeId(2)]);
    }
}
