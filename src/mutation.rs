//! Pure forest rewrites.
//!
//! Every function takes the current [Forest] by reference and returns the next one; nothing is
//! mutated in place. Only the nodes on the path from the root list to the change are
//! reallocated. A target that is not materialized yields an unchanged (pointer-equal) forest,
//! which also makes removal idempotent.

use std::sync::Arc;

use crate::{
    forest::{sort_siblings, Children, Forest, TreeNode},
    properties::{NodeFlag, NodeId, NodePatch, NodeRecord},
};

/// Shallow-merge `patch` into node `id`. A changed order key re-sorts the sibling group.
pub fn update_by_id(forest: &Forest, id: NodeId, patch: &NodePatch) -> Forest {
    let Some(next) = forest.rewrite_node(id, |node| {
        let mut record = node.record.clone();
        record.apply_patch(patch);
        Some(TreeNode {
            record,
            children: node.children.clone(),
        })
    }) else {
        return forest.clone();
    };
    if patch.order_key.is_none() {
        return next;
    }
    match next.parent_of(id) {
        Some(parent) => resort_children(&next, parent),
        None => next,
    }
}

/// Delete node `id` and its whole materialized subtree.
///
/// The parent's `child_count` hint drops by exactly one. It is not recomputed from the
/// remaining list, which may only be partially loaded.
pub fn remove_by_id(forest: &Forest, id: NodeId) -> Forest {
    let Some(parent) = forest.parent_of(id) else {
        return forest.clone();
    };
    forest
        .rewrite_children(parent, |record, children| {
            let remaining = children
                .known()
                .iter()
                .filter(|n| n.id() != id)
                .cloned()
                .collect::<Vec<_>>();
            record.child_count = record.child_count.map(|c| c.saturating_sub(1));
            children.with_nodes(remaining)
        })
        .unwrap_or_else(|| forest.clone())
}

/// Add a freshly created node under `parent` (the root list for `None`) and bump the
/// parent's count hint. A parent whose children were never fetched ends up `Partial`.
pub fn insert_child(forest: &Forest, parent: Option<NodeId>, record: NodeRecord) -> Forest {
    attach(forest, parent, TreeNode::created(record), true)
}

pub fn set_flag(forest: &Forest, id: NodeId, flag: NodeFlag, value: bool) -> Forest {
    update_by_id(forest, id, &NodePatch::flag(flag, value))
}

pub fn toggle_flag(forest: &Forest, id: NodeId, flag: NodeFlag) -> Forest {
    match forest.find(id) {
        Some(node) => set_flag(forest, id, flag, !node.record.flag(flag)),
        None => forest.clone(),
    }
}

/// Replace what is known about `parent`'s children (the root list for `None`).
pub fn replace_children(forest: &Forest, parent: Option<NodeId>, children: Children) -> Forest {
    forest
        .rewrite_children(parent, |record, _| {
            if children.is_loaded() {
                record.child_count = Some(children.known().len() as u32);
            }
            children
        })
        .unwrap_or_else(|| forest.clone())
}

/// Move `id` with its subtree under `new_parent`. Moving a node under itself or one of its
/// materialized descendants is a no-op. If `new_parent` is not materialized the node leaves
/// the forest, since its new location is not loaded.
pub fn move_node(forest: &Forest, id: NodeId, new_parent: Option<NodeId>) -> Forest {
    let Some(node) = forest.find(id).cloned() else {
        return forest.clone();
    };
    if let Some(target) = new_parent {
        if target == id || forest.is_descendant(id, target) {
            return forest.clone();
        }
    }
    let detached = remove_by_id(forest, id);
    let mut record = node.record.clone();
    record.parent_id = new_parent;
    attach(
        &detached,
        new_parent,
        TreeNode {
            record,
            children: node.children.clone(),
        },
        true,
    )
}

/// Merge one ancestor-chain record into the forest.
///
/// An already materialized node gets the fresher field values and keeps its children and its
/// place; if the store now reports a different parent the subtree is moved there. A new node
/// is linked under its parent, which must already be materialized (chains are applied root
/// first), or into the root list when it has no parent.
pub fn splice_chain_node(forest: &Forest, record: &NodeRecord) -> Forest {
    match forest.parent_of(record.id) {
        Some(location) if location == record.parent_id => {
            let Some(existing) = forest.find(record.id) else {
                return forest.clone();
            };
            let mut merged = existing.record.clone();
            merged.overlay(record);
            if merged == existing.record {
                return forest.clone();
            }
            let key_changed = merged.order_key != existing.record.order_key;
            let next = forest
                .rewrite_node(record.id, |node| {
                    Some(TreeNode {
                        record: merged,
                        children: node.children.clone(),
                    })
                })
                .unwrap_or_else(|| forest.clone());
            if key_changed {
                resort_children(&next, location)
            } else {
                next
            }
        }
        Some(_) => {
            let Some(node) = forest.find(record.id).cloned() else {
                return forest.clone();
            };
            let detached = remove_by_id(forest, record.id);
            let mut merged = node.record.clone();
            merged.overlay(record);
            attach(
                &detached,
                record.parent_id,
                TreeNode {
                    record: merged,
                    children: node.children.clone(),
                },
                false,
            )
        }
        None => attach(
            forest,
            record.parent_id,
            TreeNode::from_record(record.clone()),
            false,
        ),
    }
}

fn resort_children(forest: &Forest, parent: Option<NodeId>) -> Forest {
    forest
        .rewrite_children(parent, |_, children| {
            let mut nodes = children.known().to_vec();
            sort_siblings(&mut nodes);
            children.with_nodes(nodes)
        })
        .unwrap_or_else(|| forest.clone())
}

fn attach(forest: &Forest, parent: Option<NodeId>, node: TreeNode, bump_count: bool) -> Forest {
    let id = node.id();
    forest
        .rewrite_children(parent, |record, children| {
            let mut nodes = children.known().to_vec();
            let node = Arc::new(node);
            match nodes.iter().position(|n| n.id() == id) {
                Some(idx) => nodes[idx] = node,
                None => {
                    nodes.push(node);
                    if bump_count {
                        record.child_count = match record.child_count {
                            Some(count) => Some(count + 1),
                            None if children.is_loaded() => Some(nodes.len() as u32),
                            None => None,
                        };
                    }
                }
            }
            sort_siblings(&mut nodes);
            children.with_nodes(nodes)
        })
        .unwrap_or_else(|| forest.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, parent: Option<i64>, key: i64, child_count: Option<u32>) -> NodeRecord {
        let mut record = NodeRecord::new(NodeId(id), parent.map(NodeId), key, &format!("n{id}"));
        record.child_count = child_count;
        record
    }

    /// A(1) loaded with B(2), C(3), D(4); E(5) unloaded root with a count hint of 7.
    fn sample() -> Forest {
        let kids = vec![
            Arc::new(TreeNode::from_record(record(2, Some(1), 0, Some(0)))),
            Arc::new(TreeNode::from_record(record(3, Some(1), 1, None))),
            Arc::new(TreeNode::from_record(record(4, Some(1), 2, Some(0)))),
        ];
        Forest::new(Children::Loaded(vec![
            Arc::new(TreeNode {
                record: record(1, None, 0, Some(3)),
                children: Children::Loaded(kids),
            }),
            Arc::new(TreeNode::from_record(record(5, None, 1, Some(7)))),
        ]))
    }

    fn child_ids(forest: &Forest, parent: i64) -> Vec<i64> {
        forest
            .children_of(Some(NodeId(parent)))
            .unwrap()
            .known()
            .iter()
            .map(|n| n.id().0)
            .collect()
    }

    #[test]
    fn update_rewrites_only_the_path() {
        let forest = sample();
        let patch = NodePatch {
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        let next = update_by_id(&forest, NodeId(3), &patch);
        assert_eq!(next.find(NodeId(3)).unwrap().record.name, "renamed");
        assert!(!Arc::ptr_eq(
            forest.find(NodeId(1)).unwrap(),
            next.find(NodeId(1)).unwrap()
        ));
        assert!(Arc::ptr_eq(
            forest.find(NodeId(2)).unwrap(),
            next.find(NodeId(2)).unwrap()
        ));
        assert!(Arc::ptr_eq(
            forest.find(NodeId(5)).unwrap(),
            next.find(NodeId(5)).unwrap()
        ));
    }

    #[test]
    fn update_of_order_key_resorts_siblings() {
        let next = update_by_id(&sample(), NodeId(2), &NodePatch::order_key(9));
        assert_eq!(child_ids(&next, 1), vec![3, 4, 2]);
    }

    #[test]
    fn update_of_missing_node_is_identity() {
        let forest = sample();
        let next = update_by_id(&forest, NodeId(42), &NodePatch::order_key(1));
        assert_eq!(next, forest);
    }

    #[test]
    fn remove_decrements_parent_count_by_one() {
        let forest = sample();
        let next = remove_by_id(&forest, NodeId(3));
        assert_eq!(child_ids(&next, 1), vec![2, 4]);
        assert_eq!(next.find(NodeId(1)).unwrap().record.child_count, Some(2));
    }

    #[test]
    fn remove_keeps_hint_of_partially_loaded_parent() {
        let partial = Forest::new(Children::Loaded(vec![Arc::new(TreeNode {
            record: record(1, None, 0, Some(10)),
            children: Children::Partial(vec![Arc::new(TreeNode::from_record(record(
                2,
                Some(1),
                0,
                None,
            )))]),
        })]));
        let next = remove_by_id(&partial, NodeId(2));
        let parent = next.find(NodeId(1)).unwrap();
        assert_eq!(parent.record.child_count, Some(9));
        assert!(parent.children.is_unloaded());
        assert!(parent.has_children());
    }

    #[test]
    fn remove_is_idempotent() {
        let once = remove_by_id(&sample(), NodeId(1));
        let twice = remove_by_id(&once, NodeId(1));
        assert_eq!(once, twice);
        assert_eq!(once.root_nodes().len(), 1);
        assert!(!once.contains(NodeId(2)));
    }

    #[test]
    fn insert_into_unloaded_parent_makes_it_partial() {
        let next = insert_child(&sample(), Some(NodeId(5)), record(9, Some(5), 7, Some(0)));
        let parent = next.find(NodeId(5)).unwrap();
        assert!(matches!(parent.children, Children::Partial(_)));
        assert_eq!(parent.record.child_count, Some(8));
        assert!(parent.children.known()[0].children.is_loaded());
    }

    #[test]
    fn insert_appends_in_key_order() {
        let next = insert_child(&sample(), Some(NodeId(1)), record(9, Some(1), 3, None));
        assert_eq!(child_ids(&next, 1), vec![2, 3, 4, 9]);
        assert_eq!(next.find(NodeId(1)).unwrap().record.child_count, Some(4));
    }

    #[test]
    fn toggle_flag_flips() {
        let next = toggle_flag(&sample(), NodeId(4), NodeFlag::Starred);
        assert!(next.find(NodeId(4)).unwrap().record.starred);
        let back = toggle_flag(&next, NodeId(4), NodeFlag::Starred);
        assert!(!back.find(NodeId(4)).unwrap().record.starred);
    }

    #[test]
    fn move_keeps_subtree_and_refuses_cycles() {
        let forest = sample();
        let moved = move_node(&forest, NodeId(1), Some(NodeId(5)));
        assert_eq!(moved.path_to(NodeId(3)).unwrap(), vec![NodeId(5), NodeId(1), NodeId(3)]);
        assert_eq!(moved.find(NodeId(1)).unwrap().record.parent_id, Some(NodeId(5)));
        assert_eq!(moved.find(NodeId(5)).unwrap().record.child_count, Some(8));

        let refused = move_node(&forest, NodeId(1), Some(NodeId(3)));
        assert_eq!(refused, forest);
    }

    #[test]
    fn splice_overlays_existing_nodes_in_place() {
        let forest = sample();
        let mut fresher = record(1, None, 0, None);
        fresher.name = "fresh".to_string();
        let next = splice_chain_node(&forest, &fresher);
        let node = next.find(NodeId(1)).unwrap();
        assert_eq!(node.record.name, "fresh");
        assert_eq!(node.record.child_count, Some(3));
        assert!(Arc::ptr_eq(
            &forest.find(NodeId(1)).unwrap().children.known()[0],
            &node.children.known()[0]
        ));
    }

    #[test]
    fn splice_links_new_nodes_under_parent() {
        let forest = sample();
        let next = splice_chain_node(&forest, &record(8, Some(5), 0, None));
        let parent = next.find(NodeId(5)).unwrap();
        assert!(matches!(parent.children, Children::Partial(_)));
        // Splicing reflects store state, so the hint is not bumped.
        assert_eq!(parent.record.child_count, Some(7));

        let empty = splice_chain_node(&Forest::default(), &record(1, None, 0, None));
        assert!(matches!(empty.roots(), Children::Partial(_)));
    }
}
