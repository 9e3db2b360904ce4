//! The lazily-populated forest.
//!
//! A [Forest] is the client's partial materialization of the remote hierarchy. Nodes are
//! immutable and shared through [Arc]: every rewrite produces a new forest in which only the
//! nodes on the path to the change are new allocations, so a presentation layer comparing
//! pointers (`Arc::ptr_eq`) re-renders only the affected path.
//!
//! What is known about a node's children is explicit in [Children]. In particular
//! [Children::Unloaded] ("nothing known") and `Children::Loaded(vec![])` ("known to have no
//! children") are distinct states and are never inferred from one another.
//!
//! The root list is itself a [Children] value: a forest whose roots were never fetched is
//! `Unloaded`, and a forest that only knows the root of a revealed path is `Partial`.

use std::sync::Arc;

use crate::properties::{NodeId, NodeRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Children {
    /// Never fetched. Whether the node has children is unknown.
    #[default]
    Unloaded,
    /// Some children are known (spliced in by a path reveal) but the full list was never
    /// fetched.
    Partial(Vec<Arc<TreeNode>>),
    /// A fetch is in flight. `known` keeps whatever was already materialized so it stays
    /// visible; `was_complete` records whether the list was fully loaded before the refresh.
    Loading {
        known: Vec<Arc<TreeNode>>,
        was_complete: bool,
    },
    /// The full child list as of the last fetch.
    Loaded(Vec<Arc<TreeNode>>),
}

impl Children {
    pub fn known(&self) -> &[Arc<TreeNode>] {
        match self {
            Children::Unloaded => &[],
            Children::Partial(nodes) | Children::Loaded(nodes) => nodes,
            Children::Loading { known, .. } => known,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Children::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Children::Loading { .. })
    }

    pub fn is_unloaded(&self) -> bool {
        matches!(self, Children::Unloaded)
    }

    /// True when a children fetch would add information.
    pub fn needs_fetch(&self) -> bool {
        matches!(self, Children::Unloaded | Children::Partial(_))
    }

    /// Same state, different node list. `Unloaded` with a non-empty list becomes `Partial`.
    pub fn with_nodes(&self, nodes: Vec<Arc<TreeNode>>) -> Children {
        match self {
            Children::Unloaded | Children::Partial(_) => {
                if nodes.is_empty() {
                    Children::Unloaded
                } else {
                    Children::Partial(nodes)
                }
            }
            Children::Loading { was_complete, .. } => Children::Loading {
                known: nodes,
                was_complete: *was_complete,
            },
            Children::Loaded(_) => Children::Loaded(nodes),
        }
    }

    pub fn begin_loading(&self) -> Children {
        Children::Loading {
            known: self.known().to_vec(),
            was_complete: self.is_loaded(),
        }
    }

    /// The state to fall back to when a fetch fails. Prior state is preserved as far as it is
    /// still known.
    pub fn fail_loading(&self) -> Children {
        match self {
            Children::Loading {
                known,
                was_complete: true,
            } => Children::Loaded(known.clone()),
            Children::Loading { known, .. } if known.is_empty() => Children::Unloaded,
            Children::Loading { known, .. } => Children::Partial(known.clone()),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub record: NodeRecord,
    pub children: Children,
}

impl TreeNode {
    /// A node as fetched from the store. Its children are unknown whatever the count hint
    /// says; the hint only feeds [TreeNode::has_children].
    pub fn from_record(record: NodeRecord) -> TreeNode {
        TreeNode {
            record,
            children: Children::Unloaded,
        }
    }

    /// A node this client just created. Nothing can be below it yet.
    pub fn created(record: NodeRecord) -> TreeNode {
        TreeNode {
            record,
            children: Children::Loaded(Vec::new()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.record.id
    }

    pub fn has_children(&self) -> bool {
        match &self.children {
            Children::Loaded(nodes) => !nodes.is_empty(),
            other if !other.known().is_empty() => true,
            _ => self.record.child_count.unwrap_or(0) > 0,
        }
    }
}

pub(crate) fn sort_siblings(nodes: &mut [Arc<TreeNode>]) {
    nodes.sort_by(|a, b| NodeRecord::cmp_siblings(&a.record, &b.record));
}

/// Merge freshly fetched sibling records into the nodes already materialized for that sibling
/// group.
///
/// Matching is by id. An existing node keeps its children (and its allocation, when the
/// fetched fields are unchanged); nodes absent from `fetched` are dropped because the fetch
/// is the authoritative full list.
pub fn merge_fetched(existing: &[Arc<TreeNode>], fetched: Vec<NodeRecord>) -> Vec<Arc<TreeNode>> {
    let mut merged = fetched
        .into_iter()
        .map(|record| match existing.iter().find(|n| n.id() == record.id) {
            Some(node) => {
                let mut next = node.record.clone();
                next.overlay(&record);
                if next == node.record {
                    node.clone()
                } else {
                    Arc::new(TreeNode {
                        record: next,
                        children: node.children.clone(),
                    })
                }
            }
            None => Arc::new(TreeNode::from_record(record)),
        })
        .collect::<Vec<_>>();
    sort_siblings(&mut merged);
    merged
}

/// One rendered row of the visible outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub depth: u16,
    pub expanded: bool,
    pub has_children: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    roots: Children,
}

impl Forest {
    pub fn new(roots: Children) -> Self {
        Forest { roots }
    }

    pub fn roots(&self) -> &Children {
        &self.roots
    }

    pub fn root_nodes(&self) -> &[Arc<TreeNode>] {
        self.roots.known()
    }

    pub fn with_roots(&self, roots: Children) -> Forest {
        Forest { roots }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.known().is_empty()
    }

    /// Index path (position at each level) from the root list down to `id`.
    pub fn locate(&self, id: NodeId) -> Option<Vec<usize>> {
        let mut stack: Vec<(Vec<usize>, &Arc<TreeNode>)> = self
            .roots
            .known()
            .iter()
            .enumerate()
            .rev()
            .map(|(idx, node)| (vec![idx], node))
            .collect();
        while let Some((path, node)) = stack.pop() {
            if node.id() == id {
                return Some(path);
            }
            for (idx, child) in node.children.known().iter().enumerate().rev() {
                let mut child_path = path.clone();
                child_path.push(idx);
                stack.push((child_path, child));
            }
        }
        None
    }

    fn walk(&self, path: &[usize]) -> Vec<&Arc<TreeNode>> {
        let mut nodes = Vec::with_capacity(path.len());
        let mut level = self.roots.known();
        for idx in path {
            let Some(node) = level.get(*idx) else {
                break;
            };
            nodes.push(node);
            level = node.children.known();
        }
        nodes
    }

    pub fn find(&self, id: NodeId) -> Option<&Arc<TreeNode>> {
        let path = self.locate(id)?;
        self.walk(&path).pop()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.locate(id).is_some()
    }

    /// Ids from the top of the materialized tree down to and including `id`.
    pub fn path_to(&self, id: NodeId) -> Option<Vec<NodeId>> {
        let path = self.locate(id)?;
        Some(self.walk(&path).into_iter().map(|n| n.id()).collect())
    }

    /// The materialized parent of `id`: `Some(None)` for a root-list entry, `None` if `id` is
    /// not in the forest.
    pub fn parent_of(&self, id: NodeId) -> Option<Option<NodeId>> {
        let path = self.path_to(id)?;
        Some(path.len().checked_sub(2).map(|idx| path[idx]))
    }

    /// The children state of `parent`, or of the root list for `None`.
    pub fn children_of(&self, parent: Option<NodeId>) -> Option<&Children> {
        match parent {
            None => Some(&self.roots),
            Some(id) => self.find(id).map(|node| &node.children),
        }
    }

    pub fn is_descendant(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.path_to(id)
            .map(|path| path[..path.len() - 1].contains(&ancestor))
            .unwrap_or(false)
    }

    /// Flatten the forest into display rows, descending only into expanded nodes.
    pub fn visible_rows<F>(&self, is_expanded: F) -> Vec<VisibleRow>
    where
        F: Fn(NodeId) -> bool,
    {
        let mut rows = Vec::new();
        let mut stack: Vec<(&Arc<TreeNode>, Option<NodeId>, u16)> = self
            .roots
            .known()
            .iter()
            .rev()
            .map(|node| (node, None, 0))
            .collect();
        while let Some((node, parent, depth)) = stack.pop() {
            let expanded = is_expanded(node.id());
            rows.push(VisibleRow {
                id: node.id(),
                parent,
                depth,
                expanded,
                has_children: node.has_children(),
            });
            if expanded {
                for child in node.children.known().iter().rev() {
                    stack.push((child, Some(node.id()), depth + 1));
                }
            }
        }
        rows
    }

    /// Rebuild the forest with the node at `path` replaced by `f`'s result, or removed when
    /// `f` returns `None`. Everything off the path is shared with `self`.
    pub(crate) fn rewrite_at<F>(&self, path: &[usize], f: F) -> Forest
    where
        F: FnOnce(&TreeNode) -> Option<TreeNode>,
    {
        if path.is_empty() {
            return self.clone();
        }
        let roots = rewrite_list(self.roots.known(), path, f);
        Forest {
            roots: self.roots.with_nodes(roots),
        }
    }

    pub(crate) fn rewrite_node<F>(&self, id: NodeId, f: F) -> Option<Forest>
    where
        F: FnOnce(&TreeNode) -> Option<TreeNode>,
    {
        let path = self.locate(id)?;
        Some(self.rewrite_at(&path, f))
    }

    /// Rewrite the child list of `parent` (the root list for `None`) together with the parent's
    /// record. Returns `None` when `parent` is not materialized.
    pub(crate) fn rewrite_children<F>(&self, parent: Option<NodeId>, f: F) -> Option<Forest>
    where
        F: FnOnce(&mut NodeRecord, &Children) -> Children,
    {
        match parent {
            None => {
                let mut scratch = NodeRecord::default();
                Some(Forest {
                    roots: f(&mut scratch, &self.roots),
                })
            }
            Some(id) => self.rewrite_node(id, |node| {
                let mut record = node.record.clone();
                let children = f(&mut record, &node.children);
                Some(TreeNode { record, children })
            }),
        }
    }
}

fn rewrite_list<F>(list: &[Arc<TreeNode>], path: &[usize], f: F) -> Vec<Arc<TreeNode>>
where
    F: FnOnce(&TreeNode) -> Option<TreeNode>,
{
    let mut out = list.to_vec();
    let Some((idx, rest)) = path.split_first() else {
        return out;
    };
    let Some(node) = list.get(*idx) else {
        return out;
    };
    if rest.is_empty() {
        match f(node) {
            Some(next) => out[*idx] = Arc::new(next),
            None => {
                out.remove(*idx);
            }
        }
    } else {
        let children = rewrite_list(node.children.known(), rest, f);
        out[*idx] = Arc::new(TreeNode {
            record: node.record.clone(),
            children: node.children.with_nodes(children),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: i64, parent: Option<i64>, key: i64) -> Arc<TreeNode> {
        let mut record = NodeRecord::new(NodeId(id), parent.map(NodeId), key, &format!("n{id}"));
        record.child_count = Some(0);
        Arc::new(TreeNode {
            record,
            children: Children::Loaded(Vec::new()),
        })
    }

    fn branch(id: i64, parent: Option<i64>, key: i64, kids: Vec<Arc<TreeNode>>) -> Arc<TreeNode> {
        let mut record = NodeRecord::new(NodeId(id), parent.map(NodeId), key, &format!("n{id}"));
        record.child_count = Some(kids.len() as u32);
        Arc::new(TreeNode {
            record,
            children: Children::Loaded(kids),
        })
    }

    fn sample() -> Forest {
        // 1 ─┬─ 2 ── 4
        //    └─ 3
        // 5
        Forest::new(Children::Loaded(vec![
            branch(
                1,
                None,
                0,
                vec![branch(2, Some(1), 0, vec![leaf(4, Some(2), 0)]), leaf(3, Some(1), 1)],
            ),
            leaf(5, None, 1),
        ]))
    }

    #[test]
    fn count_hint_never_marks_children_loaded() {
        for hint in [Some(0), Some(3), None] {
            let mut record = NodeRecord::new(NodeId(1), None, 0, "n1");
            record.child_count = hint;
            let node = TreeNode::from_record(record);
            assert!(node.children.is_unloaded(), "{hint:?}");
            assert!(node.children.needs_fetch(), "{hint:?}");
            assert_eq!(node.has_children(), hint == Some(3));
        }
        let created = TreeNode::created(NodeRecord::new(NodeId(2), None, 0, "n2"));
        assert_eq!(created.children, Children::Loaded(vec![]));
        assert!(!created.has_children());
    }

    #[test]
    fn loading_round_trip_restores_prior_state() {
        let kids = vec![leaf(2, Some(1), 0)];
        let loaded = Children::Loaded(kids.clone());
        assert_eq!(loaded.begin_loading().fail_loading(), loaded);
        let partial = Children::Partial(kids);
        assert_eq!(partial.begin_loading().fail_loading(), partial);
        assert_eq!(
            Children::Unloaded.begin_loading().fail_loading(),
            Children::Unloaded
        );
    }

    #[test]
    fn locate_and_paths() {
        let forest = sample();
        assert_eq!(forest.locate(NodeId(4)), Some(vec![0, 0, 0]));
        assert_eq!(
            forest.path_to(NodeId(4)),
            Some(vec![NodeId(1), NodeId(2), NodeId(4)])
        );
        assert_eq!(forest.parent_of(NodeId(3)), Some(Some(NodeId(1))));
        assert_eq!(forest.parent_of(NodeId(5)), Some(None));
        assert_eq!(forest.parent_of(NodeId(99)), None);
        assert!(forest.is_descendant(NodeId(1), NodeId(4)));
        assert!(!forest.is_descendant(NodeId(4), NodeId(1)));
        assert!(!forest.is_descendant(NodeId(4), NodeId(4)));
    }

    #[test]
    fn visible_rows_respect_expansion() {
        let forest = sample();
        let rows = forest.visible_rows(|id| id == NodeId(1));
        let ids: Vec<i64> = rows.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3, 5]);
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[1].parent, Some(NodeId(1)));
        assert!(rows[1].has_children);
        assert!(!rows[2].has_children);
    }

    #[test]
    fn rewrite_shares_untouched_subtrees() {
        let forest = sample();
        let next = forest
            .rewrite_node(NodeId(4), |node| {
                let mut record = node.record.clone();
                record.name = "renamed".to_string();
                Some(TreeNode {
                    record,
                    children: node.children.clone(),
                })
            })
            .unwrap();
        assert_eq!(next.find(NodeId(4)).unwrap().record.name, "renamed");
        // Ancestors are new allocations, siblings are shared.
        assert!(!Arc::ptr_eq(
            forest.find(NodeId(1)).unwrap(),
            next.find(NodeId(1)).unwrap()
        ));
        assert!(Arc::ptr_eq(
            forest.find(NodeId(3)).unwrap(),
            next.find(NodeId(3)).unwrap()
        ));
        assert!(Arc::ptr_eq(
            forest.find(NodeId(5)).unwrap(),
            next.find(NodeId(5)).unwrap()
        ));
    }

    #[test]
    fn merge_preserves_loaded_subtrees_and_identity() {
        let forest = sample();
        let existing = forest.root_nodes();
        let mut fetched_one = existing[0].record.clone();
        fetched_one.child_count = None;
        let fetched_new = NodeRecord::new(NodeId(6), None, 2, "n6");
        let merged = merge_fetched(existing, vec![fetched_new, fetched_one]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id(), NodeId(1));
        assert!(Arc::ptr_eq(&merged[0], &existing[0]));
        assert!(merged[0].children.is_loaded());
        assert_eq!(merged[1].id(), NodeId(6));
        assert!(merged[1].children.is_unloaded());
    }
}
