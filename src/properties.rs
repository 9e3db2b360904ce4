//! Records exchanged with the remote store and the small value types around them.

use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};

#[cfg(feature = "service")]
use sqlx::{sqlite::SqliteRow, FromRow, Row};

use crate::error::MemtreeError;

/// Opaque, server-assigned node identifier. The sole merge key between fetches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub i64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = MemtreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(NodeId)
            .map_err(|e| MemtreeError::Validation(format!("'{s}' is not a node id: {e}")))
    }
}

impl From<i64> for NodeId {
    fn from(raw: i64) -> Self {
        NodeId(raw)
    }
}

impl From<NodeId> for i64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// One memory item as the remote store reports it. Carries no children; the lazy forest wraps
/// it in a [crate::forest::TreeNode] to track what is known about its children.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    /// Sibling display order. Distinct within a sibling group by convention only.
    pub order_key: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub code_snippet: String,
    #[serde(default)]
    pub memory_image: String,
    #[serde(default)]
    pub rich_text: String,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub is_list_marker: bool,
    /// Hint from the store. May be stale until the children are actually fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u32>,
}

impl NodeRecord {
    pub fn new(id: NodeId, parent_id: Option<NodeId>, order_key: i64, name: &str) -> Self {
        NodeRecord {
            id,
            parent_id,
            order_key,
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Display order within a sibling group: ascending key, ties broken by id.
    pub fn sort_key(&self) -> (i64, NodeId) {
        (self.order_key, self.id)
    }

    pub fn cmp_siblings(a: &NodeRecord, b: &NodeRecord) -> Ordering {
        a.sort_key().cmp(&b.sort_key())
    }

    /// Copy the field values of a fresher record onto this one. A missing count hint on the
    /// fresher record does not erase a known one.
    pub fn overlay(&mut self, fresher: &NodeRecord) {
        let child_count = fresher.child_count.or(self.child_count);
        *self = fresher.clone();
        self.child_count = child_count;
    }

    pub fn apply_patch(&mut self, patch: &NodePatch) {
        if let Some(order_key) = patch.order_key {
            self.order_key = order_key;
        }
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(code_snippet) = &patch.code_snippet {
            self.code_snippet = code_snippet.clone();
        }
        if let Some(memory_image) = &patch.memory_image {
            self.memory_image = memory_image.clone();
        }
        if let Some(rich_text) = &patch.rich_text {
            self.rich_text = rich_text.clone();
        }
        if let Some(starred) = patch.starred {
            self.starred = starred;
        }
        if let Some(is_list_marker) = patch.is_list_marker {
            self.is_list_marker = is_list_marker;
        }
    }

    pub fn flag(&self, flag: NodeFlag) -> bool {
        match flag {
            NodeFlag::Starred => self.starred,
            NodeFlag::ListMarker => self.is_list_marker,
        }
    }

    /// Case-insensitive substring match over the searchable text fields.
    pub fn matches_text(&self, needle_lower: &str) -> bool {
        [&self.name, &self.description, &self.code_snippet]
            .iter()
            .any(|field| field.to_lowercase().contains(needle_lower))
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for NodeRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let parent: Option<i64> = row.try_get("parent_id")?;
        let child_count: Option<i64> = row.try_get("child_count").ok().flatten();
        Ok(NodeRecord {
            id: NodeId(row.try_get("id")?),
            parent_id: parent.map(NodeId),
            order_key: row.try_get("memory_key")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            code_snippet: row.try_get("code_snippet")?,
            memory_image: row.try_get("memory_image")?,
            rich_text: row.try_get("rich_text")?,
            starred: row.try_get("starred")?,
            is_list_marker: row.try_get("is_list")?,
            child_count: child_count.map(|count| count.max(0) as u32),
        })
    }
}

/// Fields for a node the store has not assigned an id to yet.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNode {
    pub parent_id: Option<NodeId>,
    pub order_key: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub code_snippet: String,
    #[serde(default)]
    pub memory_image: String,
    #[serde(default)]
    pub rich_text: String,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub is_list_marker: bool,
}

impl NewNode {
    pub fn named(parent_id: Option<NodeId>, order_key: i64, name: &str) -> Self {
        NewNode {
            parent_id,
            order_key,
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn into_record(self, id: NodeId) -> NodeRecord {
        NodeRecord {
            id,
            parent_id: self.parent_id,
            order_key: self.order_key,
            name: self.name,
            description: self.description,
            code_snippet: self.code_snippet,
            memory_image: self.memory_image,
            rich_text: self.rich_text,
            starred: self.starred,
            is_list_marker: self.is_list_marker,
            child_count: Some(0),
        }
    }
}

/// Shallow field update. `None` leaves a field as it is.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_key: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starred: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_list_marker: Option<bool>,
}

impl NodePatch {
    pub fn order_key(order_key: i64) -> Self {
        NodePatch {
            order_key: Some(order_key),
            ..Default::default()
        }
    }

    pub fn flag(flag: NodeFlag, value: bool) -> Self {
        match flag {
            NodeFlag::Starred => NodePatch {
                starred: Some(value),
                ..Default::default()
            },
            NodeFlag::ListMarker => NodePatch {
                is_list_marker: Some(value),
                ..Default::default()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == NodePatch::default()
    }

    /// The patch that puts back `before`'s values for every field this patch touches.
    pub fn inverse(&self, before: &NodeRecord) -> NodePatch {
        NodePatch {
            order_key: self.order_key.map(|_| before.order_key),
            name: self.name.as_ref().map(|_| before.name.clone()),
            description: self.description.as_ref().map(|_| before.description.clone()),
            code_snippet: self.code_snippet.as_ref().map(|_| before.code_snippet.clone()),
            memory_image: self.memory_image.as_ref().map(|_| before.memory_image.clone()),
            rich_text: self.rich_text.as_ref().map(|_| before.rich_text.clone()),
            starred: self.starred.map(|_| before.starred),
            is_list_marker: self.is_list_marker.map(|_| before.is_list_marker),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeFlag {
    Starred,
    ListMarker,
}

/// Which top-level nodes make up the root list.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum ViewScope {
    /// Every parentless node.
    #[default]
    All,
    /// Parentless nodes with the starred flag set.
    Starred,
    /// A single-list view: the root list is exactly this node.
    Subtree(NodeId),
}

impl ViewScope {
    pub fn admits_root(&self, record: &NodeRecord) -> bool {
        match self {
            ViewScope::All => record.is_root(),
            ViewScope::Starred => record.is_root() && record.starred,
            ViewScope::Subtree(id) => record.id == *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_order_breaks_ties_by_id() {
        let mut records = vec![
            NodeRecord::new(NodeId(7), None, 1, "b"),
            NodeRecord::new(NodeId(3), None, 1, "a"),
            NodeRecord::new(NodeId(9), None, 0, "c"),
        ];
        records.sort_by(NodeRecord::cmp_siblings);
        let ids: Vec<i64> = records.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![9, 3, 7]);
    }

    #[test]
    fn overlay_keeps_known_child_count() {
        let mut existing = NodeRecord::new(NodeId(1), None, 0, "old");
        existing.child_count = Some(4);
        let fresher = NodeRecord::new(NodeId(1), None, 2, "new");
        existing.overlay(&fresher);
        assert_eq!(existing.name, "new");
        assert_eq!(existing.order_key, 2);
        assert_eq!(existing.child_count, Some(4));
    }

    #[test]
    fn patch_inverse_restores_touched_fields_only() {
        let mut record = NodeRecord::new(NodeId(1), None, 5, "before");
        record.description = "desc".to_string();
        let patch = NodePatch {
            name: Some("after".to_string()),
            starred: Some(true),
            ..Default::default()
        };
        let inverse = patch.inverse(&record);
        record.apply_patch(&patch);
        assert_eq!(record.name, "after");
        assert!(record.starred);
        record.apply_patch(&inverse);
        assert_eq!(record.name, "before");
        assert!(!record.starred);
        assert_eq!(record.description, "desc");
        assert_eq!(inverse.order_key, None);
    }

    #[test]
    fn node_id_parses_and_rejects() {
        assert_eq!("42".parse::<NodeId>(), Ok(NodeId(42)));
        assert!("forty".parse::<NodeId>().unwrap_err().is_validation());
    }

    #[test]
    fn scope_admits_roots() {
        let mut starred_root = NodeRecord::new(NodeId(1), None, 0, "a");
        starred_root.starred = true;
        let child = NodeRecord::new(NodeId(2), Some(NodeId(1)), 0, "b");
        assert!(ViewScope::All.admits_root(&starred_root));
        assert!(!ViewScope::All.admits_root(&child));
        assert!(ViewScope::Starred.admits_root(&starred_root));
        assert!(ViewScope::Subtree(NodeId(2)).admits_root(&child));
        assert!(!ViewScope::Subtree(NodeId(2)).admits_root(&starred_root));
    }
}
