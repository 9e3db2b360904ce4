//! Selection, expansion and drag-and-drop gesture state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::properties::NodeId;

/// Ordered multi-selection plus the item shown in the detail pane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    selected: Vec<NodeId>,
    active: Option<NodeId>,
}

impl Selection {
    pub fn ids(&self) -> &[NodeId] {
        &self.selected
    }

    pub fn active(&self) -> Option<NodeId> {
        self.active
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.selected.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// A plain click replaces the selection and makes `id` active. A click with the
    /// multi-select modifier toggles membership and leaves the active item alone.
    pub fn click(&mut self, id: NodeId, multi: bool) {
        if multi {
            self.toggle(id);
        } else {
            self.replace(id);
        }
    }

    pub fn replace(&mut self, id: NodeId) {
        self.selected = vec![id];
        self.active = Some(id);
    }

    pub fn toggle(&mut self, id: NodeId) {
        match self.selected.iter().position(|s| *s == id) {
            Some(idx) => {
                self.selected.remove(idx);
            }
            None => self.selected.push(id),
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.active = None;
    }

    /// Drop every id for which `keep` is false, including the active item.
    pub fn retain<F: Fn(NodeId) -> bool>(&mut self, keep: F) {
        self.selected.retain(|id| keep(*id));
        if let Some(active) = self.active {
            if !keep(active) {
                self.active = None;
            }
        }
    }

    /// The items a drag of `dragged` moves: the whole selection plus the dragged item,
    /// deduplicated, selection order first.
    pub fn move_set(&self, dragged: NodeId) -> Vec<NodeId> {
        let mut ids = self.selected.clone();
        if !ids.contains(&dragged) {
            ids.push(dragged);
        }
        ids
    }

    pub(crate) fn restore(selected: Vec<NodeId>, active: Option<NodeId>) -> Selection {
        let mut deduped = Vec::with_capacity(selected.len());
        for id in selected {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        Selection {
            selected: deduped,
            active,
        }
    }
}

/// Expanded ids in the order they were expanded. Ancestors expanded before descendants stay
/// that way, which is the order a view needs to mount them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionSet {
    order: Vec<NodeId>,
    members: BTreeSet<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionDiff {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl ExpansionSet {
    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn insert(&mut self, id: NodeId) -> bool {
        if self.members.insert(id) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, id: NodeId) -> bool {
        if self.members.remove(&id) {
            self.order.retain(|e| *e != id);
            true
        } else {
            false
        }
    }

    pub fn retain<F: Fn(NodeId) -> bool>(&mut self, keep: F) {
        self.order.retain(|id| keep(*id));
        self.members = self.order.iter().copied().collect();
    }

    /// What changes going from `self` to `next`. `added` keeps `next`'s order.
    pub fn diff(&self, next: &[NodeId]) -> ExpansionDiff {
        let next_members: BTreeSet<NodeId> = next.iter().copied().collect();
        let mut added = Vec::new();
        for id in next {
            if !self.members.contains(id) && !added.contains(id) {
                added.push(*id);
            }
        }
        let removed = self
            .order
            .iter()
            .filter(|id| !next_members.contains(id))
            .copied()
            .collect();
        ExpansionDiff { added, removed }
    }

    pub fn replace(&mut self, next: &[NodeId]) {
        self.order.clear();
        self.members.clear();
        for id in next {
            self.insert(*id);
        }
    }
}

/// Where and how a dragged item was released.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropGesture {
    /// The node under the pointer, if any.
    pub target: Option<NodeId>,
    /// Horizontal displacement from the drag start. Negative is leftward.
    pub dx: f64,
    /// A nested drop target already handled this release.
    pub nested_claimed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropAction {
    Onto(NodeId),
    /// Detach to the root list.
    Detach,
}

/// Decide what a drop means. A release far enough to the left detaches regardless of the
/// node underneath; dropping an item on itself or on empty space does nothing.
pub fn resolve_drop(dragged: NodeId, gesture: &DropGesture, detach_threshold: f64) -> Option<DropAction> {
    if gesture.nested_claimed {
        return None;
    }
    if gesture.target == Some(dragged) {
        return None;
    }
    if gesture.dx < -detach_threshold {
        return Some(DropAction::Detach);
    }
    gesture.target.map(DropAction::Onto)
}
