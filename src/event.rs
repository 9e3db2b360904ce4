use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::NodeId;

/// Indicates whether a forest change reflects confirmed remote state or a local edit applied
/// ahead of (or without) remote confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventOrigin {
    /// Applied locally before the store confirmed it. May be reverted.
    Local,
    /// Applied from a completed remote round trip.
    #[default]
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Signals for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeEvent {
    ForestChanged(EventOrigin),
    /// Ordered selection plus the active/detail item.
    SelectionChanged {
        selected: Vec<NodeId>,
        active: Option<NodeId>,
    },
    ExpansionChanged(Vec<NodeId>),
    /// Scroll the node into view and highlight it for `highlight_ms`.
    FocusRequest { id: NodeId, highlight_ms: u64 },
    Message { text: String, severity: Severity },
}

impl TreeEvent {
    pub fn message<S: Into<String>>(text: S, severity: Severity) -> Self {
        TreeEvent::Message {
            text: text.into(),
            severity,
        }
    }
}

impl Display for TreeEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TreeEvent::ForestChanged(origin) => write!(f, "ForestChanged({origin:?})"),
            TreeEvent::SelectionChanged { .. } => write!(f, "SelectionChanged"),
            TreeEvent::ExpansionChanged(_) => write!(f, "ExpansionChanged"),
            TreeEvent::FocusRequest { id, .. } => write!(f, "FocusRequest({id})"),
            TreeEvent::Message { severity, .. } => write!(f, "Message({severity:?})"),
        }
    }
}
