//! [TreeEngine]: the single logical writer over the lazy forest.
//!
//! The engine owns the view state (forest, node index, selection, expansion, scope) behind one
//! lock that is only ever held between suspension points. Every operation reads what it needs,
//! releases the lock, awaits the store, then re-locks to apply the result as one atomic step.
//! Anything that can race is decided at apply time: forest-replacing loads compare their
//! [LoadToken](crate::epoch::LoadToken) against the [LoadEpoch], and per-node children loads are
//! guarded by the node's [Children::Loading] state.
//!
//! Operations are grouped by concern:
//! - `load`: roots, children and the expansion funnel
//! - `reveal`: making a deep node reachable, expanded, selected and focused
//! - `reparent`: single and multi-node moves, drag-and-drop resolution
//! - `reindex`: sibling order-key resequencing
//! - `edit`: creates, field edits, flags, cascading delete, search

use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{
    config::{EngineConfig, ViewSnapshot},
    epoch::LoadEpoch,
    error::MemtreeError,
    event::{EventOrigin, Severity, TreeEvent},
    forest::{Children, Forest, VisibleRow},
    nodeindex::NodeIndex,
    properties::{NodeId, NodeRecord, ViewScope},
    selection::{ExpansionSet, Selection},
    store::TreeStore,
};

mod edit;
mod load;
mod reindex;
mod reparent;
mod reveal;


/// How an operation that may race with others ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Applied(T),
    /// Nothing to do, e.g. the children are already loaded or a load is in flight.
    Skipped,
    /// The result arrived after a newer load superseded it and was dropped.
    Discarded,
}

impl<T> Outcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, Outcome::Discarded)
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            _ => None,
        }
    }
}

/// Everything the presentation layer renders from. Cloning is cheap: the forest shares its
/// nodes and the index shares its records.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub forest: Forest,
    pub index: NodeIndex,
    pub selection: Selection,
    pub expanded: ExpansionSet,
    pub scope: ViewScope,
}

/// Reports whether a node is currently mounted in the presentation layer.
pub type MountProbe = Arc<dyn Fn(NodeId) -> bool + Send + Sync>;

pub struct TreeEngine<S: TreeStore> {
    store: S,
    config: EngineConfig,
    state: Mutex<ViewState>,
    epoch: LoadEpoch,
    events: Option<UnboundedSender<TreeEvent>>,
    mount_probe: Option<MountProbe>,
}

impl<S: TreeStore> TreeEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        TreeEngine {
            store,
            config,
            state: Mutex::new(ViewState::default()),
            epoch: LoadEpoch::default(),
            events: None,
            mount_probe: None,
        }
    }

    /// An engine plus the receiving end of its event stream.
    pub fn with_channel(store: S, config: EngineConfig) -> (Self, UnboundedReceiver<TreeEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(store, config).with_events(tx), rx)
    }

    pub fn with_events(mut self, tx: UnboundedSender<TreeEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Replace the default mount check (row present in [TreeEngine::visible_rows]) used by the
    /// focus retry loop.
    pub fn with_mount_probe(mut self, probe: MountProbe) -> Self {
        self.mount_probe = Some(probe);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn view(&self) -> ViewState {
        self.state.lock().clone()
    }

    pub fn forest(&self) -> Forest {
        self.state.lock().forest.clone()
    }

    pub fn scope(&self) -> ViewScope {
        self.state.lock().scope
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<NodeRecord>> {
        self.state.lock().index.get(id).cloned()
    }

    pub fn children_state(&self, parent: Option<NodeId>) -> Option<Children> {
        self.state.lock().forest.children_of(parent).cloned()
    }

    pub fn selection(&self) -> Selection {
        self.state.lock().selection.clone()
    }

    pub fn expanded(&self) -> Vec<NodeId> {
        self.state.lock().expanded.ids().to_vec()
    }

    pub fn is_expanded(&self, id: NodeId) -> bool {
        self.state.lock().expanded.contains(id)
    }

    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        let state = self.state.lock();
        state.forest.visible_rows(|id| state.expanded.contains(id))
    }

    pub(crate) fn emit(&self, event: TreeEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        if let Err(e) = tx.send(event) {
            let err = MemtreeError::from(e);
            tracing::warn!("[TreeEngine.emit] {}", err);
        }
    }

    pub(crate) fn emit_forest(&self, origin: EventOrigin) {
        self.emit(TreeEvent::ForestChanged(origin));
    }

    pub(crate) fn emit_selection(&self, selection: &Selection) {
        self.emit(TreeEvent::SelectionChanged {
            selected: selection.ids().to_vec(),
            active: selection.active(),
        });
    }

    pub(crate) fn report(&self, err: &MemtreeError) {
        let severity = if err.is_validation() {
            Severity::Warning
        } else {
            Severity::Error
        };
        self.emit(TreeEvent::message(err.to_string(), severity));
    }

    /// Plain click replaces the selection and sets the active item; `multi` toggles.
    pub fn click(&self, id: NodeId, multi: bool) {
        let selection = {
            let mut state = self.state.lock();
            state.selection.click(id, multi);
            state.selection.clone()
        };
        self.emit_selection(&selection);
    }

    pub fn clear_selection(&self) {
        let selection = {
            let mut state = self.state.lock();
            state.selection.clear();
            state.selection.clone()
        };
        self.emit_selection(&selection);
    }

    fn is_mounted(&self, id: NodeId) -> bool {
        match &self.mount_probe {
            Some(probe) => probe(id),
            None => self.visible_rows().iter().any(|row| row.id == id),
        }
    }

    /// Ask the presentation layer to scroll to `id` and highlight it, waiting for the row to
    /// mount. Returns false if it never did within the configured attempts.
    pub async fn request_focus(&self, id: NodeId) -> bool {
        let interval = Duration::from_millis(self.config.focus_retry_interval_ms);
        for attempt in 0..self.config.focus_retry_attempts.max(1) {
            if self.is_mounted(id) {
                self.emit(TreeEvent::FocusRequest {
                    id,
                    highlight_ms: self.config.highlight_ms,
                });
                return true;
            }
            tracing::debug!(
                "[TreeEngine.request_focus] {} not mounted yet (attempt {})",
                id,
                attempt + 1
            );
            tokio::time::sleep(interval).await;
        }
        tracing::warn!("[TreeEngine.request_focus] gave up waiting for {} to mount", id);
        false
    }

    pub fn snapshot_view(&self) -> ViewSnapshot {
        let state = self.state.lock();
        ViewSnapshot {
            scope: state.scope,
            expanded: state.expanded.ids().to_vec(),
            selected: state.selection.ids().to_vec(),
            active: state.selection.active(),
        }
    }

    /// Reload the roots for the snapshot's scope, then replay its expansions in stored order so
    /// every parent is loaded before its children are expanded.
    #[tracing::instrument(skip(self))]
    pub async fn restore_view(&self, snapshot: ViewSnapshot) -> Result<(), MemtreeError> {
        let selection = {
            let mut state = self.state.lock();
            state.selection = Selection::restore(snapshot.selected.clone(), snapshot.active);
            state.selection.clone()
        };
        self.emit_selection(&selection);
        self.load_roots(snapshot.scope).await?;
        self.set_expanded(&snapshot.expanded).await
    }
}
