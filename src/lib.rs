//! # memtree-core
//!
//! A client-side, lazily populated view of a large parent-linked hierarchy (a "memory tree")
//! whose source of truth is a remote relational store.
//!
//! ## Overview
//!
//! The whole hierarchy is never loaded. The client holds a partial [forest::Forest] plus an
//! id-keyed [nodeindex::NodeIndex] and fills them in on demand: when a node is expanded, when a
//! search hit is revealed, or after a write. Remote calls may overlap and resolve out of order;
//! stale results are dropped at apply time and never regress the view.
//!
//! ### Key Features
//!
//! - **Explicit child state**: "never fetched", "partially known", "loading" and "loaded, maybe
//!   empty" are distinct [forest::Children] states
//! - **Stale-safe loading**: forest-replacing loads carry an [epoch::LoadToken]; per-node loads are
//!   guarded by the node's loading state so a node is fetched at most once at a time
//! - **Path reveal**: a deep node is made reachable by splicing its ancestor chain into whatever
//!   is loaded, preserving loaded subtrees
//! - **Moves and re-indexing**: multi-selection drag-and-drop reparenting with cycle checks, and
//!   sibling order-key resequencing
//! - **Structural sharing**: every local edit is a pure rewrite ([mutation]) that reallocates only
//!   the path to the change
//!
//! ## Architecture
//!
//! - **[`engine`]**: [engine::TreeEngine], the single logical writer over the view state
//! - **[`store`]**: the [store::TreeStore] gateway trait and the in-process [store::MemoryStore]
//! - **[`db`]**: SQLite [db::DbConnection] gateway (feature `service`)
//! - **[`forest`]** / **[`nodeindex`]**: the lazy forest and the record cache
//! - **[`mutation`]**: pure forest rewrites
//! - **[`selection`]**: selection, expansion and drop-gesture state
//! - **[`event`]**: signals for the presentation layer
//! - **[`config`]**: engine tunables and persisted view state
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memtree_core::{
//!     config::EngineConfig,
//!     engine::TreeEngine,
//!     properties::ViewScope,
//!     store::MemoryStore,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!     let list = store.seed(None, 0, "Rust");
//!     let topic = store.seed(Some(list), 0, "Ownership");
//!     store.seed(Some(topic), 0, "Borrowing");
//!
//!     let (engine, mut events) = TreeEngine::with_channel(store, EngineConfig::default());
//!     engine.load_roots(ViewScope::All).await?;
//!
//!     // Jump straight to a search hit; its ancestors are fetched and expanded.
//!     let hits = engine.search("borrow").await?;
//!     engine.reveal_path(hits[0].id).await?;
//!
//!     for row in engine.visible_rows() {
//!         let name = engine.node(row.id).map(|r| r.name.clone()).unwrap_or_default();
//!         println!("{}{}", "  ".repeat(row.depth as usize), name);
//!     }
//!     while let Ok(event) = events.try_recv() {
//!         println!("event: {event}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
#[cfg(all(feature = "service", not(target_arch = "wasm32")))]
pub mod db;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod event;
pub mod forest;
pub mod mutation;
pub mod nodeindex;
pub mod properties;
pub mod selection;
pub mod store;

pub use error::*;
