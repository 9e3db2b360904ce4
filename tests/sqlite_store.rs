//! SQLite gateway behavior, end to end through sqlx.
#![cfg(feature = "service")]

mod common;

use common::{fast_config, init_logging, stored_keys};
use memtree_core::{
    db::DbConnection,
    engine::{Outcome, TreeEngine},
    properties::{NewNode, NodeFlag, NodeId, NodePatch, ViewScope},
    store::TreeStore,
};
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> DbConnection {
    init_logging();
    DbConnection::open(dir.path().join("memtree.db"))
        .await
        .expect("database should open and migrate")
}

/// A ── B ── C, A ── D, plus root E.
async fn seed(store: &DbConnection) -> [NodeId; 5] {
    let a = store.insert_node(NewNode::named(None, 0, "Alpha")).await.unwrap();
    let b = store.insert_node(NewNode::named(Some(a.id), 0, "Beta")).await.unwrap();
    let c = store
        .insert_node(NewNode {
            code_snippet: "fn borrow_check() {}".to_string(),
            ..NewNode::named(Some(b.id), 0, "Gamma")
        })
        .await
        .unwrap();
    let d = store.insert_node(NewNode::named(Some(a.id), 1, "Delta")).await.unwrap();
    let e = store.insert_node(NewNode::named(None, 1, "Epsilon")).await.unwrap();
    [a.id, b.id, c.id, d.id, e.id]
}

#[tokio::test]
async fn reopening_keeps_rows_and_schema() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir).await;
        seed(&store).await;
        store.0.close().await;
    }
    let store = open_store(&dir).await;
    let roots = store.fetch_roots(ViewScope::All).await.unwrap();
    assert_eq!(roots.len(), 2);
}

#[tokio::test]
async fn reads_report_child_counts_and_chains() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let [a, b, c, d, e] = seed(&store).await;

    let mut roots = store.fetch_roots(ViewScope::All).await.unwrap();
    roots.sort_by_key(|r| r.sort_key());
    assert_eq!(roots.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, e]);
    assert_eq!(roots[0].child_count, Some(2));
    assert_eq!(roots[1].child_count, Some(0));

    let chain = store.fetch_ancestor_chain(c).await.unwrap();
    assert_eq!(chain.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b, c]);
    assert!(store.fetch_ancestor_chain(NodeId(9999)).await.unwrap().is_empty());

    assert_eq!(store.count_direct_children(a).await.unwrap(), 2);
    assert_eq!(store.next_order_key(Some(a)).await.unwrap(), 2);
    assert_eq!(store.next_order_key(Some(d)).await.unwrap(), 0);
    assert_eq!(store.next_order_key(None).await.unwrap(), 2);
    assert!(store.fetch_node(NodeId(9999)).await.unwrap().is_none());
}

#[tokio::test]
async fn scopes_filter_the_root_list() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let [a, b, _, _, e] = seed(&store).await;
    store
        .update_fields(e, &NodePatch::flag(NodeFlag::Starred, true))
        .await
        .unwrap();

    let starred = store.fetch_roots(ViewScope::Starred).await.unwrap();
    assert_eq!(starred.iter().map(|r| r.id).collect::<Vec<_>>(), vec![e]);
    let single = store.fetch_roots(ViewScope::Subtree(b)).await.unwrap();
    assert_eq!(single.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b]);
    assert_eq!(single[0].parent_id, Some(a));
}

#[tokio::test]
async fn search_matches_text_fields_case_insensitively() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let [_, _, c, d, _] = seed(&store).await;

    let hits = store.search("BORROW", 10).await.unwrap();
    assert_eq!(hits.iter().map(|r| r.id).collect::<Vec<_>>(), vec![c]);
    let hits = store.search("delt", 10).await.unwrap();
    assert_eq!(hits.iter().map(|r| r.id).collect::<Vec<_>>(), vec![d]);
    // LIKE wildcards in the needle are literal.
    assert!(store.search("%", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn writes_check_their_targets() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let [a, b, c, _, e] = seed(&store).await;

    store.update_parent(&[b], Some(e)).await.unwrap();
    assert_eq!(store.fetch_node(b).await.unwrap().unwrap().parent_id, Some(e));
    assert!(store.update_parent(&[NodeId(9999)], Some(a)).await.is_err());
    assert!(store
        .update_fields(NodeId(9999), &NodePatch::order_key(3))
        .await
        .is_err());

    // B still has C below it.
    assert!(store.delete_nodes(&[b]).await.is_err());
    assert!(store.fetch_node(b).await.unwrap().is_some());
    store.delete_nodes(&[c, b]).await.unwrap();
    assert!(store.fetch_node(b).await.unwrap().is_none());
    assert!(store.fetch_node(c).await.unwrap().is_none());
}

#[tokio::test]
async fn bulk_insert_assigns_ids_in_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let [_, _, _, d, _] = seed(&store).await;

    let records = store
        .insert_many(vec![
            NewNode::named(Some(d), 0, "one"),
            NewNode::named(Some(d), 1, "two"),
        ])
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert!(records[0].id < records[1].id);
    assert_eq!(
        stored_keys(&store, d).await,
        vec![(records[0].id, 0), (records[1].id, 1)]
    );
}

#[tokio::test]
async fn engine_reveals_and_reindexes_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let [a, b, c, d, _] = seed(&store).await;
    let engine = TreeEngine::new(store, fast_config());

    let outcome = engine.reveal_path(c).await.unwrap();
    assert_eq!(outcome, Outcome::Applied(vec![a, b]));
    assert!(engine.selection().contains(c));

    assert_eq!(engine.reindex_from(b, 5).await.unwrap(), 2);
    assert_eq!(stored_keys(engine.store(), a).await, vec![(b, 5), (d, 6)]);

    let removed = engine.delete_subtree(b).await.unwrap();
    assert_eq!(removed, 2);
    assert!(!engine.forest().contains(c));
    assert!(engine.store().fetch_node(c).await.unwrap().is_none());
}
