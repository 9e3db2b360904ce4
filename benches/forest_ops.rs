//! Performance benchmarks for forest rewrites
//!
//! A wide, moderately deep forest is built in memory and the hot paths are measured:
//! - Field updates and moves (path-copying rewrites)
//! - Merging a refetched sibling list into loaded children
//! - Flattening the visible outline
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use memtree_core::{
    forest::{merge_fetched, Children, Forest, TreeNode},
    mutation::{move_node, update_by_id},
    properties::{NodeId, NodePatch, NodeRecord},
};
use std::sync::Arc;

const ROOTS: i64 = 200;
const CHILDREN_PER_ROOT: i64 = 50;

fn child_id(root: i64, n: i64) -> NodeId {
    NodeId(ROOTS + root * CHILDREN_PER_ROOT + n + 1)
}

fn wide_forest() -> Forest {
    let roots = (0..ROOTS)
        .map(|root| {
            let children = (0..CHILDREN_PER_ROOT)
                .map(|n| {
                    let mut record =
                        NodeRecord::new(child_id(root, n), Some(NodeId(root + 1)), n, "leaf");
                    record.child_count = Some(0);
                    Arc::new(TreeNode::from_record(record))
                })
                .collect::<Vec<_>>();
            let mut record = NodeRecord::new(NodeId(root + 1), None, root, "root");
            record.child_count = Some(CHILDREN_PER_ROOT as u32);
            Arc::new(TreeNode {
                record,
                children: Children::Loaded(children),
            })
        })
        .collect::<Vec<_>>();
    Forest::new(Children::Loaded(roots))
}

fn bench_update_by_id(c: &mut Criterion) {
    let forest = wide_forest();
    let target = child_id(ROOTS / 2, CHILDREN_PER_ROOT / 2);
    let patch = NodePatch {
        name: Some("renamed".to_string()),
        ..Default::default()
    };
    c.bench_function("update_by_id", |b| {
        b.iter(|| update_by_id(black_box(&forest), black_box(target), &patch))
    });
}

fn bench_move_node(c: &mut Criterion) {
    let forest = wide_forest();
    let moved = child_id(3, 7);
    let target = Some(NodeId(ROOTS - 1));
    c.bench_function("move_node", |b| {
        b.iter(|| move_node(black_box(&forest), black_box(moved), target))
    });
}

fn bench_merge_fetched(c: &mut Criterion) {
    let forest = wide_forest();
    let existing = forest.root_nodes().to_vec();
    let fetched = existing
        .iter()
        .map(|node| node.record.clone())
        .collect::<Vec<_>>();
    c.bench_function("merge_fetched_roots", |b| {
        b.iter(|| merge_fetched(black_box(&existing), fetched.clone()))
    });
}

fn bench_visible_rows(c: &mut Criterion) {
    let forest = wide_forest();
    c.bench_function("visible_rows_all_expanded", |b| {
        b.iter(|| black_box(&forest).visible_rows(|_| true))
    });
}

criterion_group!(
    benches,
    bench_update_by_id,
    bench_move_node,
    bench_merge_fetched,
    bench_visible_rows
);
criterion_main!(benches);
