//! History Tree Split Tests
//!
//! Drives `HistoryTree` directly with enough intervals to fill many nodes.

use crate::common::*;
use statehist::{CancelToken, HistoryTree, HtConfig, Quark, StateInterval, StateValue};

fn small_config(path: &std::path::Path) -> HtConfig {
    HtConfig::new(path, PROVIDER_VERSION, 0)
        .with_block_size(4096)
        .with_max_children(3)
}

/// Consecutive `[10i, 10i + 9]` intervals over two quarks.
fn input(count: i64) -> Vec<StateInterval> {
    (0..count)
        .map(|i| {
            StateInterval::new(
                i * 10,
                i * 10 + 9,
                Quark::new((i % 2) as u32),
                StateValue::Long(i),
            )
            .unwrap()
        })
        .collect()
}

#[test]
fn test_split_leaves_hold_input_in_order() {
    init_tracing();
    let (_dir, path) = temp_history();
    let tree = HistoryTree::create(small_config(&path)).unwrap();
    let intervals = input(3_000);
    for iv in &intervals {
        tree.insert(iv.clone()).unwrap();
    }
    let end = intervals.last().unwrap().end();
    tree.close_tree(end).unwrap();

    let mut leaves = Vec::new();
    for seq in 0..tree.node_count() {
        let node = tree.read_node(seq).unwrap();
        if node.is_leaf() {
            leaves.push(node);
        } else {
            assert!(node.intervals().is_empty(), "core node {} holds intervals", seq);
        }
    }
    assert!(leaves.len() >= 2);
    leaves.sort_by_key(|node| node.start());

    let mut stored: Vec<StateInterval> = Vec::new();
    for leaf in &leaves {
        let mut own: Vec<_> = leaf.intervals().to_vec();
        own.sort_by_key(|iv| iv.start());
        stored.extend(own);
    }
    assert_eq!(stored, intervals);

    for pair in leaves.windows(2) {
        assert!(pair[0].end().unwrap() < pair[1].start());
    }
    tree.check_integrity().unwrap();
}

#[test]
fn test_tree_grows_in_height() {
    let (_dir, path) = temp_history();
    let tree = HistoryTree::create(small_config(&path)).unwrap();
    assert_eq!(tree.depth().unwrap(), 1);
    for iv in input(5_000) {
        tree.insert(iv).unwrap();
    }
    let building_depth = tree.depth().unwrap();
    assert!(building_depth >= 3, "depth {}", building_depth);
    tree.close_tree(50_000).unwrap();

    let stats = tree.stats().unwrap();
    assert_eq!(stats.depth, building_depth);
    assert_eq!(stats.node_count, tree.node_count());
    assert!(stats.file_size >= 4096 * (1 + stats.node_count as u64));
}

#[test]
fn test_point_queries_across_nodes() {
    let (_dir, path) = temp_history();
    let tree = HistoryTree::create(small_config(&path)).unwrap();
    let intervals = input(2_000);
    for iv in &intervals {
        tree.insert(iv.clone()).unwrap();
    }
    let cancel = CancelToken::new();

    // queried while building: closed nodes and the latest branch
    for iv in intervals.iter().step_by(37) {
        for t in [iv.start(), iv.end()] {
            let got = tree.query_single(t, iv.quark(), &cancel).unwrap();
            assert_eq!(got.as_ref(), Some(iv));
        }
    }

    tree.close_tree(20_000).unwrap();
    let mut full = vec![None; 2];
    tree.query_full(12_345, &mut full, &cancel).unwrap();
    let hit = full[0].as_ref().unwrap();
    assert_eq!((hit.start(), hit.end()), (12_340, 12_349));
    // quark 1 has a gap there
    assert!(full[1].is_none());
}

#[test]
fn test_long_interval_lands_in_core_node() {
    let (_dir, path) = temp_history();
    let tree = HistoryTree::create(small_config(&path)).unwrap();
    for iv in input(1_000) {
        tree.insert(iv).unwrap();
    }
    // spans every leaf written so far
    let long = StateInterval::new(0, 10_500, Quark::new(5), StateValue::from("boot")).unwrap();
    tree.insert(long.clone()).unwrap();
    tree.close_tree(11_000).unwrap();

    let cancel = CancelToken::new();
    for t in [0, 5_000, 10_500] {
        assert_eq!(tree.query_single(t, Quark::new(5), &cancel).unwrap(), Some(long.clone()));
    }
    tree.check_integrity().unwrap();
}
