//! Integration tests for layered SCC extraction.

mod common;

use common::{build_table, test_pool};
use wash_analysis::scc::{extract_scc_catalog, scc_fingerprint};
use wash_analysis::trade_graph::TokenTradeGraph;
use wash_data::types::TradeTable;

/// A full three-party rotation on one token, traded twice.
///
/// The simple graph collapses both rotations into weight-1 edges, so the
/// layered loop finds the triangle exactly once.
#[test]
fn single_layer_triangle_occurs_once() {
    let table = build_table(&[
        ("0x1", 10, 0, 2, 1, 10.0),
        ("0x2", 20, 0, 3, 2, 10.0),
        ("0x3", 30, 0, 1, 3, 10.0),
        ("0x4", 40, 0, 2, 1, 10.0),
        ("0x5", 50, 0, 3, 2, 10.0),
        ("0x6", 60, 0, 1, 3, 10.0),
    ]);

    let catalog = extract_scc_catalog(&table, 1, &test_pool());

    assert_eq!(catalog.records.len(), 1);
    let record = &catalog.records[0];
    assert_eq!(record.occurrence, 1);
    assert_eq!(record.num_traders, 3);
    assert_eq!(record.scc_hash, scc_fingerprint(&[1, 2, 3]));
    assert_eq!(catalog.members[&record.scc_hash], vec![1, 2, 3]);
}

/// Asymmetric multiplicities: (1→2) three times, (2→1) twice.
///
/// Layers one and two both contain the pair; by layer three the reverse
/// edge is gone and the loop stops. Occurrence must be exactly 2.
#[test]
fn asymmetric_pair_occurs_once_per_layer() {
    let table = build_table(&[
        ("0x1", 10, 0, 2, 1, 10.0),
        ("0x2", 20, 0, 2, 1, 10.0),
        ("0x3", 30, 0, 1, 2, 10.0),
        ("0x4", 40, 0, 1, 2, 10.0),
        ("0x5", 50, 0, 2, 1, 10.0),
    ]);

    let catalog = extract_scc_catalog(&table, 1, &test_pool());

    assert_eq!(catalog.records.len(), 1);
    assert_eq!(catalog.records[0].occurrence, 2);
    assert_eq!(catalog.records[0].scc_hash, scc_fingerprint(&[1, 2]));
}

/// The same pair appearing once on each of 100 tokens is relevant at
/// threshold 100 and not at 101.
#[test]
fn relevance_threshold_is_inclusive() {
    let mut table = TradeTable::default();
    for token in 0..100u32 {
        let ts = i64::from(token) * 10;
        let forward = format!("0xf{token:03}");
        let back = format!("0xb{token:03}");
        table.push(forward, ts, ts, token, 2, 1, 10.0, 10.0, 10.0);
        table.push(back, ts + 1, ts + 1, token, 1, 2, 10.0, 10.0, 10.0);
    }

    let at_100 = extract_scc_catalog(&table, 100, &test_pool());
    assert_eq!(at_100.records[0].occurrence, 100);
    assert_eq!(at_100.relevant_count(), 1);

    let at_101 = extract_scc_catalog(&table, 101, &test_pool());
    assert_eq!(at_101.relevant_count(), 0);
}

/// Identical member sets must fingerprint identically across independent
/// runs, and different sets must not collide.
#[test]
fn fingerprints_are_stable_across_runs() {
    let table = build_table(&[
        ("0x1", 10, 0, 2, 1, 10.0),
        ("0x2", 20, 0, 1, 2, 10.0),
        ("0x3", 30, 1, 4, 3, 10.0),
        ("0x4", 40, 1, 3, 4, 10.0),
    ]);

    let first = extract_scc_catalog(&table, 1, &test_pool());
    let second = extract_scc_catalog(&table, 1, &test_pool());

    assert_eq!(first.records, second.records);
    assert_eq!(first.records.len(), 2);
    assert_ne!(first.records[0].scc_hash, first.records[1].scc_hash);
}

/// Self-trades must not affect the catalog at all.
#[test]
fn self_trades_leave_output_unchanged() {
    let without = build_table(&[
        ("0x1", 10, 0, 2, 1, 10.0),
        ("0x2", 20, 0, 1, 2, 10.0),
    ]);
    let with = build_table(&[
        ("0xaa", 5, 0, 1, 1, 99.0),
        ("0x1", 10, 0, 2, 1, 10.0),
        ("0x2", 20, 0, 1, 2, 10.0),
        ("0xbb", 25, 0, 2, 2, 99.0),
    ]);

    let baseline = extract_scc_catalog(&without, 1, &test_pool());
    let extended = extract_scc_catalog(&with, 1, &test_pool());

    assert_eq!(baseline.records, extended.records);
}

/// Every emitted SCC has at least two members.
#[test]
fn no_trivial_sccs_are_emitted() {
    // a chain, an isolated pair, and a triangle
    let table = build_table(&[
        ("0x1", 10, 0, 2, 1, 10.0),
        ("0x2", 20, 0, 3, 2, 10.0),
        ("0x3", 30, 1, 5, 4, 10.0),
        ("0x4", 40, 1, 4, 5, 10.0),
        ("0x5", 50, 2, 7, 6, 10.0),
        ("0x6", 60, 2, 8, 7, 10.0),
        ("0x7", 70, 2, 6, 8, 10.0),
    ]);

    let catalog = extract_scc_catalog(&table, 1, &test_pool());

    assert_eq!(catalog.records.len(), 2);
    assert!(catalog.records.iter().all(|r| r.num_traders >= 2));
    assert!(catalog.members.values().all(|m| m.len() >= 2));
}

/// Empty input produces an empty catalog.
#[test]
fn empty_table_yields_empty_catalog() {
    let catalog = extract_scc_catalog(&TradeTable::default(), 1, &test_pool());
    assert!(catalog.records.is_empty());
    assert!(catalog.members.is_empty());
    assert_eq!(catalog.relevant_count(), 0);
}

/// Total edge weight strictly decreases across layers until the graph is
/// exhausted.
#[test]
fn peeling_sheds_weight_every_layer() {
    let mut graph = TokenTradeGraph::from_trades([
        (1, 2),
        (1, 2),
        (1, 2),
        (2, 1),
        (2, 1),
        (2, 3),
        (3, 1),
    ]);

    let mut previous = graph.total_weight();
    assert_eq!(previous, 7);
    while !graph.is_empty() && !graph.non_trivial_sccs().is_empty() {
        graph.peel();
        let current = graph.total_weight();
        assert!(current < previous);
        previous = current;
    }
}
