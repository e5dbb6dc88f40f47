//! Benchmarks for the wash-analysis engines.
//!
//! Uses synthetic in-memory trade data for reproducible performance testing.
//! Run with: `cargo bench --package wash-analysis`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dashmap::DashMap;
use wash_analysis::scc::peel_token_sccs;
use wash_analysis::volume_matching::longest_balanced_prefix;

/// Generates a ring of `accounts` traders with `layers` full rotations,
/// the shape that maximizes peeling depth per edge.
fn ring_trades(accounts: u32, layers: u32) -> Vec<(u32, u32)> {
    let mut pairs = Vec::with_capacity((accounts * layers) as usize);
    for _ in 0..layers {
        for seller in 1..=accounts {
            let buyer = if seller == accounts { 1 } else { seller + 1 };
            pairs.push((seller, buyer));
        }
    }
    pairs
}

/// Generates `n` alternating round-trip trades between two accounts, fully
/// balanced so the matcher scans every prefix length exactly once.
fn round_trip_columns(n: usize) -> (Vec<usize>, Vec<u32>, Vec<u32>, Vec<f64>) {
    let rows: Vec<usize> = (0..n).collect();
    let buyers: Vec<u32> = (0..n).map(|i| if i % 2 == 0 { 1 } else { 2 }).collect();
    let sellers: Vec<u32> = (0..n).map(|i| if i % 2 == 0 { 2 } else { 1 }).collect();
    let amounts: Vec<f64> = vec![100.0; n];
    (rows, buyers, sellers, amounts)
}

/// Benchmark: peel a 10-node ring with 50 multiplicity layers.
fn bench_peel_ring(c: &mut Criterion) {
    let pairs = ring_trades(10, 50);
    c.bench_function("peel_ring_10x50", |b| {
        b.iter(|| {
            let members = DashMap::new();
            let hashes = peel_token_sccs(black_box(pairs.iter().copied()), &members);
            black_box(hashes.len())
        })
    });
}

/// Benchmark: longest balanced prefix over 10k round-trip trades.
fn bench_balanced_prefix(c: &mut Criterion) {
    let (rows, buyers, sellers, amounts) = round_trip_columns(10_000);
    c.bench_function("balanced_prefix_10k", |b| {
        b.iter(|| {
            longest_balanced_prefix(
                black_box(&rows),
                &buyers,
                &sellers,
                &amounts,
                black_box(0.1),
            )
        })
    });
}

criterion_group!(benches, bench_peel_ring, bench_balanced_prefix);
criterion_main!(benches);
