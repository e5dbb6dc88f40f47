//! Shared test helpers.
//!
//! Factory functions for canonical trade tables and detection runs with
//! sensible defaults.

#![allow(dead_code)]

use wash_data::config::DetectionConfig;
use wash_data::types::TradeTable;

/// One synthetic trade: `(tx_id, timestamp, token_id, buyer_id, seller_id, amount)`.
pub type TradeSpec = (&'static str, i64, u32, u32, u32, f64);

/// Builds a canonical table from trade specs.
///
/// `cut` mirrors the timestamp and the amount is used for the ETH, token,
/// and USD columns alike, which is all the engines need. Specs must already
/// be in ascending timestamp order.
pub fn build_table(trades: &[TradeSpec]) -> TradeTable {
    let mut table = TradeTable::default();
    for &(tx_id, timestamp, token_id, buyer_id, seller_id, amount) in trades {
        table.push(
            tx_id.to_string(),
            timestamp,
            timestamp,
            token_id,
            buyer_id,
            seller_id,
            amount,
            amount,
            amount,
        );
    }
    table
}

/// Detection config with every SCC relevant and one wide window.
///
/// Single-threaded so test failures reproduce deterministically under a
/// debugger.
pub fn test_config() -> DetectionConfig {
    DetectionConfig {
        scc_occurrence_threshold: 1,
        window_sizes_seconds: vec![1_000_000],
        worker_count: 1,
        ..DetectionConfig::default()
    }
}

/// Worker pool sized for the test config.
pub fn test_pool() -> rayon::ThreadPool {
    wash_analysis::pipeline::build_worker_pool(1).expect("worker pool should build")
}
