//! Detection orchestrator.
//!
//! Composes the SCC catalog with the volume-matching engine: for each
//! relevant SCC, in rank order, trades between member accounts are binned
//! into time windows per configured window size and each (token, bin)
//! partition is scanned independently on the worker pool. Labels are applied
//! serially between passes, so earlier-ranked SCCs and smaller windows take
//! priority over later ones.

use std::collections::BTreeMap;

use eyre::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use wash_data::config::DetectionConfig;
use wash_data::registry::TraderRegistry;
use wash_data::types::TradeTable;

use crate::scc::SccCatalog;
use crate::volume_matching::longest_balanced_prefix;

/// Result of one detection run.
#[derive(Clone, Debug, Default)]
pub struct DetectionOutcome {
    /// Wash label per table row. Labels only ever go false → true.
    pub wash_label: Vec<bool>,
    /// Labeled transaction IDs per SCC fingerprint and window size.
    pub wash_windows: BTreeMap<String, BTreeMap<i64, Vec<String>>>,
}

impl DetectionOutcome {
    /// Number of rows labeled as wash trades.
    pub fn labeled_count(&self) -> usize {
        self.wash_label.iter().filter(|label| **label).count()
    }
}

/// Builds the fixed-size worker pool both parallel regions run on.
///
/// # Errors
/// Returns error if the pool cannot be constructed.
pub fn build_worker_pool(worker_count: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .thread_name(|index| format!("wash-worker-{index}"))
        .build()
        .wrap_err("failed to build worker pool")
}

/// Window boundaries: a `step` grid starting at `start` whose final break
/// is forced onto `stop`.
///
/// Degenerate `start == stop` inputs get a single full-width bin so the
/// covered range is never empty.
pub fn window_breaks(start: i64, stop: i64, step: i64) -> Vec<i64> {
    let mut breaks = Vec::new();
    let mut boundary = start;
    while boundary < stop {
        breaks.push(boundary);
        boundary += step;
    }
    breaks.push(stop);
    if breaks.len() == 1 {
        breaks.push(start + step);
    }
    breaks
}

/// Index of the bin containing `ts`.
///
/// Bins are half-open `[b_i, b_{i+1})` except the final one, which is
/// closed on the right so the maximum timestamp participates.
pub fn bin_index(breaks: &[i64], ts: i64) -> Option<usize> {
    let (first, last) = match (breaks.first(), breaks.last()) {
        (Some(first), Some(last)) if breaks.len() >= 2 => (*first, *last),
        _ => return None,
    };
    if ts < first || ts > last {
        return None;
    }
    if ts == last {
        return Some(breaks.len() - 2);
    }
    Some(breaks.partition_point(|b| *b <= ts) - 1)
}

/// Runs volume matching across every relevant SCC and window size.
///
/// Partitions within one (SCC, window) pass run in parallel against a
/// read-only snapshot; their label sets are unioned and applied before the
/// next pass begins, which is what makes the currently-unlabeled filter
/// well-defined.
pub fn run_detection(
    table: &TradeTable,
    catalog: &SccCatalog,
    config: &DetectionConfig,
    pool: &rayon::ThreadPool,
) -> DetectionOutcome {
    let mut outcome = DetectionOutcome {
        wash_label: vec![false; table.len()],
        wash_windows: BTreeMap::new(),
    };

    let (Some(&window_start), Some(&max_timestamp)) =
        (table.cut.iter().min(), table.timestamp.last())
    else {
        return outcome;
    };

    let amounts: &[f64] = if config.wash_trade_uses_eth_amount {
        &table.amount_eth
    } else {
        &table.amount_token
    };

    for record in catalog.relevant() {
        let Some(members) = catalog.members.get(&record.scc_hash) else {
            continue;
        };

        // rows where both counterparties belong to this SCC; member lists
        // are sorted, so membership is a binary search
        let candidate_rows: Vec<usize> = (0..table.len())
            .filter(|&row| {
                members.binary_search(&table.buyer_id[row]).is_ok()
                    && members.binary_search(&table.seller_id[row]).is_ok()
            })
            .collect();

        let mut per_window: BTreeMap<i64, Vec<String>> = BTreeMap::new();

        for &window_size in &config.window_sizes_seconds {
            let breaks = window_breaks(window_start, max_timestamp, window_size);

            // the currently-unlabeled filter is re-applied every pass
            let mut partitions: BTreeMap<(u32, usize), Vec<usize>> = BTreeMap::new();
            for &row in &candidate_rows {
                if outcome.wash_label[row] {
                    continue;
                }
                if let Some(bin) = bin_index(&breaks, table.timestamp[row]) {
                    partitions
                        .entry((table.token_id[row], bin))
                        .or_default()
                        .push(row);
                }
            }

            let slices: Vec<&Vec<usize>> = partitions.values().collect();
            let labeled: Vec<Vec<usize>> = pool.install(|| {
                slices
                    .par_iter()
                    .map(|&rows| {
                        let k = longest_balanced_prefix(
                            rows,
                            &table.buyer_id,
                            &table.seller_id,
                            amounts,
                            config.wash_margin,
                        );
                        rows[..k].to_vec()
                    })
                    .collect()
            });

            let mut tx_ids: Vec<String> = Vec::new();
            for rows in labeled {
                for row in rows {
                    outcome.wash_label[row] = true;
                    tx_ids.push(table.tx_id[row].clone());
                }
            }

            debug!(
                scc = %record.scc_hash,
                window_size,
                labeled = tx_ids.len(),
                "window pass complete"
            );
            per_window.insert(window_size, tx_ids);
        }

        outcome
            .wash_windows
            .insert(record.scc_hash.clone(), per_window);
    }

    info!(
        labeled = outcome.labeled_count(),
        sccs = outcome.wash_windows.len(),
        "volume matching complete"
    );
    outcome
}

/// Human-readable clusters: fingerprint → sorted member addresses.
pub fn address_clusters(
    catalog: &SccCatalog,
    traders: &TraderRegistry,
) -> BTreeMap<String, Vec<String>> {
    let mut clusters = BTreeMap::new();
    for record in catalog.relevant() {
        let Some(members) = catalog.members.get(&record.scc_hash) else {
            continue;
        };
        let mut addresses: Vec<String> = members
            .iter()
            .filter_map(|&id| traders.address(id))
            .map(str::to_string)
            .collect();
        addresses.sort();
        clusters.insert(record.scc_hash.clone(), addresses);
    }
    clusters
}
