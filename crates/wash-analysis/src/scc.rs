//! Layered strongly-connected-component extraction across tokens.
//!
//! Each token's trade graph is peeled layer by layer: every SCC present at
//! the current edge multiplicity is fingerprinted and recorded, then one
//! copy of the multigraph is subtracted and the loop repeats until no cycle
//! remains. Occurrence counts are tallied over all `(token, layer)` pairs
//! and member sets whose count reaches the threshold form the relevant
//! catalog the orchestrator iterates.

use std::collections::HashMap;

use dashmap::DashMap;
use num_bigint::BigUint;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use wash_data::types::TradeTable;

use crate::trade_graph::TokenTradeGraph;

/// Deterministic fingerprint of a sorted member set.
///
/// SHA-256 over the comma-joined decimal trader IDs, with the digest
/// rendered as a decimal big integer. The same format is used for catalog
/// keys, store rows, and exports.
pub fn scc_fingerprint(members: &[u32]) -> String {
    let joined = members
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let digest = Sha256::digest(joined.as_bytes());
    BigUint::from_bytes_be(&digest).to_string()
}

/// One aggregated catalog entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SccRecord {
    /// Member-set fingerprint.
    pub scc_hash: String,
    /// Number of `(token, layer)` pairs this member set appeared in.
    pub occurrence: u64,
    /// Member count.
    pub num_traders: usize,
}

/// Every SCC observed in a run, with its member map and the relevance
/// threshold the run was configured with.
#[derive(Clone, Debug)]
pub struct SccCatalog {
    /// Records sorted by occurrence descending, fingerprint ascending.
    pub records: Vec<SccRecord>,
    /// Fingerprint → sorted member IDs.
    pub members: HashMap<String, Vec<u32>>,
    /// Minimum occurrence for a record to count as relevant.
    pub threshold: u64,
}

impl SccCatalog {
    /// Relevant records in rank order (the orchestrator's iteration order).
    pub fn relevant(&self) -> impl Iterator<Item = &SccRecord> {
        self.records
            .iter()
            .filter(|record| record.occurrence >= self.threshold)
    }

    /// Number of relevant records.
    pub fn relevant_count(&self) -> usize {
        self.relevant().count()
    }
}

/// Peels layered SCCs out of one token's trades.
///
/// Returns one fingerprint per `(layer, SCC)` occurrence; member sets are
/// registered in `members`. Registration is conflict-free: a fingerprint
/// only ever maps to one member list.
pub fn peel_token_sccs<I>(pairs: I, members: &DashMap<String, Vec<u32>>) -> Vec<String>
where
    I: IntoIterator<Item = (u32, u32)>,
{
    let mut graph = TokenTradeGraph::from_trades(pairs);
    let mut hashes = Vec::new();

    while !graph.is_empty() {
        let layer_sccs = graph.non_trivial_sccs();
        if layer_sccs.is_empty() {
            break;
        }

        for scc_members in layer_sccs {
            let hash = scc_fingerprint(&scc_members);
            members.entry(hash.clone()).or_insert(scc_members);
            hashes.push(hash);
        }

        graph.peel();
    }

    hashes
}

/// Component driver: fans token groups out over the worker pool and tallies
/// occurrences into the catalog.
pub fn extract_scc_catalog(
    table: &TradeTable,
    threshold: u64,
    pool: &rayon::ThreadPool,
) -> SccCatalog {
    let groups = table.token_groups();
    debug!(tokens = groups.len(), "starting layered SCC extraction");

    let members: DashMap<String, Vec<u32>> = DashMap::new();
    let hash_lists: Vec<Vec<String>> = pool.install(|| {
        groups
            .par_iter()
            .map(|(_token, rows)| {
                peel_token_sccs(
                    rows.iter()
                        .map(|&row| (table.seller_id[row], table.buyer_id[row])),
                    &members,
                )
            })
            .collect()
    });

    let mut occurrence: HashMap<String, u64> = HashMap::new();
    for hashes in hash_lists {
        for hash in hashes {
            *occurrence.entry(hash).or_default() += 1;
        }
    }

    let members: HashMap<String, Vec<u32>> = members.into_iter().collect();
    let mut records: Vec<SccRecord> = occurrence
        .into_iter()
        .map(|(scc_hash, occurrence)| SccRecord {
            num_traders: members.get(&scc_hash).map_or(0, Vec::len),
            scc_hash,
            occurrence,
        })
        .collect();
    records.sort_unstable_by(|a, b| {
        b.occurrence
            .cmp(&a.occurrence)
            .then_with(|| a.scc_hash.cmp(&b.scc_hash))
    });

    let catalog = SccCatalog {
        records,
        members,
        threshold,
    };
    info!(
        sccs = catalog.records.len(),
        relevant = catalog.relevant_count(),
        threshold,
        "SCC extraction complete"
    );
    catalog
}
