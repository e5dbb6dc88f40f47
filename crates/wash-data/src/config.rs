//! Detection run configuration.

use eyre::{eyre, Result};

/// Canonical ETH sentinel: the token address that marks the ETH side of a
/// trade.
pub const DEFAULT_ETHER_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Tunables for one detection run.
#[derive(Clone, Debug)]
pub struct DetectionConfig {
    /// Token address treated as ETH when splitting trade orientation.
    pub ether_address: String,
    /// Minimum layered occurrence count for an SCC to be considered relevant.
    pub scc_occurrence_threshold: u64,
    /// Balance tolerance as a fraction of the window's mean trade amount.
    pub wash_margin: f64,
    /// Window durations in seconds, processed in order.
    pub window_sizes_seconds: Vec<i64>,
    /// Size of the worker pool used by both parallel regions.
    pub worker_count: usize,
    /// Drop trades whose `status` field is not 1.
    pub filter_status: bool,
    /// Balance on the ETH-denominated amount instead of the token amount.
    pub wash_trade_uses_eth_amount: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ether_address: DEFAULT_ETHER_ADDRESS.to_string(),
            scc_occurrence_threshold: 100,
            wash_margin: 0.1,
            window_sizes_seconds: vec![3_600, 86_400, 604_800],
            worker_count: 16,
            filter_status: true,
            wash_trade_uses_eth_amount: false,
        }
    }
}

impl DetectionConfig {
    /// Checks the invariants the engines assume.
    ///
    /// # Errors
    /// Returns error on a non-positive margin, an empty or non-positive
    /// window list, or a zero worker count.
    pub fn validate(&self) -> Result<()> {
        if !(self.wash_margin > 0.0) {
            return Err(eyre!(
                "wash margin must be > 0, got {}",
                self.wash_margin
            ));
        }
        if self.window_sizes_seconds.is_empty() {
            return Err(eyre!("at least one window size is required"));
        }
        if let Some(bad) = self.window_sizes_seconds.iter().find(|w| **w <= 0) {
            return Err(eyre!("window sizes must be positive, got {}", bad));
        }
        if self.worker_count == 0 {
            return Err(eyre!("worker count must be at least 1"));
        }
        Ok(())
    }
}
