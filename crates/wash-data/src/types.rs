//! Type definitions for trade records and the canonical columnar table.

use std::collections::HashMap;

use chrono::NaiveDate;

/// One raw exchange fill as parsed from the trades CSV.
///
/// Amounts are still integer-encoded base units at this stage; the
/// preprocessor divides by `10^decimals` to obtain real quantities.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTradeRow {
    /// Fill timestamp in unix seconds.
    pub timestamp: i64,
    /// Transaction hash (opaque unique identifier).
    pub tx_hash: String,
    /// Execution status (1 = success).
    pub status: i64,
    /// Maker address (hex text).
    pub maker: String,
    /// Taker address (hex text).
    pub taker: String,
    /// Token bought by the maker (hex text).
    pub token_buy: String,
    /// Token sold by the maker (hex text).
    pub token_sell: String,
    /// Order size on the buy side, in `token_buy` base units.
    pub amount_buy: f64,
    /// Order size on the sell side, in `token_sell` base units.
    pub amount_sell: f64,
    /// Filled amount, in `token_buy` base units.
    pub amount: f64,
}

/// One ETH/USD price sample.
#[derive(Clone, Debug, PartialEq)]
pub struct PricePoint {
    /// Calendar date of the sample.
    pub date: NaiveDate,
    /// Sample timestamp in unix seconds.
    pub timestamp: i64,
    /// ETH price in USD at that timestamp.
    pub usd_per_eth: f64,
}

/// Canonical trade table, column-oriented.
///
/// All vectors have the same length; row `i` across every column is one
/// trade. Rows are sorted ascending by `timestamp`. The table is immutable
/// after preprocessing; wash labels live in a separate `Vec<bool>` owned by
/// the orchestrator so that parallel regions can read the table freely.
#[derive(Clone, Debug, Default)]
pub struct TradeTable {
    /// Transaction hash per row.
    pub tx_id: Vec<String>,
    /// Trade timestamp in unix seconds.
    pub timestamp: Vec<i64>,
    /// Left endpoint of the price interval the trade fell into.
    pub cut: Vec<i64>,
    /// Dense token ID (see [`crate::registry::TokenRegistry`]).
    pub token_id: Vec<u32>,
    /// Trader ID of the account that paid ETH.
    pub buyer_id: Vec<u32>,
    /// Trader ID of the account that received ETH.
    pub seller_id: Vec<u32>,
    /// Trade size in ETH.
    pub amount_eth: Vec<f64>,
    /// Trade size in token units.
    pub amount_token: Vec<f64>,
    /// Trade size in USD at the binned ETH price.
    pub amount_usd: Vec<f64>,
}

impl TradeTable {
    /// Number of trades in the table.
    pub fn len(&self) -> usize {
        self.tx_id.len()
    }

    /// True if the table holds no trades.
    pub fn is_empty(&self) -> bool {
        self.tx_id.is_empty()
    }

    /// Appends one canonical trade row.
    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        tx_id: String,
        timestamp: i64,
        cut: i64,
        token_id: u32,
        buyer_id: u32,
        seller_id: u32,
        amount_eth: f64,
        amount_token: f64,
        amount_usd: f64,
    ) {
        self.tx_id.push(tx_id);
        self.timestamp.push(timestamp);
        self.cut.push(cut);
        self.token_id.push(token_id);
        self.buyer_id.push(buyer_id);
        self.seller_id.push(seller_id);
        self.amount_eth.push(amount_eth);
        self.amount_token.push(amount_token);
        self.amount_usd.push(amount_usd);
    }

    /// Row indices grouped by token, tokens in ascending ID order.
    ///
    /// Row order within a group follows table order, i.e. ascending
    /// timestamps.
    pub fn token_groups(&self) -> Vec<(u32, Vec<usize>)> {
        let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
        for row in 0..self.len() {
            groups.entry(self.token_id[row]).or_default().push(row);
        }
        let mut out: Vec<(u32, Vec<usize>)> = groups.into_iter().collect();
        out.sort_unstable_by_key(|(token, _)| *token);
        out
    }
}
