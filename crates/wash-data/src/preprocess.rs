//! Trade preprocessor: raw exchange fills into the canonical columnar table.
//!
//! One pass over the raw rows applies, in order: status filtering, the
//! ETH-side filter, decimals conversion, price binning, orientation folding,
//! and the self-trade drop. Surviving trades are then sorted by timestamp
//! and re-keyed onto dense trader and token IDs.

use std::collections::HashMap;

use eyre::{eyre, Result};
use serde::Serialize;
use tracing::info;

use crate::config::DetectionConfig;
use crate::registry::{TokenRegistry, TraderRegistry};
use crate::types::{PricePoint, RawTradeRow, TradeTable};

/// Decimals applied when a token has no entry in the decimals table.
pub const DEFAULT_TOKEN_DECIMALS: u32 = 18;

/// Rows removed during preprocessing, by reason.
///
/// These are data-quality drops, not errors; the loader already rejected
/// anything that violates the input schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DropStats {
    /// `status != 1` while status filtering was enabled.
    pub status_filtered: u64,
    /// token↔token or same-token trades (no ETH side).
    pub non_eth: u64,
    /// Timestamp not covered by the price series.
    pub outside_price_range: u64,
    /// Same account on both sides.
    pub self_trades: u64,
    /// Derived amount was not finite (zero buy amount).
    pub non_finite: u64,
}

impl DropStats {
    /// Total rows dropped across all reasons.
    pub fn total(&self) -> u64 {
        self.status_filtered
            + self.non_eth
            + self.outside_price_range
            + self.self_trades
            + self.non_finite
    }
}

/// Preprocessing output: the canonical table plus the registries needed to
/// translate IDs back to addresses.
#[derive(Clone, Debug)]
pub struct Preprocessed {
    /// Canonical trade table, sorted ascending by timestamp.
    pub table: TradeTable,
    /// Trader address ↔ dense ID bijection.
    pub traders: TraderRegistry,
    /// Token address ↔ dense ID mapping.
    pub tokens: TokenRegistry,
    /// Drop counts per reason.
    pub drops: DropStats,
}

/// One trade after orientation folding, still keyed by addresses.
struct FoldedTrade {
    tx_hash: String,
    timestamp: i64,
    cut: i64,
    token: String,
    eth_buyer: String,
    eth_seller: String,
    amount_eth: f64,
    amount_token: f64,
    amount_usd: f64,
}

/// Converts raw rows into the canonical table.
///
/// # Errors
/// Returns error if the price series is empty; everything else is a counted
/// drop.
pub fn preprocess(
    rows: Vec<RawTradeRow>,
    prices: &[PricePoint],
    decimals: &HashMap<String, u32>,
    config: &DetectionConfig,
) -> Result<Preprocessed> {
    if prices.is_empty() {
        return Err(eyre!("price series is empty, cannot bin trades"));
    }

    let mut drops = DropStats::default();
    let mut folded: Vec<FoldedTrade> = Vec::with_capacity(rows.len());

    for row in rows {
        if config.filter_status && row.status != 1 {
            drops.status_filtered += 1;
            continue;
        }

        let buys_eth = row.token_buy == config.ether_address;
        let sells_eth = row.token_sell == config.ether_address;
        if !(buys_eth || sells_eth) || row.token_buy == row.token_sell {
            drops.non_eth += 1;
            continue;
        }

        let scale_buy = decimals_scale(decimals, &row.token_buy);
        let scale_sell = decimals_scale(decimals, &row.token_sell);
        let amount_buy_real = row.amount_buy / scale_buy;
        let amount_bought_real = row.amount / scale_buy;
        let amount_sell_real = row.amount_sell / scale_sell;

        // Sold amount is derived through the order's implied price so that
        // partial fills scale both sides consistently.
        let price = amount_sell_real / amount_buy_real;
        let amount_sold_real = amount_bought_real * price;
        if !amount_sold_real.is_finite() {
            drops.non_finite += 1;
            continue;
        }

        let Some(point) = price_bin(prices, row.timestamp) else {
            drops.outside_price_range += 1;
            continue;
        };

        let (eth_buyer, eth_seller, token, amount_eth, amount_token) = if buys_eth {
            (
                row.maker,
                row.taker,
                row.token_sell,
                amount_bought_real,
                amount_sold_real,
            )
        } else {
            (
                row.taker,
                row.maker,
                row.token_buy,
                amount_sold_real,
                amount_bought_real,
            )
        };

        if eth_buyer == eth_seller {
            drops.self_trades += 1;
            continue;
        }

        folded.push(FoldedTrade {
            tx_hash: row.tx_hash,
            timestamp: row.timestamp,
            cut: point.timestamp,
            token,
            eth_buyer,
            eth_seller,
            amount_eth,
            amount_token,
            amount_usd: amount_eth * point.usd_per_eth,
        });
    }

    folded.sort_by_key(|trade| trade.timestamp);

    let traders = TraderRegistry::from_addresses(
        folded
            .iter()
            .flat_map(|t| [t.eth_buyer.clone(), t.eth_seller.clone()]),
    );

    let mut tokens = TokenRegistry::default();
    let mut table = TradeTable::default();
    for trade in folded {
        let token_id = tokens.intern(&trade.token);
        let (Some(buyer_id), Some(seller_id)) =
            (traders.id(&trade.eth_buyer), traders.id(&trade.eth_seller))
        else {
            continue;
        };
        table.push(
            trade.tx_hash,
            trade.timestamp,
            trade.cut,
            token_id,
            buyer_id,
            seller_id,
            trade.amount_eth,
            trade.amount_token,
            trade.amount_usd,
        );
    }

    info!(
        trades = table.len(),
        traders = traders.len(),
        tokens = tokens.len(),
        dropped = drops.total(),
        "preprocessing complete"
    );

    Ok(Preprocessed {
        table,
        traders,
        tokens,
        drops,
    })
}

fn decimals_scale(decimals: &HashMap<String, u32>, token: &str) -> f64 {
    let exponent = decimals
        .get(token)
        .copied()
        .unwrap_or(DEFAULT_TOKEN_DECIMALS);
    10f64.powi(exponent as i32)
}

/// Price sample whose half-open interval `[p_i, p_{i+1})` covers `ts`.
///
/// Trades at or past the last sample, or before the first, are uncovered.
fn price_bin(prices: &[PricePoint], ts: i64) -> Option<&PricePoint> {
    let last = prices.last()?;
    if ts >= last.timestamp {
        return None;
    }
    let idx = prices.partition_point(|p| p.timestamp <= ts);
    if idx == 0 {
        return None;
    }
    Some(&prices[idx - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const ETH: &str = "0x0000000000000000000000000000000000000000";
    const TOKEN_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const TOKEN_B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn price(timestamp: i64, usd: f64) -> PricePoint {
        PricePoint {
            date: NaiveDate::from_ymd_opt(2018, 1, 1).expect("valid date"),
            timestamp,
            usd_per_eth: usd,
        }
    }

    fn prices() -> Vec<PricePoint> {
        vec![price(0, 800.0), price(1_000, 900.0), price(2_000, 1_000.0)]
    }

    /// Maker buys 2 ETH for 400 TOKEN_A, fully filled.
    fn buy_eth_row(tx: &str, ts: i64, maker: &str, taker: &str) -> RawTradeRow {
        RawTradeRow {
            timestamp: ts,
            tx_hash: tx.to_string(),
            status: 1,
            maker: maker.to_string(),
            taker: taker.to_string(),
            token_buy: ETH.to_string(),
            token_sell: TOKEN_A.to_string(),
            amount_buy: 2e18,
            amount_sell: 400e18,
            amount: 2e18,
        }
    }

    fn config() -> DetectionConfig {
        DetectionConfig::default()
    }

    #[test]
    fn folds_buy_eth_orientation() {
        let out = preprocess(
            vec![buy_eth_row("0x1", 500, "0xmaker", "0xtaker")],
            &prices(),
            &HashMap::new(),
            &config(),
        )
        .expect("should preprocess");

        assert_eq!(out.table.len(), 1);
        let buyer = out.table.buyer_id[0];
        let seller = out.table.seller_id[0];
        assert_eq!(out.traders.address(buyer), Some("0xmaker"));
        assert_eq!(out.traders.address(seller), Some("0xtaker"));
        assert_eq!(out.tokens.address(out.table.token_id[0]), Some(TOKEN_A));
        assert_eq!(out.table.amount_eth[0], 2.0);
        assert_eq!(out.table.amount_token[0], 400.0);
        assert_eq!(out.table.amount_usd[0], 1_600.0);
        assert_eq!(out.table.cut[0], 0);
    }

    #[test]
    fn folds_sell_eth_orientation() {
        let row = RawTradeRow {
            token_buy: TOKEN_A.to_string(),
            token_sell: ETH.to_string(),
            amount_buy: 400e18,
            amount_sell: 2e18,
            amount: 400e18,
            ..buy_eth_row("0x1", 1_500, "0xmaker", "0xtaker")
        };

        let out = preprocess(vec![row], &prices(), &HashMap::new(), &config())
            .expect("should preprocess");

        assert_eq!(out.table.len(), 1);
        let buyer = out.table.buyer_id[0];
        let seller = out.table.seller_id[0];
        assert_eq!(out.traders.address(buyer), Some("0xtaker"));
        assert_eq!(out.traders.address(seller), Some("0xmaker"));
        assert_eq!(out.table.amount_eth[0], 2.0);
        assert_eq!(out.table.amount_token[0], 400.0);
        // binned into [1000, 2000) → price 900
        assert_eq!(out.table.amount_usd[0], 1_800.0);
        assert_eq!(out.table.cut[0], 1_000);
    }

    #[test]
    fn applies_token_decimals() {
        let mut decimals = HashMap::new();
        decimals.insert(TOKEN_A.to_string(), 8u32);
        let row = RawTradeRow {
            amount_sell: 400e8,
            ..buy_eth_row("0x1", 500, "0xmaker", "0xtaker")
        };

        let out =
            preprocess(vec![row], &prices(), &decimals, &config()).expect("should preprocess");
        assert_eq!(out.table.amount_token[0], 400.0);
    }

    #[test]
    fn drops_failed_status_only_when_filtering() {
        let row = RawTradeRow {
            status: 0,
            ..buy_eth_row("0x1", 500, "0xmaker", "0xtaker")
        };

        let filtered = preprocess(
            vec![row.clone()],
            &prices(),
            &HashMap::new(),
            &config(),
        )
        .expect("should preprocess");
        assert_eq!(filtered.table.len(), 0);
        assert_eq!(filtered.drops.status_filtered, 1);

        let unfiltered_config = DetectionConfig {
            filter_status: false,
            ..config()
        };
        let unfiltered = preprocess(vec![row], &prices(), &HashMap::new(), &unfiltered_config)
            .expect("should preprocess");
        assert_eq!(unfiltered.table.len(), 1);
    }

    #[test]
    fn drops_token_to_token_trades() {
        let row = RawTradeRow {
            token_buy: TOKEN_B.to_string(),
            ..buy_eth_row("0x1", 500, "0xmaker", "0xtaker")
        };

        let out = preprocess(vec![row], &prices(), &HashMap::new(), &config())
            .expect("should preprocess");
        assert_eq!(out.table.len(), 0);
        assert_eq!(out.drops.non_eth, 1);
    }

    #[test]
    fn drops_trades_outside_price_coverage() {
        let rows = vec![
            buy_eth_row("0xbefore", -10, "0xmaker", "0xtaker"),
            buy_eth_row("0xat-end", 2_000, "0xmaker", "0xtaker"),
            buy_eth_row("0xinside", 500, "0xmaker", "0xtaker"),
        ];

        let out = preprocess(rows, &prices(), &HashMap::new(), &config())
            .expect("should preprocess");
        assert_eq!(out.table.len(), 1);
        assert_eq!(out.table.tx_id[0], "0xinside");
        assert_eq!(out.drops.outside_price_range, 2);
    }

    #[test]
    fn drops_self_trades() {
        let row = buy_eth_row("0x1", 500, "0xsame", "0xsame");
        let out = preprocess(vec![row], &prices(), &HashMap::new(), &config())
            .expect("should preprocess");
        assert_eq!(out.table.len(), 0);
        assert_eq!(out.drops.self_trades, 1);
    }

    #[test]
    fn drops_zero_buy_amount_as_non_finite() {
        let row = RawTradeRow {
            amount_buy: 0.0,
            ..buy_eth_row("0x1", 500, "0xmaker", "0xtaker")
        };
        let out = preprocess(vec![row], &prices(), &HashMap::new(), &config())
            .expect("should preprocess");
        assert_eq!(out.table.len(), 0);
        assert_eq!(out.drops.non_finite, 1);
    }

    #[test]
    fn sorts_by_timestamp_and_assigns_ids_in_address_order() {
        let rows = vec![
            buy_eth_row("0xlater", 1_500, "0xzz", "0xaa"),
            buy_eth_row("0xearlier", 500, "0xmm", "0xaa"),
        ];

        let out = preprocess(rows, &prices(), &HashMap::new(), &config())
            .expect("should preprocess");
        assert_eq!(out.table.tx_id, vec!["0xearlier", "0xlater"]);
        // address order: 0xaa < 0xmm < 0xzz
        assert_eq!(out.traders.id("0xaa"), Some(1));
        assert_eq!(out.traders.id("0xmm"), Some(2));
        assert_eq!(out.traders.id("0xzz"), Some(3));
    }

    #[test]
    fn empty_price_series_is_an_error() {
        let result = preprocess(
            vec![buy_eth_row("0x1", 500, "0xmaker", "0xtaker")],
            &[],
            &HashMap::new(),
            &config(),
        );
        assert!(result.is_err());
    }
}
