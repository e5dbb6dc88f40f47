//! Input file loaders.
//!
//! Hand-parsed CSV: the input formats are plain comma-separated tables with
//! no quoting, so a full CSV dependency buys nothing. Structurally broken
//! rows are counted and skipped; unparseable numerics fail the run because
//! they indicate a schema problem rather than a data gap.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use eyre::{eyre, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::types::{PricePoint, RawTradeRow};

/// Result of loading the trades CSV.
#[derive(Clone, Debug, Default)]
pub struct TradeCsvLoad {
    /// Parsed rows in file order.
    pub rows: Vec<RawTradeRow>,
    /// Rows skipped because a required field was empty.
    pub skipped_incomplete: u64,
    /// Rows skipped because the field count did not match the header.
    pub skipped_malformed: u64,
}

/// Column layout of the trades CSV, resolved from the header row.
struct TradeColumns {
    timestamp: usize,
    tx_hash: usize,
    status: usize,
    maker: usize,
    taker: usize,
    token_buy: usize,
    token_sell: usize,
    amount_buy: usize,
    amount_sell: usize,
    amount: usize,
}

impl TradeColumns {
    fn resolve(header: &[&str]) -> Result<Self> {
        let find = |names: &[&str]| -> Result<usize> {
            names
                .iter()
                .find_map(|name| header.iter().position(|col| col.trim() == *name))
                .ok_or_else(|| eyre!("trades CSV is missing required column '{}'", names[0]))
        };

        Ok(Self {
            timestamp: find(&["timestamp"])?,
            tx_hash: find(&["transactionHash", "transaction_hash"])?,
            status: find(&["status"])?,
            maker: find(&["maker"])?,
            taker: find(&["taker"])?,
            token_buy: find(&["tokenBuy"])?,
            token_sell: find(&["tokenSell"])?,
            amount_buy: find(&["amountBuy"])?,
            amount_sell: find(&["amountSell"])?,
            amount: find(&["amount"])?,
        })
    }
}

/// Loads raw trade rows from the exchange dump CSV.
///
/// # Errors
/// Returns error if the file cannot be read, a required column is absent,
/// or a non-empty numeric field is unparseable, NaN, or negative.
pub fn load_trades_csv(path: &Path) -> Result<TradeCsvLoad> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read trades CSV {}", path.display()))?;

    let mut lines = content.lines().enumerate();
    let header: Vec<&str> = loop {
        match lines.next() {
            Some((_, line)) if line.trim().is_empty() => continue,
            Some((_, line)) => break line.split(',').collect(),
            None => return Err(eyre!("trades CSV {} is empty", path.display())),
        }
    };
    let columns = TradeColumns::resolve(&header)?;

    let mut load = TradeCsvLoad::default();

    for (line_number, line) in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let fields: Vec<&str> = trimmed.split(',').collect();
        if fields.len() < header.len() {
            debug!(line_number, "skipping trade row with short field count");
            load.skipped_malformed += 1;
            continue;
        }

        let required = [
            columns.timestamp,
            columns.tx_hash,
            columns.status,
            columns.maker,
            columns.taker,
            columns.token_buy,
            columns.token_sell,
            columns.amount_buy,
            columns.amount_sell,
            columns.amount,
        ];
        if required.iter().any(|&col| fields[col].trim().is_empty()) {
            load.skipped_incomplete += 1;
            continue;
        }

        load.rows.push(RawTradeRow {
            timestamp: parse_integer(fields[columns.timestamp], line_number, "timestamp")?,
            tx_hash: fields[columns.tx_hash].trim().to_string(),
            status: parse_integer(fields[columns.status], line_number, "status")?,
            maker: fields[columns.maker].trim().to_string(),
            taker: fields[columns.taker].trim().to_string(),
            token_buy: fields[columns.token_buy].trim().to_string(),
            token_sell: fields[columns.token_sell].trim().to_string(),
            amount_buy: parse_amount(fields[columns.amount_buy], line_number, "amountBuy")?,
            amount_sell: parse_amount(fields[columns.amount_sell], line_number, "amountSell")?,
            amount: parse_amount(fields[columns.amount], line_number, "amount")?,
        });
    }

    if load.skipped_incomplete + load.skipped_malformed > 0 {
        warn!(
            incomplete = load.skipped_incomplete,
            malformed = load.skipped_malformed,
            file = %path.display(),
            "skipped unusable trade rows"
        );
    }

    Ok(load)
}

/// Loads the ETH/USD price series.
///
/// Format: `date,timestamp,usd_per_eth` with a header row, dates as
/// `MM/DD/YYYY`, rows in strictly ascending timestamp order.
///
/// # Errors
/// Returns error on read failure, unparseable rows, or out-of-order
/// timestamps.
pub fn load_prices_csv(path: &Path) -> Result<Vec<PricePoint>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read price CSV {}", path.display()))?;

    let mut points: Vec<PricePoint> = Vec::new();

    for (line_number, line) in content.lines().enumerate().skip(1) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let fields: Vec<&str> = trimmed.split(',').collect();
        if fields.len() < 3 {
            return Err(eyre!(
                "price CSV line {} has {} fields, expected 3",
                line_number + 1,
                fields.len()
            ));
        }

        let date = NaiveDate::parse_from_str(fields[0].trim(), "%m/%d/%Y")
            .wrap_err_with(|| format!("invalid date on price CSV line {}", line_number + 1))?;
        let timestamp = parse_integer(fields[1], line_number, "timestamp")?;
        let usd_per_eth = parse_amount(fields[2], line_number, "usd_per_eth")?;

        if let Some(previous) = points.last() {
            if timestamp <= previous.timestamp {
                return Err(eyre!(
                    "price CSV timestamps must be strictly ascending, line {} has {} after {}",
                    line_number + 1,
                    timestamp,
                    previous.timestamp
                ));
            }
        }

        points.push(PricePoint {
            date,
            timestamp,
            usd_per_eth,
        });
    }

    Ok(points)
}

#[derive(Debug, Default, Deserialize)]
struct DecimalsEntry {
    #[serde(default)]
    decimals: Option<f64>,
}

/// Loads the per-token decimals table.
///
/// The JSON object is keyed by token address; entries without a `decimals`
/// field are omitted from the result (callers default them to 18).
///
/// # Errors
/// Returns error on read failure, invalid JSON, or a negative/non-finite
/// decimals value.
pub fn load_token_decimals_json(path: &Path) -> Result<HashMap<String, u32>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read token decimals {}", path.display()))?;

    let entries: HashMap<String, DecimalsEntry> = serde_json::from_str(&content)
        .wrap_err_with(|| format!("failed to parse token decimals {}", path.display()))?;

    let mut decimals = HashMap::with_capacity(entries.len());
    for (address, entry) in entries {
        if let Some(value) = entry.decimals {
            if !value.is_finite() || value < 0.0 {
                return Err(eyre!(
                    "invalid decimals value {} for token {}",
                    value,
                    address
                ));
            }
            decimals.insert(address, value as u32);
        }
    }

    Ok(decimals)
}

fn parse_integer(field: &str, line_number: usize, column: &str) -> Result<i64> {
    field
        .trim()
        .parse::<i64>()
        .wrap_err_with(|| format!("unparseable {} on line {}", column, line_number + 1))
}

fn parse_amount(field: &str, line_number: usize, column: &str) -> Result<f64> {
    let value = field
        .trim()
        .parse::<f64>()
        .wrap_err_with(|| format!("unparseable {} on line {}", column, line_number + 1))?;

    if value.is_nan() || value < 0.0 {
        return Err(eyre!(
            "{} on line {} is {}, amounts must be non-negative",
            column,
            line_number + 1,
            value
        ));
    }

    Ok(value)
}
