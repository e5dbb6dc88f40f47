//! SQLite storage layer for detection results.
//!
//! Uses WAL mode for concurrent read performance and prepared statements
//! for batch insert throughput. One database holds the labeled trade table,
//! the SCC catalog with member sets, and the per-window wash assignments.

use eyre::Result;
use rusqlite::Connection;

use crate::registry::{TokenRegistry, TraderRegistry};
use crate::types::TradeTable;

/// One labeled trade row as read back from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledTradeRow {
    /// Transaction hash.
    pub tx_id: String,
    /// Trade timestamp in unix seconds.
    pub timestamp: i64,
    /// Token address.
    pub token: String,
    /// Trader ID of the ETH-paying side.
    pub eth_buyer_id: u32,
    /// Trader ID of the ETH-receiving side.
    pub eth_seller_id: u32,
    /// Trade size in ETH.
    pub amount_eth: f64,
    /// Trade size in token units.
    pub amount_token: f64,
    /// Trade size in USD.
    pub amount_usd: f64,
    /// Wash-trade label.
    pub wash_label: bool,
}

/// Store row for one SCC catalog entry.
pub type SccCatalogRow = (String, u64, usize, bool);

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS traders (
                trader_id INTEGER PRIMARY KEY,
                address TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trades (
                tx_id TEXT PRIMARY KEY,
                timestamp INTEGER,
                token TEXT,
                eth_buyer_id INTEGER,
                eth_seller_id INTEGER,
                amount_eth REAL,
                amount_token REAL,
                amount_usd REAL,
                wash_label INTEGER
            );

            CREATE TABLE IF NOT EXISTS scc_catalog (
                scc_hash TEXT PRIMARY KEY,
                occurrence INTEGER,
                num_traders INTEGER,
                relevant INTEGER
            );

            CREATE TABLE IF NOT EXISTS scc_members (
                scc_hash TEXT PRIMARY KEY,
                member_ids TEXT
            );

            CREATE TABLE IF NOT EXISTS wash_windows (
                scc_hash TEXT,
                window_size INTEGER,
                tx_ids TEXT,
                PRIMARY KEY (scc_hash, window_size)
            );
            ",
        )?;
        Ok(())
    }

    /// Inserts the trader registry. Replaces on conflict.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn insert_traders(&mut self, registry: &TraderRegistry) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO traders (trader_id, address) VALUES (?1, ?2)",
            )?;
            for (id, address) in registry.iter() {
                inserted += stmt.execute((id, address))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Inserts the canonical trade table with its wash labels.
    ///
    /// `labels` must be indexed by table row.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn insert_trades(
        &mut self,
        table: &TradeTable,
        tokens: &TokenRegistry,
        labels: &[bool],
    ) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO trades
                 (tx_id, timestamp, token, eth_buyer_id, eth_seller_id,
                  amount_eth, amount_token, amount_usd, wash_label)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for row in 0..table.len() {
                let token = tokens.address(table.token_id[row]).unwrap_or_default();
                let label = labels.get(row).copied().unwrap_or(false);
                inserted += stmt.execute((
                    &table.tx_id[row],
                    table.timestamp[row],
                    token,
                    table.buyer_id[row],
                    table.seller_id[row],
                    table.amount_eth[row],
                    table.amount_token[row],
                    table.amount_usd[row],
                    label as i64,
                ))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Inserts SCC catalog rows: `(scc_hash, occurrence, num_traders, relevant)`.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn insert_scc_catalog(&mut self, rows: &[SccCatalogRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO scc_catalog
                 (scc_hash, occurrence, num_traders, relevant)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (hash, occurrence, num_traders, relevant) in rows {
                inserted += stmt.execute((
                    hash,
                    *occurrence,
                    *num_traders as i64,
                    *relevant as i64,
                ))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Inserts member sets: `(scc_hash, comma-joined sorted trader IDs)`.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn insert_scc_members(&mut self, rows: &[(String, String)]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO scc_members (scc_hash, member_ids) VALUES (?1, ?2)",
            )?;
            for (hash, member_ids) in rows {
                inserted += stmt.execute((hash, member_ids))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Inserts window assignments: `(scc_hash, window_size, JSON tx-ID list)`.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn insert_wash_windows(&mut self, rows: &[(String, i64, String)]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO wash_windows (scc_hash, window_size, tx_ids)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (hash, window_size, tx_ids) in rows {
                inserted += stmt.execute((hash, *window_size, tx_ids))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Total and wash-labeled trade counts.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn trade_counts(&self) -> Result<(u64, u64)> {
        let total: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        let labeled: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trades WHERE wash_label = 1",
            [],
            |row| row.get(0),
        )?;
        Ok((total, labeled))
    }

    /// Number of registered traders.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn trader_count(&self) -> Result<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM traders", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Total and relevant SCC counts.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn scc_counts(&self) -> Result<(u64, u64)> {
        let total: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM scc_catalog", [], |row| row.get(0))?;
        let relevant: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM scc_catalog WHERE relevant = 1",
            [],
            |row| row.get(0),
        )?;
        Ok((total, relevant))
    }

    /// All trades in timestamp order.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn labeled_trades(&self) -> Result<Vec<LabeledTradeRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT tx_id, timestamp, token, eth_buyer_id, eth_seller_id,
                    amount_eth, amount_token, amount_usd, wash_label
             FROM trades ORDER BY timestamp, tx_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LabeledTradeRow {
                    tx_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    token: row.get(2)?,
                    eth_buyer_id: row.get(3)?,
                    eth_seller_id: row.get(4)?,
                    amount_eth: row.get(5)?,
                    amount_token: row.get(6)?,
                    amount_usd: row.get(7)?,
                    wash_label: row.get::<_, i64>(8)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// SCC catalog rows sorted by occurrence descending, hash ascending.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn scc_catalog(&self) -> Result<Vec<SccCatalogRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT scc_hash, occurrence, num_traders, relevant
             FROM scc_catalog ORDER BY occurrence DESC, scc_hash ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, i64>(2)? as usize,
                    row.get::<_, i64>(3)? != 0,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Window assignments as stored: `(scc_hash, window_size, JSON tx-ID list)`.
    ///
    /// # Errors
    /// Returns error on SQLite failure.
    pub fn wash_windows(&self) -> Result<Vec<(String, i64, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT scc_hash, window_size, tx_ids
             FROM wash_windows ORDER BY scc_hash, window_size",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Member addresses for every relevant SCC, sorted ascending, keyed by
    /// fingerprint.
    ///
    /// # Errors
    /// Returns error on SQLite failure or an unparseable member list.
    pub fn relevant_member_addresses(&self) -> Result<Vec<(String, Vec<String>)>> {
        let mut address_by_id: std::collections::HashMap<u32, String> =
            std::collections::HashMap::new();
        {
            let mut stmt = self.conn.prepare("SELECT trader_id, address FROM traders")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, address) = row?;
                address_by_id.insert(id, address);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT m.scc_hash, m.member_ids
             FROM scc_members m
             JOIN scc_catalog c ON c.scc_hash = m.scc_hash
             WHERE c.relevant = 1
             ORDER BY m.scc_hash",
        )?;
        let member_rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut clusters = Vec::with_capacity(member_rows.len());
        for (hash, member_ids) in member_rows {
            let mut addresses: Vec<String> = Vec::new();
            for id_text in member_ids.split(',').filter(|s| !s.is_empty()) {
                let id: u32 = id_text
                    .parse()
                    .map_err(|_| eyre::eyre!("corrupt member list for SCC {}", hash))?;
                if let Some(address) = address_by_id.get(&id) {
                    addresses.push(address.clone());
                }
            }
            addresses.sort();
            clusters.push((hash, addresses));
        }
        Ok(clusters)
    }

    /// Database file size in bytes, if backed by a file.
    pub fn file_size(path: &str) -> Option<u64> {
        std::fs::metadata(path).ok().map(|meta| meta.len())
    }
}
