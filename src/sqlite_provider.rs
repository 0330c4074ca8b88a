use crate::market_key::MarketKey;
use crate::time_series::{DataProvider, DataProviderError, DateRange, PriceBar};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::path::Path;

/// SQLite-based cache of downloaded daily bars.
///
/// Automatically creates schema on first use. Markets are registered when
/// their bars are first stored, so an empty query for a known market
/// returns an empty series while an unknown market is an error.
#[derive(Debug)]
pub struct SqliteDataProvider {
    conn: Connection,
}

impl SqliteDataProvider {
    /// Opens (or creates) a file-based cache.
    ///
    /// # Errors
    /// Returns an error if the database connection cannot be established.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;
        let provider = SqliteDataProvider { conn };
        provider.ensure_schema()?;
        Ok(provider)
    }

    /// Creates an in-memory cache. Useful for testing.
    pub fn new_in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let provider = SqliteDataProvider { conn };
        provider.ensure_schema()?;
        Ok(provider)
    }

    fn ensure_schema(&self) -> SqliteResult<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS markets (
                market TEXT PRIMARY KEY
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS price_bars (
                market TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                adj_close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (market, date)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_price_bars_market ON price_bars(market)",
            [],
        )?;

        Ok(())
    }

    fn table_exists(&self, table_name: &str) -> SqliteResult<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
        let exists = stmt.exists([table_name])?;
        Ok(exists)
    }

    /// Stores bars for a market in one transaction, replacing rows with the same date.
    ///
    /// # Returns
    /// The number of bars written.
    pub fn insert_bars(&mut self, market: &MarketKey, bars: &[PriceBar]) -> SqliteResult<usize> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO markets (market) VALUES (?1)",
            [market.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO price_bars
                 (market, date, open, high, low, close, adj_close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for bar in bars {
                stmt.execute(params![
                    market.as_str(),
                    bar.date.format("%Y-%m-%d").to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.adj_close,
                    bar.volume,
                ])?;
            }
        }
        tx.commit()?;
        Ok(bars.len())
    }

    /// Lists every market that has been stored, in ticker order.
    pub fn markets(&self) -> SqliteResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT market FROM markets ORDER BY market")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let markets = rows.collect::<SqliteResult<Vec<String>>>()?;
        Ok(markets)
    }

    fn market_exists(&self, market: &MarketKey) -> SqliteResult<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM markets WHERE market = ?1 LIMIT 1")?;
        let exists = stmt.exists([market.as_str()])?;
        Ok(exists)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl DataProvider for SqliteDataProvider {
    fn get_price_history(
        &self,
        market: &MarketKey,
        date_range: &DateRange,
    ) -> Result<Vec<PriceBar>, DataProviderError> {
        if date_range.start > date_range.end {
            return Err(DataProviderError::InvalidDateRange);
        }

        let sql_error = |e: rusqlite::Error| DataProviderError::Other(format!("SQL error: {}", e));

        if !self.market_exists(market).map_err(sql_error)? {
            return Err(DataProviderError::MarketNotFound(market.to_string()));
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT date, open, high, low, close, adj_close, volume FROM price_bars
                 WHERE market = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date",
            )
            .map_err(sql_error)?;

        let rows = stmt
            .query_map(
                params![
                    market.as_str(),
                    date_range.start.format("%Y-%m-%d").to_string(),
                    date_range.end.format("%Y-%m-%d").to_string(),
                ],
                |row| {
                    let date_str: String = row.get(0)?;
                    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
                        rusqlite::Error::InvalidColumnType(
                            0,
                            format!("Invalid date: {}", e),
                            rusqlite::types::Type::Text,
                        )
                    })?;
                    Ok(PriceBar {
                        date,
                        open: row.get(1)?,
                        high: row.get(2)?,
                        low: row.get(3)?,
                        close: row.get(4)?,
                        adj_close: row.get(5)?,
                        volume: row.get(6)?,
                    })
                },
            )
            .map_err(sql_error)?;

        let mut bars = Vec::new();
        for row_result in rows {
            match row_result {
                Ok(bar) => bars.push(bar),
                Err(e) => {
                    return Err(DataProviderError::Other(format!("Row parsing error: {}", e)))
                }
            }
        }

        Ok(bars)
    }
}
