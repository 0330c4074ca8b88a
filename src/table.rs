//! Aligned volatility table: rows are dates, columns are markets.
//!
//! Tables built from volatility series keep their columns sorted by ticker;
//! that column order is the node order every downstream stage (graphs,
//! tensors, reports) uses.

use crate::analytics::VolatilitySeries;
use crate::market_key::MarketKey;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Error types for table construction and splitting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// No markets or no rows
    Empty,
    /// A column does not have one value per date
    LengthMismatch {
        market: String,
        expected: usize,
        found: usize,
    },
    /// Too few rows to produce non-empty splits
    InsufficientRows { rows: usize, required: usize },
    /// The same market appears twice
    DuplicateMarket(String),
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Empty => write!(f, "Volatility table is empty"),
            TableError::LengthMismatch {
                market,
                expected,
                found,
            } => write!(
                f,
                "Column {} has {} values but the table has {} dates",
                market, found, expected
            ),
            TableError::InsufficientRows { rows, required } => write!(
                f,
                "Table has {} rows, at least {} are required",
                rows, required
            ),
            TableError::DuplicateMarket(market) => write!(f, "Duplicate market: {}", market),
        }
    }
}

impl std::error::Error for TableError {}

/// Volatility values of several markets on a shared date index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityTable {
    dates: Vec<NaiveDate>,
    markets: Vec<MarketKey>,
    /// One column per market, `columns[m][t]`.
    columns: Vec<Vec<f64>>,
}

impl VolatilityTable {
    /// Builds a table from explicit columns.
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        markets: Vec<MarketKey>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self, TableError> {
        if markets.is_empty() {
            return Err(TableError::Empty);
        }
        if markets.len() != columns.len() {
            return Err(TableError::LengthMismatch {
                market: "<columns>".to_string(),
                expected: markets.len(),
                found: columns.len(),
            });
        }

        let mut seen = BTreeSet::new();
        for (market, column) in markets.iter().zip(&columns) {
            if !seen.insert(market.clone()) {
                return Err(TableError::DuplicateMarket(market.to_string()));
            }
            if column.len() != dates.len() {
                return Err(TableError::LengthMismatch {
                    market: market.to_string(),
                    expected: dates.len(),
                    found: column.len(),
                });
            }
        }

        Ok(VolatilityTable {
            dates,
            markets,
            columns,
        })
    }

    /// Outer-joins the series on their dates (missing cells are NaN) and
    /// drops every row that has a missing value. Columns are sorted by ticker.
    pub fn from_series(series: &[VolatilitySeries]) -> Result<Self, TableError> {
        if series.is_empty() {
            return Err(TableError::Empty);
        }
        let mut series: Vec<&VolatilitySeries> = series.iter().collect();
        series.sort_by(|a, b| a.market.cmp(&b.market));

        let dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|s| s.dates.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = Vec::with_capacity(series.len());
        for s in &series {
            if s.dates.len() != s.values.len() {
                return Err(TableError::LengthMismatch {
                    market: s.market.to_string(),
                    expected: s.dates.len(),
                    found: s.values.len(),
                });
            }
            let by_date: BTreeMap<NaiveDate, f64> =
                s.dates.iter().copied().zip(s.values.iter().copied()).collect();
            columns.push(
                dates
                    .iter()
                    .map(|date| by_date.get(date).copied().unwrap_or(f64::NAN))
                    .collect(),
            );
        }

        let markets = series.iter().map(|s| s.market.clone()).collect();
        let table = Self::from_columns(dates, markets, columns)?.drop_missing_rows();
        if table.n_rows() == 0 {
            return Err(TableError::Empty);
        }
        Ok(table)
    }

    /// Returns a copy without any row containing a non-finite value.
    pub fn drop_missing_rows(&self) -> Self {
        let keep: Vec<usize> = (0..self.n_rows())
            .filter(|&t| self.columns.iter().all(|column| column[t].is_finite()))
            .collect();
        self.select_rows(&keep)
    }

    fn select_rows(&self, rows: &[usize]) -> Self {
        VolatilityTable {
            dates: rows.iter().map(|&t| self.dates[t]).collect(),
            markets: self.markets.clone(),
            columns: self
                .columns
                .iter()
                .map(|column| rows.iter().map(|&t| column[t]).collect())
                .collect(),
        }
    }

    /// Contiguous rows `start..end`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.n_rows());
        let start = start.min(end);
        VolatilityTable {
            dates: self.dates[start..end].to_vec(),
            markets: self.markets.clone(),
            columns: self
                .columns
                .iter()
                .map(|column| column[start..end].to_vec())
                .collect(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn n_markets(&self) -> usize {
        self.markets.len()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn markets(&self) -> &[MarketKey] {
        &self.markets
    }

    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    pub fn column_at(&self, index: usize) -> Option<&[f64]> {
        self.columns.get(index).map(Vec::as_slice)
    }

    pub fn column(&self, market: &MarketKey) -> Option<&[f64]> {
        self.markets
            .iter()
            .position(|m| m == market)
            .and_then(|index| self.column_at(index))
    }

    /// Values of every market at row `t`, in column order.
    pub fn row(&self, t: usize) -> Vec<f64> {
        self.columns.iter().map(|column| column[t]).collect()
    }

    /// Chronological train / validation / test split.
    pub fn split(&self, config: &SplitConfig) -> Result<TableSplit, TableError> {
        let (train_rows, validation_rows, test_rows) = config.sizes(self.n_rows());
        if train_rows == 0 || validation_rows == 0 || test_rows == 0 {
            return Err(TableError::InsufficientRows {
                rows: self.n_rows(),
                required: 3,
            });
        }

        let validation_end = train_rows + validation_rows;
        Ok(TableSplit {
            train: self.slice_rows(0, train_rows),
            validation: self.slice_rows(train_rows, validation_end),
            test: self.slice_rows(validation_end, self.n_rows()),
        })
    }
}

/// How rows are divided between training and the two held-out splits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Share of rows used for training.
    pub train_fraction: f64,
    /// Share of the held-out rows assigned to the test split; the rest
    /// is validation.
    pub test_fraction_of_holdout: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            train_fraction: 0.5,
            test_fraction_of_holdout: 0.6,
        }
    }
}

impl SplitConfig {
    /// Row counts `(train, validation, test)` for a table of `rows` rows.
    ///
    /// Held-out parts are rounded up, training gets the remainder.
    pub fn sizes(&self, rows: usize) -> (usize, usize, usize) {
        let holdout = ceil_share(1.0 - self.train_fraction, rows);
        let test = ceil_share(self.test_fraction_of_holdout, holdout);
        (rows - holdout, holdout - test, test)
    }
}

fn ceil_share(fraction: f64, rows: usize) -> usize {
    let share = (fraction.clamp(0.0, 1.0) * rows as f64).ceil() as usize;
    share.min(rows)
}

/// The three chronological pieces of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSplit {
    pub train: VolatilityTable,
    pub validation: VolatilityTable,
    pub test: VolatilityTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn key(ticker: &str) -> MarketKey {
        MarketKey::new(ticker).unwrap()
    }

    #[test]
    fn test_from_series_drops_unaligned_rows() {
        let a = VolatilitySeries {
            market: key("^GSPC"),
            dates: vec![date(1), date(2), date(3)],
            values: vec![0.1, 0.2, 0.3],
        };
        let b = VolatilitySeries {
            market: key("^FTSE"),
            dates: vec![date(2), date(3), date(4)],
            values: vec![1.2, f64::NAN, 1.4],
        };

        let table = VolatilityTable::from_series(&[a, b]).unwrap();
        assert_eq!(table.dates(), &[date(2)]);
        assert_eq!(table.markets(), &[key("^FTSE"), key("^GSPC")]);
        assert_eq!(table.row(0), vec![1.2, 0.2]);
        assert_eq!(table.column(&key("^FTSE")), Some(&[1.2][..]));
    }

    #[test]
    fn test_from_columns_validates_shape() {
        let result = VolatilityTable::from_columns(
            vec![date(1), date(2)],
            vec![key("^HSI")],
            vec![vec![1.0]],
        );
        assert!(matches!(result, Err(TableError::LengthMismatch { .. })));

        let duplicate = VolatilityTable::from_columns(
            vec![date(1)],
            vec![key("^HSI"), key("^HSI")],
            vec![vec![1.0], vec![2.0]],
        );
        assert_eq!(
            duplicate.unwrap_err(),
            TableError::DuplicateMarket("^HSI".to_string())
        );
        assert_eq!(
            VolatilityTable::from_series(&[]).unwrap_err(),
            TableError::Empty
        );
    }

    #[test]
    fn test_split_sizes_round_holdout_up() {
        let config = SplitConfig::default();
        assert_eq!(config.sizes(100), (50, 20, 30));
        assert_eq!(config.sizes(39), (19, 8, 12));
        assert_eq!(config.sizes(3), (1, 0, 2));
    }

    #[test]
    fn test_split_is_chronological() {
        let dates: Vec<NaiveDate> = (1..=10).map(date).collect();
        let values: Vec<f64> = (0..10).map(|v| v as f64).collect();
        let table =
            VolatilityTable::from_columns(dates, vec![key("^KS11")], vec![values]).unwrap();

        let split = table.split(&SplitConfig::default()).unwrap();
        assert_eq!(split.train.column_at(0).unwrap(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(split.validation.column_at(0).unwrap(), &[5.0, 6.0]);
        assert_eq!(split.test.column_at(0).unwrap(), &[7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_split_rejects_tiny_tables() {
        let table = VolatilityTable::from_columns(
            vec![date(1), date(2), date(3)],
            vec![key("^NSEI")],
            vec![vec![1.0, 2.0, 3.0]],
        )
        .unwrap();
        assert_eq!(
            table.split(&SplitConfig::default()).unwrap_err(),
            TableError::InsufficientRows {
                rows: 3,
                required: 3
            }
        );
    }
}
