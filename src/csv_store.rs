//! Per-ticker CSV artifacts.
//!
//! One `<ticker>_stock_data.csv` file per market with the columns
//! `Date,Open,High,Low,Close,Adj Close,Volume`. The same layout is what the
//! Yahoo Finance download endpoint returns, so the parser is shared.

use crate::market_key::MarketKey;
use crate::time_series::{DataProvider, DataProviderError, DateRange, PriceBar};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct BarRecord {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open")]
    open: String,
    #[serde(rename = "High")]
    high: String,
    #[serde(rename = "Low")]
    low: String,
    #[serde(rename = "Close")]
    close: String,
    #[serde(rename = "Adj Close")]
    adj_close: String,
    #[serde(rename = "Volume")]
    volume: String,
}

impl BarRecord {
    fn from_bar(bar: &PriceBar) -> Self {
        BarRecord {
            date: bar.date.format("%Y-%m-%d").to_string(),
            open: bar.open.to_string(),
            high: bar.high.to_string(),
            low: bar.low.to_string(),
            close: bar.close.to_string(),
            adj_close: bar.adj_close.to_string(),
            volume: bar.volume.to_string(),
        }
    }

    /// Rows with a missing ("null") price are skipped rather than rejected.
    fn into_bar(self) -> Result<Option<PriceBar>, CsvStoreError> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|e| CsvStoreError::Parse(format!("bad date '{}': {}", self.date, e)))?;

        let fields = [
            &self.open,
            &self.high,
            &self.low,
            &self.close,
            &self.adj_close,
        ];
        let mut prices = [0.0; 5];
        for (slot, raw) in prices.iter_mut().zip(fields) {
            match parse_number(raw)? {
                Some(value) => *slot = value,
                None => return Ok(None),
            }
        }
        let volume = parse_number(&self.volume)?.unwrap_or(0.0);

        Ok(Some(PriceBar {
            date,
            open: prices[0],
            high: prices[1],
            low: prices[2],
            close: prices[3],
            adj_close: prices[4],
            volume,
        }))
    }
}

fn parse_number(raw: &str) -> Result<Option<f64>, CsvStoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") || trimmed == "NaN" {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|e| CsvStoreError::Parse(format!("bad number '{}': {}", raw, e)))
}

/// Parses daily bars from CSV text with a header row.
pub fn parse_price_csv<R: Read>(reader: R) -> Result<Vec<PriceBar>, CsvStoreError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut bars = Vec::new();
    for record in csv_reader.deserialize::<BarRecord>() {
        let record = record.map_err(|e| CsvStoreError::Parse(e.to_string()))?;
        if let Some(bar) = record.into_bar()? {
            bars.push(bar);
        }
    }
    bars.sort_by_key(|bar| bar.date);
    Ok(bars)
}

/// Writes daily bars as CSV with a header row.
pub fn write_price_csv<W: Write>(writer: W, bars: &[PriceBar]) -> Result<(), CsvStoreError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for bar in bars {
        csv_writer
            .serialize(BarRecord::from_bar(bar))
            .map_err(|e| CsvStoreError::Io(e.to_string()))?;
    }
    csv_writer
        .flush()
        .map_err(|e| CsvStoreError::Io(e.to_string()))?;
    Ok(())
}

/// Path of the CSV artifact for `market` inside `dir`.
pub fn artifact_path(dir: &Path, market: &MarketKey) -> PathBuf {
    dir.join(format!("{}_stock_data.csv", market.file_stem()))
}

/// Writes the artifact file for one market, creating `dir` if needed.
pub fn save_market_csv(
    dir: &Path,
    market: &MarketKey,
    bars: &[PriceBar],
) -> Result<PathBuf, CsvStoreError> {
    std::fs::create_dir_all(dir).map_err(|e| CsvStoreError::Io(e.to_string()))?;
    let path = artifact_path(dir, market);
    let file = std::fs::File::create(&path).map_err(|e| CsvStoreError::Io(e.to_string()))?;
    write_price_csv(file, bars)?;
    Ok(path)
}

/// Data provider backed by a directory of per-ticker CSV artifacts.
#[derive(Debug, Clone)]
pub struct CsvDirectoryProvider {
    dir: PathBuf,
}

impl CsvDirectoryProvider {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        CsvDirectoryProvider {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DataProvider for CsvDirectoryProvider {
    fn get_price_history(
        &self,
        market: &MarketKey,
        date_range: &DateRange,
    ) -> Result<Vec<PriceBar>, DataProviderError> {
        if date_range.start > date_range.end {
            return Err(DataProviderError::InvalidDateRange);
        }

        let path = artifact_path(&self.dir, market);
        if !path.exists() {
            return Err(DataProviderError::MarketNotFound(market.to_string()));
        }

        let file = std::fs::File::open(&path)
            .map_err(|e| DataProviderError::Other(format!("{}: {}", path.display(), e)))?;
        let bars = parse_price_csv(file)
            .map_err(|e| DataProviderError::Other(format!("{}: {}", path.display(), e)))?;

        Ok(bars
            .into_iter()
            .filter(|bar| date_range.contains(bar.date))
            .collect())
    }
}

/// Errors raised while reading or writing CSV artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvStoreError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for CsvStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CsvStoreError::Io(msg) => write!(f, "CSV I/O error: {}", msg),
            CsvStoreError::Parse(msg) => write!(f, "CSV parse error: {}", msg),
        }
    }
}

impl std::error::Error for CsvStoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Date,Open,High,Low,Close,Adj Close,Volume
2024-01-03,101,102,100,101.5,101.4,2000
2024-01-02,100,101,99,100.5,100.4,1000
2024-01-04,null,null,null,null,null,null
";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_sorts_and_skips_null_rows() {
        let bars = parse_price_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, date(2024, 1, 2));
        assert_eq!(bars[0].adj_close, 100.4);
        assert_eq!(bars[1].volume, 2000.0);
    }

    #[test]
    fn test_parse_rejects_bad_numbers() {
        let text = "Date,Open,High,Low,Close,Adj Close,Volume\n2024-01-02,abc,1,1,1,1,1\n";
        assert!(matches!(
            parse_price_csv(text.as_bytes()),
            Err(CsvStoreError::Parse(_))
        ));
    }

    #[test]
    fn test_write_then_read_header_layout() {
        let bars = vec![PriceBar::flat(date(2024, 1, 2), 42.0)];
        let mut buffer = Vec::new();
        write_price_csv(&mut buffer, &bars).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("Date,Open,High,Low,Close,Adj Close,Volume"));
        assert_eq!(parse_price_csv(text.as_bytes()).unwrap(), bars);
    }

    #[test]
    fn test_directory_provider_reads_artifacts() {
        let dir = std::env::temp_dir().join(format!("spillover-csv-{}", std::process::id()));
        let key = MarketKey::new("^FTSE").unwrap();
        let bars = vec![
            PriceBar::flat(date(2024, 1, 2), 10.0),
            PriceBar::flat(date(2024, 1, 3), 11.0),
        ];
        let path = save_market_csv(&dir, &key, &bars).unwrap();
        assert!(path.ends_with("FTSE_stock_data.csv"));

        let provider = CsvDirectoryProvider::new(&dir);
        let range = DateRange::new(date(2024, 1, 3), date(2024, 1, 31));
        let loaded = provider.get_price_history(&key, &range).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].adj_close, 11.0);

        let missing = MarketKey::new("^HSI").unwrap();
        assert!(matches!(
            provider.get_price_history(&missing, &range),
            Err(DataProviderError::MarketNotFound(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }
}
