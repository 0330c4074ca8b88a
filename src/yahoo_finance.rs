//! Daily index history from the Yahoo Finance chart API.
//!
//! The chart endpoint answers with JSON holding parallel arrays (timestamps,
//! OHLC, volume, adjusted close). Every market is requested exactly once; a
//! failure is recorded for that market and the batch moves on.

use crate::market_key::MarketKey;
use crate::sqlite_provider::SqliteDataProvider;
use crate::time_series::{DateRange, PriceBar};
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Requests per second across the batch (default: 1.0)
    pub requests_per_second: f64,
    /// Per-request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
    /// Chart endpoint, without the trailing symbol
    pub base_url: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        DownloaderConfig {
            requests_per_second: 1.0,
            timeout_seconds: 30,
            base_url: CHART_URL.to_string(),
        }
    }
}

/// Per-market outcome of a batch download.
#[derive(Debug, Clone, Default)]
pub struct DownloadResult {
    /// Ticker -> number of bars stored
    pub successful: BTreeMap<String, usize>,
    /// Ticker -> error message
    pub failed: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartFault>,
}

#[derive(Debug, Deserialize)]
struct ChartFault {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Converts a chart API response body into daily bars.
///
/// Days with a missing price are skipped, a missing volume counts as zero
/// and a missing adjusted-close series falls back to the close. Bars are
/// dated in the exchange's local time.
///
/// # Errors
/// `DownloadError::Decode` for malformed JSON and `DownloadError::Api` when
/// the response carries an error or no result.
pub fn parse_chart_json(body: &str) -> Result<Vec<PriceBar>, DownloadError> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).map_err(|e| DownloadError::Decode(e.to_string()))?;
    bars_from_chart(envelope.chart)
}

fn bars_from_chart(chart: Chart) -> Result<Vec<PriceBar>, DownloadError> {
    if let Some(fault) = chart.error {
        return Err(DownloadError::Api(format!("{}: {}", fault.code, fault.description)));
    }
    let result = chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| DownloadError::Api("empty chart result".to_string()))?;

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjusted = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .unwrap_or_default();
    let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        let Some(date) = DateTime::from_timestamp(timestamp + result.meta.gmtoffset, 0)
            .map(|moment| moment.date_naive())
        else {
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            at(&quote.open, i),
            at(&quote.high, i),
            at(&quote.low, i),
            at(&quote.close, i),
        ) else {
            continue;
        };
        bars.push(PriceBar {
            date,
            open,
            high,
            low,
            close,
            adj_close: at(&adjusted, i).unwrap_or(close),
            volume: at(&quote.volume, i).unwrap_or(0.0),
        });
    }
    Ok(bars)
}

fn unix_bounds(range: &DateRange) -> Result<(i64, i64), DownloadError> {
    let seconds = |date: NaiveDate, h, m, s| {
        date.and_hms_opt(h, m, s)
            .map(|moment| moment.and_utc().timestamp())
            .ok_or_else(|| DownloadError::InvalidDate(date.to_string()))
    };
    Ok((seconds(range.start, 0, 0, 0)?, seconds(range.end, 23, 59, 59)?))
}

/// Yahoo Finance daily history downloader; no retries.
#[derive(Debug)]
pub struct YahooFinanceDownloader {
    client: Client,
    config: DownloaderConfig,
}

impl YahooFinanceDownloader {
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_config(DownloaderConfig::default())
    }

    /// # Errors
    /// Returns an error if HTTP client creation fails.
    pub fn with_config(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| DownloadError::ClientCreation(e.to_string()))?;
        Ok(YahooFinanceDownloader { client, config })
    }

    /// Path-safe symbol for a ticker ("^GSPC" -> "%5EGSPC").
    pub fn market_to_symbol(&self, market: &MarketKey) -> String {
        market.as_str().replace('^', "%5E")
    }

    /// Chart request URL for one market and date range.
    pub fn chart_url(&self, market: &MarketKey, range: &DateRange) -> Result<String, DownloadError> {
        let (period1, period2) = unix_bounds(range)?;
        Ok(format!(
            "{}/{}?period1={}&period2={}&interval=1d&events=history&includeAdjustedClose=true",
            self.config.base_url.trim_end_matches('/'),
            self.market_to_symbol(market),
            period1,
            period2
        ))
    }

    /// Downloads the daily bars of one market.
    ///
    /// # Errors
    /// `Network` when the request fails, `Http` for a non-success status,
    /// `Decode`/`Api` for an unusable body and `Api` when no bar survives.
    pub async fn download_market(
        &self,
        market: &MarketKey,
        range: &DateRange,
    ) -> Result<Vec<PriceBar>, DownloadError> {
        let url = self.chart_url(market, range)?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let envelope: ChartEnvelope = response
            .json()
            .await
            .map_err(|e| DownloadError::Decode(e.to_string()))?;
        let bars: Vec<PriceBar> = bars_from_chart(envelope.chart)?
            .into_iter()
            .filter(|bar| range.contains(bar.date))
            .collect();
        if bars.is_empty() {
            return Err(DownloadError::Api(format!("no bars returned for {}", market)));
        }
        Ok(bars)
    }

    /// Downloads every market in order into the SQLite cache, pacing requests
    /// by `requests_per_second`.
    pub async fn download_multiple_to_sqlite(
        &self,
        provider: &mut SqliteDataProvider,
        markets: &[MarketKey],
        range: &DateRange,
    ) -> DownloadResult {
        let mut result = DownloadResult::default();
        let pause = if self.config.requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.config.requests_per_second)
        } else {
            Duration::ZERO
        };

        for (index, market) in markets.iter().enumerate() {
            if index > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            let stored = match self.download_market(market, range).await {
                Ok(bars) => provider
                    .insert_bars(market, &bars)
                    .map_err(|e| DownloadError::Storage(e.to_string())),
                Err(e) => Err(e),
            };

            match stored {
                Ok(count) => {
                    log::info!("Downloaded {} bars for {}", count, market);
                    result.successful.insert(market.to_string(), count);
                }
                Err(e) => {
                    log::warn!("Error fetching data for {}: {}", market, e);
                    result.failed.insert(market.to_string(), e.to_string());
                }
            }
        }

        result
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }
}

/// Errors that can occur during Yahoo Finance data downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    ClientCreation(String),
    Network(String),
    /// Non-success HTTP status
    Http { status: u16, reason: String },
    /// Body is not a chart response
    Decode(String),
    /// Chart response reports an error or holds no data
    Api(String),
    InvalidDate(String),
    /// Bars could not be written to the cache
    Storage(String),
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadError::ClientCreation(msg) => write!(f, "Client creation error: {}", msg),
            DownloadError::Network(msg) => write!(f, "Network error: {}", msg),
            DownloadError::Http { status, reason } => write!(f, "HTTP {}: {}", status, reason),
            DownloadError::Decode(msg) => write!(f, "Decode error: {}", msg),
            DownloadError::Api(msg) => write!(f, "API error: {}", msg),
            DownloadError::InvalidDate(msg) => write!(f, "Invalid date: {}", msg),
            DownloadError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for DownloadError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_series::DataProvider;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": { "symbol": "^N225", "gmtoffset": 32400 },
                "timestamp": [1704240000, 1704326400, 1704412800],
                "indicators": {
                    "quote": [{
                        "open":   [33000.0, null, 33300.0],
                        "high":   [33200.0, 33400.0, 33500.0],
                        "low":    [32900.0, 33100.0, 33200.0],
                        "close":  [33100.0, 33300.0, 33400.0],
                        "volume": [1000, 1200, null]
                    }],
                    "adjclose": [{ "adjclose": [33100.0, 33300.0, 33399.5] }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart_skips_incomplete_days() {
        let bars = parse_chart_json(SAMPLE).unwrap();
        assert_eq!(bars.len(), 2);
        // 2024-01-03 00:00 UTC is 09:00 in Tokyo
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(bars[0].volume, 1000.0);
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(bars[1].adj_close, 33399.5);
        assert_eq!(bars[1].volume, 0.0);
    }

    #[test]
    fn test_parse_chart_reports_api_errors() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(matches!(parse_chart_json(body), Err(DownloadError::Api(msg)) if msg.contains("delisted")));
        assert!(matches!(parse_chart_json("<html>"), Err(DownloadError::Decode(_))));
    }

    #[test]
    fn test_chart_url_encodes_caret_and_bounds() {
        let downloader = YahooFinanceDownloader::with_config(DownloaderConfig {
            base_url: "http://localhost/chart/".to_string(),
            ..DownloaderConfig::default()
        })
        .unwrap();
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        let url = downloader
            .chart_url(&MarketKey::new("^GSPC").unwrap(), &range)
            .unwrap();
        assert_eq!(
            url,
            "http://localhost/chart/%5EGSPC?period1=1704067200&period2=1704153599&interval=1d&events=history&includeAdjustedClose=true"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_drops_market() {
        let downloader = YahooFinanceDownloader::with_config(DownloaderConfig {
            requests_per_second: 0.0,
            timeout_seconds: 2,
            base_url: "http://127.0.0.1:9".to_string(),
        })
        .unwrap();
        let mut provider = SqliteDataProvider::new_in_memory().unwrap();
        let markets = vec![MarketKey::new("^GSPC").unwrap(), MarketKey::new("^HSI").unwrap()];
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );

        let result = downloader
            .download_multiple_to_sqlite(&mut provider, &markets, &range)
            .await;
        assert!(result.successful.is_empty());
        assert_eq!(result.failed.len(), 2);
        assert!(provider.get_price_history(&markets[0], &range).is_err());
    }
}
