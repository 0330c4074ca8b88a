use crate::market_key::MarketKey;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

/// One daily bar: OHLC, adjusted close and volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Close adjusted for splits and dividends; the price used for volatility.
    pub adj_close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Creates a bar where every price field equals `price` (handy for synthetic data).
    pub fn flat(date: NaiveDate, price: f64) -> Self {
        PriceBar {
            date,
            open: price,
            high: price,
            low: price,
            close: price,
            adj_close: price,
            volume: 0.0,
        }
    }

    fn is_valid(&self) -> bool {
        self.adj_close.is_finite()
    }
}

/// Date range for querying time-series data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// Start date (inclusive)
    pub start: NaiveDate,
    /// End date (inclusive)
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a new DateRange.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// Creates a DateRange from a standard Range.
    pub fn from_range(range: Range<NaiveDate>) -> Self {
        DateRange {
            start: range.start,
            end: range.end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Every Monday-to-Friday date in the range, in order.
    pub fn business_days(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|date| *date <= self.end)
            .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
            .collect()
    }
}

/// Source of daily price history for a market.
///
/// Implementations:
/// - [`InMemoryDataProvider`] (tests, synthetic runs)
/// - `SqliteDataProvider` (local cache of downloads)
/// - `CsvDirectoryProvider` (per-ticker CSV artifacts)
pub trait DataProvider {
    /// Retrieves the bars for `market` whose date falls inside `date_range`.
    ///
    /// # Errors
    /// Returns an error if the market is unknown, the range is invalid, or the
    /// backing store cannot be read.
    fn get_price_history(
        &self,
        market: &MarketKey,
        date_range: &DateRange,
    ) -> Result<Vec<PriceBar>, DataProviderError>;
}

/// Errors that can occur when querying a data provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataProviderError {
    /// Market not found in the data source
    MarketNotFound(String),
    /// Invalid date range (e.g., start > end)
    InvalidDateRange,
    /// The market has no usable prices in the requested range
    EmptySeries(String),
    /// Generic error message
    Other(String),
}

impl std::fmt::Display for DataProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataProviderError::MarketNotFound(market) => write!(f, "Market not found: {}", market),
            DataProviderError::InvalidDateRange => write!(f, "Invalid date range"),
            DataProviderError::EmptySeries(market) => {
                write!(f, "No usable prices for {} in range", market)
            }
            DataProviderError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DataProviderError {}

/// In-memory data provider keyed by market.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataProvider {
    data: HashMap<MarketKey, Vec<PriceBar>>,
}

impl InMemoryDataProvider {
    pub fn new() -> Self {
        InMemoryDataProvider {
            data: HashMap::new(),
        }
    }

    /// Adds bars for a market, replacing anything stored before.
    pub fn add_data(&mut self, market: MarketKey, bars: Vec<PriceBar>) {
        self.data.insert(market, bars);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl DataProvider for InMemoryDataProvider {
    fn get_price_history(
        &self,
        market: &MarketKey,
        date_range: &DateRange,
    ) -> Result<Vec<PriceBar>, DataProviderError> {
        if date_range.start > date_range.end {
            return Err(DataProviderError::InvalidDateRange);
        }

        let bars = self
            .data
            .get(market)
            .ok_or_else(|| DataProviderError::MarketNotFound(market.to_string()))?;

        Ok(bars
            .iter()
            .filter(|bar| date_range.contains(bar.date))
            .cloned()
            .collect())
    }
}

/// A market's gap-free daily series on the business-day calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSeries {
    pub market: MarketKey,
    pub bars: Vec<PriceBar>,
}

impl MarketSeries {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|bar| bar.date).collect()
    }

    pub fn adjusted_closes(&self) -> Vec<f64> {
        self.bars.iter().map(|bar| bar.adj_close).collect()
    }
}

/// Result of reindexing one market onto the business-day calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeries {
    pub series: MarketSeries,
    /// Number of calendar slots that had no bar and were filled.
    pub filled_days: usize,
}

/// Reindexes `bars` onto every business day of `range`, forward-filling gaps
/// and then backward-filling any leading gap.
///
/// Bars outside the range, on weekends, or with a non-finite adjusted close
/// are ignored. Fails when no usable bar remains.
pub fn align_to_business_days(
    market: &MarketKey,
    bars: &[PriceBar],
    range: &DateRange,
) -> Result<AlignedSeries, DataProviderError> {
    if range.start > range.end {
        return Err(DataProviderError::InvalidDateRange);
    }

    let by_date: BTreeMap<NaiveDate, &PriceBar> = bars
        .iter()
        .filter(|bar| range.contains(bar.date) && bar.is_valid())
        .map(|bar| (bar.date, bar))
        .collect();

    let calendar = range.business_days();
    let mut slots: Vec<Option<PriceBar>> = calendar
        .iter()
        .map(|date| by_date.get(date).map(|bar| (*bar).clone()))
        .collect();

    let first_known = slots
        .iter()
        .position(Option::is_some)
        .ok_or_else(|| DataProviderError::EmptySeries(market.to_string()))?;

    let filled_days = slots.iter().filter(|slot| slot.is_none()).count();

    // Forward fill
    let mut last: Option<PriceBar> = None;
    for (slot, date) in slots.iter_mut().zip(calendar.iter()) {
        if let Some(bar) = slot.as_ref() {
            last = Some(bar.clone());
        } else if let Some(previous) = &last {
            *slot = Some(PriceBar {
                date: *date,
                ..previous.clone()
            });
        }
    }

    // Backward fill the leading gap
    let anchor = slots[first_known].clone();
    if let Some(anchor) = anchor {
        for (slot, date) in slots.iter_mut().zip(calendar.iter()).take(first_known) {
            *slot = Some(PriceBar {
                date: *date,
                ..anchor.clone()
            });
        }
    }

    let bars: Vec<PriceBar> = slots.into_iter().flatten().collect();

    Ok(AlignedSeries {
        series: MarketSeries {
            market: market.clone(),
            bars,
        },
        filled_days,
    })
}
