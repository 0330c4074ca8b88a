//! Analytics Functions
//!
//! Stateless calculations over price and volatility series: simple returns,
//! realized volatility, descriptive statistics and the least-squares solver
//! shared by the ADF test and the VAR fit.

pub mod primitives;
pub mod regression;
pub mod stats;
pub mod windows;

use crate::market_key::MarketKey;
use crate::time_series::MarketSeries;
use chrono::NaiveDate;
use primitives::{simple_returns, sum_of_squares};
use serde::{Deserialize, Serialize};
use windows::FixedWindow;

pub use regression::{least_squares, LeastSquaresFit, RegressionError};
pub use stats::{adf_statistic, DescriptiveStatistics};

/// Default trailing window for realized volatility (one trading month).
pub const DEFAULT_VOLATILITY_WINDOW: usize = 21;

/// Calculates realized volatility from a price series.
///
/// Uses the formula: sqrt(sum(r_i²)) over the trailing `window` simple
/// returns, where r_i = P_i / P_{i-1} - 1.
///
/// # Arguments
/// * `prices` - Slice of prices as f64 values
/// * `window` - Number of returns per window (W)
///
/// # Returns
/// `prices.len() - window` values; value `k` covers the returns ending at
/// price index `k + window`.
///
/// # Errors
/// `VolatilityError::InsufficientData` when `prices.len() <= window` or
/// `window == 0`.
///
/// # Examples
/// ```
/// use spillover::analytics::realized_volatility;
///
/// let prices = vec![100.0, 110.0, 121.0, 133.1];
/// let volatility = realized_volatility(&prices, 2).unwrap();
///
/// assert_eq!(volatility.len(), 2);
/// assert!((volatility[0] - (2.0f64 * 0.01).sqrt()).abs() < 1e-12);
/// ```
pub fn realized_volatility(prices: &[f64], window: usize) -> Result<Vec<f64>, VolatilityError> {
    if window == 0 || prices.len() <= window {
        return Err(VolatilityError::InsufficientData {
            len: prices.len(),
            window,
        });
    }

    // The first return is undefined and dropped before windowing
    let returns = simple_returns(prices);
    let volatility = FixedWindow::new(window)
        .apply_complete(&returns[1..], sum_of_squares)
        .into_iter()
        .map(f64::sqrt)
        .collect();

    Ok(volatility)
}

/// Realized volatility of one market, dated by the last price of each window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilitySeries {
    pub market: MarketKey,
    pub dates: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl VolatilitySeries {
    /// Computes the series from the adjusted closes of an aligned market.
    pub fn from_market_series(
        series: &MarketSeries,
        window: usize,
    ) -> Result<Self, VolatilityError> {
        let values = realized_volatility(&series.adjusted_closes(), window)?;
        let dates = series.dates().split_off(window);
        Ok(VolatilitySeries {
            market: series.market.clone(),
            dates,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Errors raised by the volatility extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolatilityError {
    /// The series has no more points than the window requires.
    InsufficientData { len: usize, window: usize },
}

impl std::fmt::Display for VolatilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolatilityError::InsufficientData { len, window } => write!(
                f,
                "Insufficient data: {} prices cannot fill a window of {}",
                len, window
            ),
        }
    }
}

impl std::error::Error for VolatilityError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_series::PriceBar;

    fn stepped_prices(len: usize, step: f64) -> Vec<f64> {
        (0..len).map(|i| 100.0 * (1.0 + step).powi(i as i32)).collect()
    }

    #[test]
    fn test_volatility_length_is_len_minus_window() {
        let prices = stepped_prices(60, 0.05);
        let volatility = realized_volatility(&prices, 21).unwrap();
        assert_eq!(volatility.len(), 39);
    }

    #[test]
    fn test_constant_step_gives_constant_volatility() {
        let prices = stepped_prices(60, 0.05);
        let volatility = realized_volatility(&prices, 21).unwrap();
        let expected = (21.0 * 0.05f64 * 0.05).sqrt();
        for value in volatility {
            assert!((value - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_volatility_uses_sum_not_mean() {
        let prices = vec![100.0, 110.0, 99.0];
        let volatility = realized_volatility(&prices, 2).unwrap();
        let expected = (0.1f64.powi(2) + 0.1f64.powi(2)).sqrt();
        assert_eq!(volatility.len(), 1);
        assert!((volatility[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_insufficient_data() {
        let prices = stepped_prices(21, 0.01);
        assert_eq!(
            realized_volatility(&prices, 21),
            Err(VolatilityError::InsufficientData { len: 21, window: 21 })
        );
        assert!(realized_volatility(&prices, 0).is_err());
        assert_eq!(realized_volatility(&stepped_prices(22, 0.01), 21).unwrap().len(), 1);
    }

    #[test]
    fn test_series_dates_align_with_window_end() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars: Vec<PriceBar> = stepped_prices(5, 0.02)
            .into_iter()
            .enumerate()
            .map(|(i, p)| PriceBar::flat(start + chrono::Duration::days(i as i64), p))
            .collect();
        let series = MarketSeries {
            market: MarketKey::new("^N225").unwrap(),
            bars,
        };

        let volatility = VolatilitySeries::from_market_series(&series, 3).unwrap();
        assert_eq!(volatility.len(), 2);
        assert_eq!(volatility.dates[0], start + chrono::Duration::days(3));
        assert_eq!(volatility.dates[1], start + chrono::Duration::days(4));
    }
}
