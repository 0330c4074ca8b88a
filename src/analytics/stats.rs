//! Descriptive statistics of a volatility series.

use super::primitives::{central_moment, is_effectively_constant, mean, sample_std_dev};
use super::regression::{least_squares, RegressionError};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Summary reported for every market before modelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStatistics {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (`n - 1`).
    pub std_dev: f64,
    /// Biased (population) skewness.
    pub skewness: f64,
    /// Pearson kurtosis; 3.0 for a normal distribution.
    pub kurtosis: f64,
    /// Augmented Dickey-Fuller t-statistic, `None` when the test regression
    /// cannot be fitted (e.g. a constant series).
    pub adf_statistic: Option<f64>,
}

impl DescriptiveStatistics {
    /// Computes the summary; moments are NaN when the series is too short or constant.
    pub fn compute(values: &[f64], adf_lags: usize) -> Self {
        let second = central_moment(values, 2);
        let (skewness, kurtosis) = if second > 0.0 && !is_effectively_constant(values) {
            (
                central_moment(values, 3) / second.powf(1.5),
                central_moment(values, 4) / (second * second),
            )
        } else {
            (f64::NAN, f64::NAN)
        };

        DescriptiveStatistics {
            count: values.len(),
            mean: mean(values),
            std_dev: sample_std_dev(values),
            skewness,
            kurtosis,
            adf_statistic: adf_statistic(values, adf_lags).ok(),
        }
    }
}

/// Augmented Dickey-Fuller t-statistic with a constant term.
///
/// Regresses `dy_t` on `1, y_{t-1}, dy_{t-1}, ..., dy_{t-lags}` and returns the
/// t-ratio of the `y_{t-1}` coefficient. More negative values reject a unit root.
pub fn adf_statistic(values: &[f64], lags: usize) -> Result<f64, RegressionError> {
    let diffs: Vec<f64> = values.windows(2).map(|pair| pair[1] - pair[0]).collect();
    if diffs.len() <= lags {
        return Err(RegressionError::Underdetermined {
            observations: diffs.len().saturating_sub(lags),
            regressors: lags + 2,
        });
    }

    let rows = diffs.len() - lags;
    let columns = lags + 2;
    let mut x = DMatrix::zeros(rows, columns);
    let mut y = DMatrix::zeros(rows, 1);

    for row in 0..rows {
        let t = row + lags;
        y[(row, 0)] = diffs[t];
        x[(row, 0)] = 1.0;
        x[(row, 1)] = values[t];
        for lag in 1..=lags {
            x[(row, 1 + lag)] = diffs[t - lag];
        }
    }

    let fit = least_squares(&x, &y)?;
    let degrees_of_freedom = (fit.observations() - fit.regressors()) as f64;
    let sigma_squared = fit.residual_sum_of_squares(0) / degrees_of_freedom;
    let standard_error = (sigma_squared * fit.xtx_inverse[(1, 1)]).sqrt();
    if standard_error <= 0.0 || !standard_error.is_finite() {
        return Err(RegressionError::Singular);
    }

    Ok(fit.coefficients[(1, 0)] / standard_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn symmetric_sample_has_zero_skew() {
        let stats = DescriptiveStatistics::compute(&[1.0, 2.0, 3.0, 4.0, 5.0], 0);
        assert_eq!(stats.count, 5);
        assert!((stats.mean - 3.0).abs() < 1e-12);
        assert!(stats.skewness.abs() < 1e-12);
        // m4 / m2^2 = 6.8 / 4
        assert!((stats.kurtosis - 1.7).abs() < 1e-12);
    }

    #[test]
    fn constant_series_has_undefined_shape() {
        let stats = DescriptiveStatistics::compute(&[2.0; 10], 1);
        assert!(stats.skewness.is_nan());
        assert!(stats.kurtosis.is_nan());
        assert_eq!(stats.std_dev, 0.0);
        assert!(stats.adf_statistic.is_none());
    }

    #[test]
    fn mean_reverting_series_rejects_unit_root() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut value = 0.0;
        let series: Vec<f64> = (0..400)
            .map(|_| {
                value = 0.2 * value + rng.gen_range(-1.0..1.0);
                value
            })
            .collect();

        let statistic = adf_statistic(&series, 1).unwrap();
        assert!(statistic < -5.0, "statistic was {}", statistic);
    }

    #[test]
    fn short_series_cannot_be_tested() {
        assert!(adf_statistic(&[1.0, 2.0], 3).is_err());
    }
}
