//! Stateless analytic primitives.
//!
//! Pure functions over slices of numeric data; composed with the windowing
//! strategies in `windows` and used by the graph builders.

/// Simple (arithmetic) returns `P_t / P_{t-1} - 1`.
///
/// The first value is NaN (no previous price). A non-positive or NaN price
/// on either side yields `0.0`, matching the return guard rails used
/// elsewhere in the crate.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let mut returns = Vec::with_capacity(prices.len());
    returns.push(f64::NAN);

    for pair in prices.windows(2) {
        let (previous, current) = (pair[0], pair[1]);
        if previous <= 0.0 || current <= 0.0 || previous.is_nan() || current.is_nan() {
            returns.push(0.0);
        } else {
            returns.push(current / previous - 1.0);
        }
    }

    returns
}

/// Sum of squared values in the window.
pub fn sum_of_squares(window: &[f64]) -> f64 {
    window.iter().map(|value| value * value).sum()
}

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (divides by `n - 1`); NaN for fewer than two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let sum_squared_diff: f64 = values.iter().map(|&value| (value - m).powi(2)).sum();
    (sum_squared_diff / (values.len() - 1) as f64).sqrt()
}

/// Relative dispersion below which a series counts as constant.
///
/// Rounding in derived series (e.g. volatility of a constant-step price)
/// leaves variance many orders of magnitude below the squared level.
pub const DISPERSION_TOLERANCE: f64 = 1e-20;

/// True when the spread of `values` around their mean is negligible
/// relative to their magnitude.
pub fn is_effectively_constant(values: &[f64]) -> bool {
    if values.is_empty() {
        return true;
    }
    let m = mean(values);
    let spread: f64 = values.iter().map(|&value| (value - m).powi(2)).sum();
    spread <= DISPERSION_TOLERANCE * sum_of_squares(values)
}

/// Pearson correlation coefficient.
///
/// Returns NaN when the slices differ in length, hold fewer than two
/// values, or either side is effectively constant.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return f64::NAN;
    }
    if is_effectively_constant(x) || is_effectively_constant(y) {
        return f64::NAN;
    }

    let mean_x = mean(x);
    let mean_y = mean(y);

    let mut covariance = 0.0;
    let mut variance_x = 0.0;
    let mut variance_y = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        covariance += dx * dy;
        variance_x += dx * dx;
        variance_y += dy * dy;
    }

    covariance / (variance_x.sqrt() * variance_y.sqrt())
}

/// Central moment of the given order (population form, divides by `n`).
pub fn central_moment(values: &[f64], order: i32) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|&value| (value - m).powi(order)).sum::<f64>() / values.len() as f64
}
