//! Ordinary least squares on dense matrices.
//!
//! Solves through the SVD of `X'X` and rejects ill-conditioned designs
//! instead of regularising them, so a degenerate series surfaces as an error.

use nalgebra::DMatrix;

/// Smallest accepted ratio between the smallest and largest singular value of `X'X`.
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Result of a least-squares fit `Y = X B + E`.
#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    /// `B`, one column per dependent variable.
    pub coefficients: DMatrix<f64>,
    /// `E = Y - X B`.
    pub residuals: DMatrix<f64>,
    /// `(X'X)^-1`, used for standard errors.
    pub xtx_inverse: DMatrix<f64>,
}

impl LeastSquaresFit {
    pub fn observations(&self) -> usize {
        self.residuals.nrows()
    }

    pub fn regressors(&self) -> usize {
        self.coefficients.nrows()
    }

    /// Residual sum of squares of one dependent variable.
    pub fn residual_sum_of_squares(&self, column: usize) -> f64 {
        self.residuals.column(column).iter().map(|e| e * e).sum()
    }
}

/// Fits `Y = X B` by ordinary least squares.
///
/// # Errors
/// - `DimensionMismatch` if `x` and `y` have different row counts
/// - `Underdetermined` if there are no more rows than regressors
/// - `Singular` if `X'X` is numerically rank deficient
pub fn least_squares(x: &DMatrix<f64>, y: &DMatrix<f64>) -> Result<LeastSquaresFit, RegressionError> {
    if x.nrows() != y.nrows() {
        return Err(RegressionError::DimensionMismatch {
            x_rows: x.nrows(),
            y_rows: y.nrows(),
        });
    }
    if x.nrows() <= x.ncols() {
        return Err(RegressionError::Underdetermined {
            observations: x.nrows(),
            regressors: x.ncols(),
        });
    }
    if x.iter().chain(y.iter()).any(|value| !value.is_finite()) {
        return Err(RegressionError::NonFinite);
    }

    let xtx = x.transpose() * x;
    let xtx_inverse = inverse_well_conditioned(xtx)?;
    let coefficients = &xtx_inverse * x.transpose() * y;
    let residuals = y - x * &coefficients;

    Ok(LeastSquaresFit {
        coefficients,
        residuals,
        xtx_inverse,
    })
}

/// Inverts a symmetric matrix through its SVD, failing when it is near singular.
pub fn inverse_well_conditioned(matrix: DMatrix<f64>) -> Result<DMatrix<f64>, RegressionError> {
    let svd = matrix.svd(true, true);

    let largest = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let smallest = svd
        .singular_values
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min);
    if largest <= 0.0 || !largest.is_finite() || smallest / largest < SINGULAR_TOLERANCE {
        return Err(RegressionError::Singular);
    }

    let u = svd.u.ok_or(RegressionError::Singular)?;
    let v_t = svd.v_t.ok_or(RegressionError::Singular)?;

    let inverse_singular =
        DMatrix::from_diagonal(&svd.singular_values.map(|value| 1.0 / value));

    Ok(v_t.transpose() * inverse_singular * u.transpose())
}

/// Errors raised by the least-squares solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegressionError {
    DimensionMismatch { x_rows: usize, y_rows: usize },
    Underdetermined { observations: usize, regressors: usize },
    NonFinite,
    Singular,
}

impl std::fmt::Display for RegressionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegressionError::DimensionMismatch { x_rows, y_rows } => write!(
                f,
                "Design has {} rows but response has {}",
                x_rows, y_rows
            ),
            RegressionError::Underdetermined {
                observations,
                regressors,
            } => write!(
                f,
                "{} observations cannot identify {} regressors",
                observations, regressors
            ),
            RegressionError::NonFinite => write!(f, "Regression input contains NaN or infinity"),
            RegressionError::Singular => write!(f, "Regression design matrix is singular"),
        }
    }
}

impl std::error::Error for RegressionError {}
