//! Vector autoregression and its forecast-error variance decomposition.

use crate::analytics::regression::{least_squares, RegressionError};
use crate::table::VolatilityTable;
use nalgebra::{Cholesky, DMatrix, DVector};
use tracing::{debug, trace};

/// Default VAR lag order.
pub const DEFAULT_LAG_ORDER: usize = 2;

/// Default FEVD horizon.
pub const DEFAULT_HORIZON: usize = 10;

/// Errors raised while fitting a VAR or decomposing its forecast errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelFitError {
    /// Lag order must be at least one
    InvalidLagOrder(usize),
    /// Horizon must be at least one
    InvalidHorizon(usize),
    /// Too few usable rows to identify every coefficient
    InsufficientObservations { observations: usize, required: usize },
    /// The lagged design matrix is rank deficient
    SingularRegression,
    /// The residual covariance has no Cholesky factor
    NonPositiveDefiniteCovariance,
}

impl std::fmt::Display for ModelFitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFitError::InvalidLagOrder(lag) => write!(f, "Invalid lag order: {}", lag),
            ModelFitError::InvalidHorizon(h) => write!(f, "Invalid horizon: {}", h),
            ModelFitError::InsufficientObservations {
                observations,
                required,
            } => write!(
                f,
                "Insufficient observations: {} usable rows, {} required",
                observations, required
            ),
            ModelFitError::SingularRegression => write!(f, "VAR regression is singular"),
            ModelFitError::NonPositiveDefiniteCovariance => {
                write!(f, "Residual covariance is not positive definite")
            }
        }
    }
}

impl std::error::Error for ModelFitError {}

/// Fitted VAR(p): `y_t = c + A_1 y_{t-1} + ... + A_p y_{t-p} + u_t`.
#[derive(Debug, Clone)]
pub struct VarModel {
    lag_order: usize,
    intercept: DVector<f64>,
    /// `A_l` for l = 1..=p, each N x N with `A_l[(i, k)]` the effect of
    /// variable k at lag l on variable i.
    coefficients: Vec<DMatrix<f64>>,
    residual_covariance: DMatrix<f64>,
    observations: usize,
}

impl VarModel {
    /// Fits the VAR by equation-wise OLS on every column of `table`.
    ///
    /// # Errors
    /// - `InvalidLagOrder` for `lag_order == 0`
    /// - `InsufficientObservations` unless the usable rows exceed the
    ///   `N * p + 1` regressors of each equation
    /// - `SingularRegression` when the lagged design is rank deficient
    ///   (e.g. constant or duplicated series)
    pub fn fit(table: &VolatilityTable, lag_order: usize) -> Result<Self, ModelFitError> {
        if lag_order == 0 {
            return Err(ModelFitError::InvalidLagOrder(lag_order));
        }

        let data = table.drop_missing_rows();
        let n_vars = data.n_markets();
        let regressors = n_vars * lag_order + 1;
        let observations = data.n_rows().saturating_sub(lag_order);
        // One spare degree of freedom for the residual covariance
        let required = regressors + 1;
        if observations < required {
            return Err(ModelFitError::InsufficientObservations {
                observations,
                required,
            });
        }

        let (y, x) = regression_matrices(&data, lag_order);
        let fit = least_squares(&x, &y).map_err(|e| match e {
            RegressionError::Underdetermined { .. } => ModelFitError::InsufficientObservations {
                observations,
                required,
            },
            _ => ModelFitError::SingularRegression,
        })?;

        let intercept = fit.coefficients.row(0).transpose();
        let coefficients = (0..lag_order)
            .map(|l| {
                fit.coefficients
                    .rows(1 + l * n_vars, n_vars)
                    .transpose()
            })
            .collect();

        let degrees_of_freedom = (observations - regressors) as f64;
        let residual_covariance = fit.residuals.transpose() * &fit.residuals / degrees_of_freedom;

        debug!(
            lag_order,
            variables = n_vars,
            observations,
            "fitted VAR"
        );

        Ok(VarModel {
            lag_order,
            intercept,
            coefficients,
            residual_covariance,
            observations,
        })
    }

    pub fn lag_order(&self) -> usize {
        self.lag_order
    }

    pub fn n_vars(&self) -> usize {
        self.intercept.len()
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn intercept(&self) -> &DVector<f64> {
        &self.intercept
    }

    pub fn coefficients(&self) -> &[DMatrix<f64>] {
        &self.coefficients
    }

    pub fn residual_covariance(&self) -> &DMatrix<f64> {
        &self.residual_covariance
    }

    /// Moving-average coefficients `Phi_0 .. Phi_{count-1}`.
    ///
    /// `Phi_0 = I` and `Phi_s = sum_{l=1}^{min(s,p)} Phi_{s-l} A_l`.
    pub fn ma_coefficients(&self, count: usize) -> Vec<DMatrix<f64>> {
        let n = self.n_vars();
        let mut phis: Vec<DMatrix<f64>> = Vec::with_capacity(count);
        for s in 0..count {
            if s == 0 {
                phis.push(DMatrix::identity(n, n));
                continue;
            }
            let mut phi = DMatrix::zeros(n, n);
            for l in 1..=s.min(self.lag_order) {
                phi += &phis[s - l] * &self.coefficients[l - 1];
            }
            phis.push(phi);
        }
        phis
    }

    /// Orthogonalised forecast-error variance decomposition for horizons 1..=horizon.
    ///
    /// # Errors
    /// `InvalidHorizon` for zero, `NonPositiveDefiniteCovariance` when the
    /// residual covariance has no Cholesky factor.
    pub fn fevd(&self, horizon: usize) -> Result<ForecastErrorVarianceDecomposition, ModelFitError> {
        if horizon == 0 {
            return Err(ModelFitError::InvalidHorizon(horizon));
        }

        let n = self.n_vars();
        let cholesky = Cholesky::new(self.residual_covariance.clone())
            .ok_or(ModelFitError::NonPositiveDefiniteCovariance)?;
        let p = cholesky.l();

        let mut accumulated = DMatrix::<f64>::zeros(n, n);
        let mut shares = Vec::with_capacity(horizon);
        for phi in self.ma_coefficients(horizon) {
            let theta = phi * &p;
            accumulated += theta.component_mul(&theta);

            let mut share = accumulated.clone();
            for j in 0..n {
                let total: f64 = accumulated.row(j).sum();
                if total <= 0.0 || !total.is_finite() {
                    return Err(ModelFitError::NonPositiveDefiniteCovariance);
                }
                share.row_mut(j).scale_mut(1.0 / total);
            }
            shares.push(share);
        }

        trace!(horizon, variables = n, "computed FEVD");
        Ok(ForecastErrorVarianceDecomposition { shares })
    }
}

/// Builds `Y` (rows t = p..T) and `X = [1, y_{t-1}, ..., y_{t-p}]`.
fn regression_matrices(table: &VolatilityTable, lag: usize) -> (DMatrix<f64>, DMatrix<f64>) {
    let n_vars = table.n_markets();
    let columns = table.columns();
    let t = table.n_rows() - lag;

    let mut y = DMatrix::zeros(t, n_vars);
    let mut x = DMatrix::zeros(t, n_vars * lag + 1);

    for i in 0..t {
        for (j, column) in columns.iter().enumerate() {
            y[(i, j)] = column[i + lag];
        }

        x[(i, 0)] = 1.0;

        for l in 0..lag {
            for (j, column) in columns.iter().enumerate() {
                x[(i, 1 + l * n_vars + j)] = column[i + lag - l - 1];
            }
        }
    }

    (y, x)
}

/// FEVD shares per horizon.
///
/// `share(h, j, i)` is the fraction of variable j's h-step forecast-error
/// variance caused by shocks to variable i; each `(h, j)` row sums to one.
#[derive(Debug, Clone)]
pub struct ForecastErrorVarianceDecomposition {
    shares: Vec<DMatrix<f64>>,
}

impl ForecastErrorVarianceDecomposition {
    pub fn horizon(&self) -> usize {
        self.shares.len()
    }

    /// Share for horizon `h` (1-based), target `j` and source `i`.
    pub fn share(&self, h: usize, target: usize, source: usize) -> Option<f64> {
        let matrix = self.shares.get(h.checked_sub(1)?)?;
        if target >= matrix.nrows() || source >= matrix.ncols() {
            return None;
        }
        Some(matrix[(target, source)])
    }

    /// Shares averaged over horizons 1..=H, as an N x N matrix `[(target, source)]`.
    pub fn averaged(&self) -> DMatrix<f64> {
        let n = self.shares.first().map(|m| m.nrows()).unwrap_or(0);
        let mut total = DMatrix::zeros(n, n);
        for matrix in &self.shares {
            total += matrix;
        }
        if self.shares.is_empty() {
            total
        } else {
            total / self.shares.len() as f64
        }
    }
}
