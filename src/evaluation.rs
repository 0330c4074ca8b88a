//! Horizon-shifted forecast metrics.
//!
//! `predictions[t]` is compared with `actuals[t + horizon]` for every node.
//! Degenerate inputs never fail: a metric that cannot be computed is NaN.

use crate::analytics::primitives::{is_effectively_constant, mean};
use ndarray::Array2;
use serde::Serialize;

/// Horizons reported by default, in trading days.
pub const DEFAULT_HORIZONS: [usize; 4] = [1, 5, 10, 22];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Predictions have neither one column nor one per node
    ColumnMismatch { nodes: usize, predicted: usize },
}

impl std::fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationError::ColumnMismatch { nodes, predicted } => write!(
                f,
                "Column mismatch: {} nodes but {} prediction columns",
                nodes, predicted
            ),
        }
    }
}

impl std::error::Error for EvaluationError {}

/// Metrics of one node at one horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeMetrics {
    pub node: usize,
    /// Number of aligned (prediction, actual) pairs
    pub pairs: usize,
    pub mafe: f64,
    pub mse: f64,
    pub rmse: f64,
    /// Percent; zero actuals are excluded
    pub mape: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonMetrics {
    pub horizon: usize,
    pub nodes: Vec<NodeMetrics>,
}

/// Per-node metrics of `predictions` against `actuals` shifted by `horizon`.
///
/// `actuals` is `(time, node)`. `predictions` is `(time, node)` or
/// `(time, 1)`, in which case the single column is used for every node.
/// Predictions beyond `T - horizon` rows are ignored.
///
/// # Errors
/// `EvaluationError::ColumnMismatch` for any other prediction width.
pub fn evaluate(
    actuals: &Array2<f64>,
    predictions: &Array2<f64>,
    horizon: usize,
) -> Result<HorizonMetrics, EvaluationError> {
    let nodes = actuals.ncols();
    let broadcast = predictions.ncols() == 1;
    if !broadcast && predictions.ncols() != nodes {
        return Err(EvaluationError::ColumnMismatch {
            nodes,
            predicted: predictions.ncols(),
        });
    }

    let pairs = actuals
        .nrows()
        .saturating_sub(horizon)
        .min(predictions.nrows());

    let nodes = (0..nodes)
        .map(|node| {
            let column = if broadcast { 0 } else { node };
            let actual: Vec<f64> = (0..pairs).map(|t| actuals[[t + horizon, node]]).collect();
            let predicted: Vec<f64> = (0..pairs).map(|t| predictions[[t, column]]).collect();
            node_metrics(node, &actual, &predicted)
        })
        .collect();

    Ok(HorizonMetrics { horizon, nodes })
}

/// Metrics for every horizon in `horizons`, in order.
pub fn evaluate_horizons(
    actuals: &Array2<f64>,
    predictions: &Array2<f64>,
    horizons: &[usize],
) -> Result<Vec<HorizonMetrics>, EvaluationError> {
    horizons
        .iter()
        .map(|&horizon| evaluate(actuals, predictions, horizon))
        .collect()
}

fn node_metrics(node: usize, actual: &[f64], predicted: &[f64]) -> NodeMetrics {
    let pairs = actual.len();
    if pairs == 0 {
        return NodeMetrics {
            node,
            pairs,
            mafe: f64::NAN,
            mse: f64::NAN,
            rmse: f64::NAN,
            mape: f64::NAN,
            r2: f64::NAN,
        };
    }

    let errors: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| p - a).collect();
    let mafe = errors.iter().map(|e| e.abs()).sum::<f64>() / pairs as f64;
    let ss_res: f64 = errors.iter().map(|e| e * e).sum();
    let mse = ss_res / pairs as f64;

    let percentage: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .filter(|(a, _)| **a != 0.0)
        .map(|(a, p)| ((a - p) / a).abs())
        .collect();
    let mape = if percentage.is_empty() {
        f64::NAN
    } else {
        mean(&percentage) * 100.0
    };

    let r2 = if is_effectively_constant(actual) {
        f64::NAN
    } else {
        let m = mean(actual);
        let ss_tot: f64 = actual.iter().map(|a| (a - m) * (a - m)).sum();
        1.0 - ss_res / ss_tot
    };

    NodeMetrics {
        node,
        pairs,
        mafe,
        mse,
        rmse: mse.sqrt(),
        mape,
        r2,
    }
}
