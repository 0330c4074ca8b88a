//! Graph Convolutional Layer.
//!
//! Implements: H' = C (H W) + b with C = D^(-1/2) (A + I) D^(-1/2), applied
//! independently to every graph snapshot of a batch.

use super::glorot_uniform;
use crate::graph::Edge;
use ndarray::{s, Array2, Axis};
use rand::rngs::StdRng;

/// Normalised propagation matrix for `n` nodes.
///
/// `C[(target, source)]` weights the message from `source` to `target`.
/// Edge weights enter as `|w| / max|w|`; every node has a self-loop of
/// weight one. Duplicate edges accumulate.
pub fn propagation_matrix(n: usize, edges: &[Edge]) -> Array2<f64> {
    let mut adjacency = Array2::<f64>::eye(n);

    let max_weight = edges
        .iter()
        .map(|edge| edge.weight.abs())
        .filter(|w| w.is_finite())
        .fold(0.0, f64::max);

    if max_weight > 0.0 {
        for edge in edges {
            if edge.source < n && edge.target < n && edge.source != edge.target && edge.weight.is_finite() {
                adjacency[[edge.target, edge.source]] += edge.weight.abs() / max_weight;
            }
        }
    }

    let inv_sqrt_degree: Vec<f64> = adjacency
        .sum_axis(Axis(1))
        .iter()
        .map(|d| if *d > 0.0 { 1.0 / d.sqrt() } else { 0.0 })
        .collect();

    Array2::from_shape_fn((n, n), |(i, j)| {
        inv_sqrt_degree[i] * adjacency[[i, j]] * inv_sqrt_degree[j]
    })
}

/// Applies `propagation` to each consecutive block of `n` rows.
pub(crate) fn propagate(propagation: &Array2<f64>, input: &Array2<f64>) -> Array2<f64> {
    let n = propagation.nrows();
    let mut output = Array2::zeros(input.dim());
    if n == 0 {
        return output;
    }
    for block in 0..input.nrows() / n {
        let start = block * n;
        output
            .slice_mut(s![start..start + n, ..])
            .assign(&propagation.dot(&input.slice(s![start..start + n, ..])));
    }
    output
}

#[derive(Debug, Clone)]
pub struct GraphConvLayer {
    pub weights: Array2<f64>,
    pub bias: Array2<f64>,

    last_input: Option<Array2<f64>>,
    weight_gradient: Array2<f64>,
    bias_gradient: Array2<f64>,
}

impl GraphConvLayer {
    pub fn new(in_features: usize, out_features: usize, rng: &mut StdRng) -> Self {
        GraphConvLayer {
            weights: glorot_uniform(in_features, out_features, rng),
            bias: Array2::zeros((1, out_features)),
            last_input: None,
            weight_gradient: Array2::zeros((in_features, out_features)),
            bias_gradient: Array2::zeros((1, out_features)),
        }
    }

    /// Forward pass over stacked snapshots (`rows = snapshots * n`).
    pub fn forward(&mut self, input: &Array2<f64>, propagation: &Array2<f64>) -> Array2<f64> {
        let transformed = input.dot(&self.weights);
        self.last_input = Some(input.clone());
        propagate(propagation, &transformed) + &self.bias
    }

    pub fn backward(&mut self, grad_output: &Array2<f64>, propagation: &Array2<f64>) -> Array2<f64> {
        let Some(input) = &self.last_input else {
            return Array2::zeros((grad_output.nrows(), self.weights.nrows()));
        };

        self.bias_gradient = grad_output.sum_axis(Axis(0)).insert_axis(Axis(0));
        let grad_transformed = propagate(&propagation.t().to_owned(), grad_output);
        self.weight_gradient = input.t().dot(&grad_transformed);
        grad_transformed.dot(&self.weights.t())
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Array2<f64>> {
        vec![&mut self.weights, &mut self.bias]
    }

    pub fn gradients(&self) -> Vec<&Array2<f64>> {
        vec![&self.weight_gradient, &self.bias_gradient]
    }
}
