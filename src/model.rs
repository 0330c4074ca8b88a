//! Graph Forecasting Network
//!
//! Graph-convolution and graph-attention layers followed by a dense stack,
//! trained full-batch with Adam on one graph snapshot per time step:
//! - `activation`: ReLU, LeakyReLU and inverted dropout
//! - `dense`, `gcn`, `gat`: layers with cached forward state and manual backprop
//! - `optimizer`: Adam over every parameter matrix of a network
//! - `network`: the layer stack and its output heads
//! - `training`: the epoch loop and loss histories
//! - `grid_search`: sequential hyperparameter search

pub mod activation;
pub mod dense;
pub mod gat;
pub mod gcn;
pub mod grid_search;
pub mod network;
pub mod optimizer;
pub mod training;

pub use grid_search::{
    grid_search, GridSearchError, GridSearchResult, Hyperparameters, HyperparameterGrid,
    SearchSettings, TrialResult,
};
pub use network::{ForecastNetwork, GraphStructure, NetworkConfig, OutputHead};
pub use optimizer::Adam;
pub use training::{forecast_loss, train, LossHistory, TrainingConfig, TrainingError};

use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

/// Glorot/Xavier uniform initialisation from a seeded generator.
pub(crate) fn glorot_uniform(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::random_using((rows, cols), Uniform::new(-limit, limit), rng)
}
