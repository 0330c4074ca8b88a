//! Forecast network: GCN layers, GAT layers, dense stack, output head.
//!
//! The network sees one graph snapshot per time step. Node i's input at step
//! t is the trailing `lookback` volatility values of market i ending at t; all
//! snapshots are stacked into one `(steps * nodes) x lookback` batch.

use super::activation::{relu, relu_derivative, Dropout};
use super::dense::DenseLayer;
use super::gat::{attention_neighbors, GraphAttentionLayer};
use super::gcn::{propagation_matrix, GraphConvLayer};
use super::training::TrainingError;
use crate::tensor::GraphTensor;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// What the final projection emits per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputHead {
    /// One scalar per node: that market's next-step volatility
    PerNode,
    /// One scalar per market per node; market j's forecast is the mean of
    /// column j over nodes
    Joint,
}

/// Architecture and regularisation of a `ForecastNetwork`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub lookback: usize,
    pub hidden_dim: usize,
    pub heads: usize,
    /// Number of GCN layers, and separately of GAT layers
    pub graph_layers: usize,
    /// Hidden dense layers before the output projection
    pub dense_layers: usize,
    pub dropout: f64,
    pub output: OutputHead,
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            lookback: 1,
            hidden_dim: 32,
            heads: 4,
            graph_layers: 2,
            dense_layers: 3,
            dropout: 0.0,
            output: OutputHead::PerNode,
            seed: 42,
        }
    }
}

/// Graph operators shared by every snapshot of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStructure {
    pub n_nodes: usize,
    pub propagation: Array2<f64>,
    pub neighbors: Vec<Vec<usize>>,
}

impl GraphStructure {
    pub fn from_tensor(tensor: &GraphTensor) -> Self {
        let n = tensor.n_nodes();
        let edges = tensor.edges();
        GraphStructure {
            n_nodes: n,
            propagation: propagation_matrix(n, &edges),
            neighbors: attention_neighbors(n, &edges),
        }
    }
}

/// Stacks per-step node inputs: row `t * n + i` holds market i's values at
/// `t - lookback + 1 ..= t`, repeating the first value before the start.
pub fn node_inputs(features: &Array2<f64>, lookback: usize) -> Array2<f64> {
    let (n, steps) = features.dim();
    let lookback = lookback.max(1);
    Array2::from_shape_fn((steps * n, lookback), |(row, column)| {
        let t = row / n;
        let node = row % n;
        let back = lookback - 1 - column;
        features[[node, t.saturating_sub(back)]]
    })
}

#[derive(Debug, Clone)]
pub struct ForecastNetwork {
    config: NetworkConfig,
    n_nodes: usize,
    gcn: Vec<GraphConvLayer>,
    gcn_dropout: Vec<Dropout>,
    gcn_z: Vec<Array2<f64>>,
    gat: Vec<GraphAttentionLayer>,
    gat_dropout: Vec<Dropout>,
    gat_z: Vec<Array2<f64>>,
    dense: Vec<DenseLayer>,
    output_layer: DenseLayer,
    rng: StdRng,
}

impl ForecastNetwork {
    /// Creates a network for graphs of `n_nodes` nodes, initialised from `config.seed`.
    pub fn new(config: NetworkConfig, n_nodes: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let hidden = config.hidden_dim.max(1);
        let graph_layers = config.graph_layers.max(1);

        let gcn = (0..graph_layers)
            .map(|layer| {
                let input = if layer == 0 { config.lookback.max(1) } else { hidden };
                GraphConvLayer::new(input, hidden, &mut rng)
            })
            .collect();
        let gat = (0..graph_layers)
            .map(|_| GraphAttentionLayer::new(hidden, hidden, config.heads, &mut rng))
            .collect();
        let dense = (0..config.dense_layers)
            .map(|_| DenseLayer::new(hidden, hidden, true, &mut rng))
            .collect();
        let output_size = match config.output {
            OutputHead::PerNode => 1,
            OutputHead::Joint => n_nodes.max(1),
        };
        let output_layer = DenseLayer::new(hidden, output_size, false, &mut rng);

        ForecastNetwork {
            gcn,
            gcn_dropout: (0..graph_layers).map(|_| Dropout::new(config.dropout)).collect(),
            gcn_z: Vec::new(),
            gat,
            gat_dropout: (0..graph_layers).map(|_| Dropout::new(config.dropout)).collect(),
            gat_z: Vec::new(),
            dense,
            output_layer,
            n_nodes,
            config,
            rng,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Checks that a tensor can be fed to this network.
    pub fn check_tensor(&self, tensor: &GraphTensor) -> Result<(), TrainingError> {
        if tensor.n_nodes() != self.n_nodes {
            return Err(TrainingError::ShapeMismatch(format!(
                "network expects {} nodes, tensor has {}",
                self.n_nodes,
                tensor.n_nodes()
            )));
        }
        if tensor.n_steps() == 0 {
            return Err(TrainingError::ShapeMismatch(
                "tensor has no time steps".to_string(),
            ));
        }
        Ok(())
    }

    /// Raw head output for stacked inputs, `(steps * nodes) x output_size`.
    pub fn forward(&mut self, inputs: &Array2<f64>, structure: &GraphStructure, training: bool) -> Array2<f64> {
        self.gcn_z.clear();
        self.gat_z.clear();

        let mut hidden = inputs.clone();
        for (layer, dropout) in self.gcn.iter_mut().zip(self.gcn_dropout.iter_mut()) {
            let z = layer.forward(&hidden, &structure.propagation);
            let rng = if training { Some(&mut self.rng) } else { None };
            hidden = dropout.forward(relu(&z), rng);
            self.gcn_z.push(z);
        }
        for (layer, dropout) in self.gat.iter_mut().zip(self.gat_dropout.iter_mut()) {
            let z = layer.forward(&hidden, &structure.neighbors);
            let rng = if training { Some(&mut self.rng) } else { None };
            hidden = dropout.forward(relu(&z), rng);
            self.gat_z.push(z);
        }
        for layer in &mut self.dense {
            hidden = layer.forward(&hidden);
        }
        self.output_layer.forward(&hidden)
    }

    /// Backpropagates the gradient of the raw head output.
    pub fn backward(&mut self, grad_output: &Array2<f64>, structure: &GraphStructure) {
        let mut grad = self.output_layer.backward(grad_output);
        for layer in self.dense.iter_mut().rev() {
            grad = layer.backward(&grad);
        }
        for ((layer, dropout), z) in self
            .gat
            .iter_mut()
            .zip(self.gat_dropout.iter())
            .zip(self.gat_z.iter())
            .rev()
        {
            let grad_z = dropout.backward(grad) * &relu_derivative(z);
            grad = layer.backward(&grad_z, &structure.neighbors);
        }
        for ((layer, dropout), z) in self
            .gcn
            .iter_mut()
            .zip(self.gcn_dropout.iter())
            .zip(self.gcn_z.iter())
            .rev()
        {
            let grad_z = dropout.backward(grad) * &relu_derivative(z);
            grad = layer.backward(&grad_z, &structure.propagation);
        }
    }

    /// Converts raw head output into a `(steps, nodes)` forecast matrix.
    pub fn forecasts(&self, raw: &Array2<f64>) -> Array2<f64> {
        let n = self.n_nodes.max(1);
        let steps = raw.nrows() / n;
        match self.config.output {
            OutputHead::PerNode => Array2::from_shape_fn((steps, n), |(t, i)| raw[[t * n + i, 0]]),
            OutputHead::Joint => Array2::from_shape_fn((steps, n), |(t, j)| {
                (0..n).map(|i| raw[[t * n + i, j]]).sum::<f64>() / n as f64
            }),
        }
    }

    /// Maps a `(steps, nodes)` forecast gradient back onto the raw head output.
    pub fn forecast_gradient_to_raw(&self, grad_forecasts: &Array2<f64>) -> Array2<f64> {
        let n = self.n_nodes.max(1);
        let steps = grad_forecasts.nrows();
        match self.config.output {
            OutputHead::PerNode => {
                Array2::from_shape_fn((steps * n, 1), |(row, _)| grad_forecasts[[row / n, row % n]])
            }
            OutputHead::Joint => Array2::from_shape_fn((steps * n, n), |(row, j)| {
                grad_forecasts[[row / n, j]] / n as f64
            }),
        }
    }

    /// Evaluation-mode forecasts for every step of `tensor`; row t forecasts t + 1.
    pub fn predict(&mut self, tensor: &GraphTensor) -> Result<Array2<f64>, TrainingError> {
        self.check_tensor(tensor)?;
        let structure = GraphStructure::from_tensor(tensor);
        let inputs = node_inputs(tensor.features(), self.config.lookback);
        let raw = self.forward(&inputs, &structure, false);
        Ok(self.forecasts(&raw))
    }

    /// Every trainable matrix, in a fixed order matching `gradients`.
    pub fn parameters_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut parameters = Vec::new();
        for layer in &mut self.gcn {
            parameters.extend(layer.parameters_mut());
        }
        for layer in &mut self.gat {
            parameters.extend(layer.parameters_mut());
        }
        for layer in &mut self.dense {
            parameters.extend(layer.parameters_mut());
        }
        parameters.extend(self.output_layer.parameters_mut());
        parameters
    }

    pub fn gradients(&self) -> Vec<Array2<f64>> {
        let mut gradients = Vec::new();
        for layer in &self.gcn {
            gradients.extend(layer.gradients().into_iter().cloned());
        }
        for layer in &self.gat {
            gradients.extend(layer.gradients().into_iter().cloned());
        }
        for layer in &self.dense {
            gradients.extend(layer.gradients().into_iter().cloned());
        }
        gradients.extend(self.output_layer.gradients().into_iter().cloned());
        gradients
    }

    pub fn parameter_count(&mut self) -> usize {
        self.parameters_mut().iter().map(|p| p.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphKind, RelationshipGraph};
    use crate::market_key::MarketKey;
    use crate::table::VolatilityTable;
    use crate::tensor::to_tensor;
    use chrono::NaiveDate;
    use ndarray::array;

    fn small_tensor() -> GraphTensor {
        let markets: Vec<MarketKey> = ["^GSPC", "^FTSE", "^HSI"]
            .iter()
            .map(|t| MarketKey::new(*t).unwrap())
            .collect();
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates = (0..6).map(|d| start + chrono::Duration::days(d)).collect();
        let columns = vec![
            vec![0.10, 0.12, 0.11, 0.13, 0.15, 0.14],
            vec![0.20, 0.21, 0.19, 0.22, 0.24, 0.23],
            vec![0.05, 0.07, 0.06, 0.08, 0.09, 0.07],
        ];
        let table = VolatilityTable::from_columns(dates, markets.clone(), columns).unwrap();
        let mut graph = RelationshipGraph::new(GraphKind::Undirected, markets);
        graph.add_edge(0, 1, 0.8).unwrap();
        graph.add_edge(1, 2, -0.4).unwrap();
        to_tensor(&graph, &table).unwrap()
    }

    #[test]
    fn test_node_inputs_repeat_first_value() {
        let features = array![[1.0, 2.0, 3.0], [10.0, 20.0, 30.0]];
        let inputs = node_inputs(&features, 2);
        assert_eq!(inputs.dim(), (6, 2));
        assert_eq!(inputs.row(0).to_vec(), vec![1.0, 1.0]);
        assert_eq!(inputs.row(1).to_vec(), vec![10.0, 10.0]);
        assert_eq!(inputs.row(4).to_vec(), vec![2.0, 3.0]);
        assert_eq!(inputs.row(5).to_vec(), vec![20.0, 30.0]);
    }

    #[test]
    fn test_predict_shapes_for_both_heads() {
        let tensor = small_tensor();
        for output in [OutputHead::PerNode, OutputHead::Joint] {
            let config = NetworkConfig {
                hidden_dim: 8,
                heads: 2,
                output,
                ..NetworkConfig::default()
            };
            let mut network = ForecastNetwork::new(config, 3);
            let forecasts = network.predict(&tensor).unwrap();
            assert_eq!(forecasts.dim(), (6, 3));
            assert!(forecasts.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_same_seed_same_forecasts() {
        let tensor = small_tensor();
        let config = NetworkConfig {
            hidden_dim: 8,
            heads: 2,
            ..NetworkConfig::default()
        };
        let a = ForecastNetwork::new(config.clone(), 3).predict(&tensor).unwrap();
        let b = ForecastNetwork::new(config, 3).predict(&tensor).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_node_count_mismatch_is_rejected() {
        let tensor = small_tensor();
        let mut network = ForecastNetwork::new(NetworkConfig::default(), 4);
        assert!(matches!(
            network.predict(&tensor),
            Err(TrainingError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_joint_gradient_mapping_averages_over_nodes() {
        let config = NetworkConfig {
            output: OutputHead::Joint,
            hidden_dim: 4,
            heads: 1,
            ..NetworkConfig::default()
        };
        let network = ForecastNetwork::new(config, 2);
        let raw = array![[1.0, 2.0], [3.0, 4.0]];
        assert_eq!(network.forecasts(&raw), array![[2.0, 3.0]]);
        let grad = network.forecast_gradient_to_raw(&array![[1.0, -1.0]]);
        assert_eq!(grad, array![[0.5, -0.5], [0.5, -0.5]]);
    }

    #[test]
    fn test_parameter_and_gradient_lists_align() {
        let config = NetworkConfig {
            hidden_dim: 4,
            heads: 2,
            ..NetworkConfig::default()
        };
        let mut network = ForecastNetwork::new(config, 3);
        let shapes: Vec<(usize, usize)> = network.parameters_mut().iter().map(|p| p.dim()).collect();
        let gradient_shapes: Vec<(usize, usize)> = network.gradients().iter().map(|g| g.dim()).collect();
        assert_eq!(shapes, gradient_shapes);
        assert!(network.parameter_count() > 0);
    }
}
