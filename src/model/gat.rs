//! Graph Attention Layer.
//!
//! Multi-head attention over in-neighbours (self included), heads averaged:
//! `e_ij = LeakyReLU(a_src . h_j + a_dst . h_i)`, `alpha_ij = softmax_j(e_ij)`,
//! `out_i = mean_k sum_j alpha^k_ij h^k_j + b`.

use super::activation::{leaky_relu, leaky_relu_derivative, ATTENTION_NEGATIVE_SLOPE};
use super::glorot_uniform;
use crate::graph::Edge;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;

/// In-neighbour lists (message sources) per target node, self-loop first,
/// each list sorted and free of duplicates.
pub fn attention_neighbors(n: usize, edges: &[Edge]) -> Vec<Vec<usize>> {
    let mut neighbors: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    for edge in edges {
        if edge.source < n && edge.target < n && edge.source != edge.target {
            neighbors[edge.target].push(edge.source);
        }
    }
    for list in neighbors.iter_mut() {
        list[1..].sort_unstable();
        list.dedup();
    }
    neighbors
}

#[derive(Debug, Clone)]
struct AttentionHead {
    weights: Array2<f64>,
    attention_src: Array2<f64>,
    attention_dst: Array2<f64>,
}

#[derive(Debug, Clone)]
struct HeadCache {
    transformed: Array2<f64>,
    /// `alpha[(row, j)]` for neighbour `j` of the row's node, zero elsewhere.
    alpha: Array2<f64>,
    /// LeakyReLU derivative at each attention logit.
    slope: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct GraphAttentionLayer {
    heads: Vec<AttentionHead>,
    pub bias: Array2<f64>,

    last_input: Option<Array2<f64>>,
    cache: Vec<HeadCache>,
    head_gradients: Vec<[Array2<f64>; 3]>,
    bias_gradient: Array2<f64>,
}

impl GraphAttentionLayer {
    pub fn new(in_features: usize, out_features: usize, num_heads: usize, rng: &mut StdRng) -> Self {
        let num_heads = num_heads.max(1);
        let heads: Vec<AttentionHead> = (0..num_heads)
            .map(|_| AttentionHead {
                weights: glorot_uniform(in_features, out_features, rng),
                attention_src: glorot_uniform(out_features, 1, rng),
                attention_dst: glorot_uniform(out_features, 1, rng),
            })
            .collect();
        let head_gradients = heads
            .iter()
            .map(|head| {
                [
                    Array2::zeros(head.weights.dim()),
                    Array2::zeros(head.attention_src.dim()),
                    Array2::zeros(head.attention_dst.dim()),
                ]
            })
            .collect();

        GraphAttentionLayer {
            heads,
            bias: Array2::zeros((1, out_features)),
            last_input: None,
            cache: Vec::new(),
            head_gradients,
            bias_gradient: Array2::zeros((1, out_features)),
        }
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    /// Attention coefficients of the last forward pass for one head.
    pub fn attention(&self, head: usize) -> Option<&Array2<f64>> {
        self.cache.get(head).map(|cache| &cache.alpha)
    }

    /// Forward pass over stacked snapshots of `neighbors.len()` nodes each.
    pub fn forward(&mut self, input: &Array2<f64>, neighbors: &[Vec<usize>]) -> Array2<f64> {
        let n = neighbors.len();
        let rows = input.nrows();
        let out_features = self.bias.ncols();
        let scale = 1.0 / self.heads.len() as f64;

        let mut output = Array2::zeros((rows, out_features));
        self.cache.clear();

        for head in &self.heads {
            let transformed = input.dot(&head.weights);
            let src_scores = transformed.dot(&head.attention_src);
            let dst_scores = transformed.dot(&head.attention_dst);

            let mut alpha = Array2::zeros((rows, n));
            let mut slope = Array2::zeros((rows, n));

            for row in 0..rows {
                let block = row - row % n;
                let node = row % n;
                let sources = &neighbors[node];

                let logits: Vec<f64> = sources
                    .iter()
                    .map(|&j| src_scores[[block + j, 0]] + dst_scores[[row, 0]])
                    .collect();
                let activated: Vec<f64> = logits
                    .iter()
                    .map(|&e| leaky_relu(e, ATTENTION_NEGATIVE_SLOPE))
                    .collect();
                let max = activated.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let exps: Vec<f64> = activated.iter().map(|&z| (z - max).exp()).collect();
                let total: f64 = exps.iter().sum();

                for (k, &j) in sources.iter().enumerate() {
                    let weight = exps[k] / total;
                    alpha[[row, j]] = weight;
                    slope[[row, j]] = leaky_relu_derivative(logits[k], ATTENTION_NEGATIVE_SLOPE);

                    output
                        .row_mut(row)
                        .scaled_add(weight * scale, &transformed.row(block + j));
                }
            }

            self.cache.push(HeadCache {
                transformed,
                alpha,
                slope,
            });
        }

        self.last_input = Some(input.clone());
        output + &self.bias
    }

    pub fn backward(&mut self, grad_output: &Array2<f64>, neighbors: &[Vec<usize>]) -> Array2<f64> {
        let Some(input) = &self.last_input else {
            return Array2::zeros((grad_output.nrows(), self.input_size()));
        };

        let n = neighbors.len();
        let rows = grad_output.nrows();
        let scale = 1.0 / self.heads.len() as f64;
        let mut grad_input = Array2::zeros(input.dim());

        self.bias_gradient = grad_output.sum_axis(Axis(0)).insert_axis(Axis(0));

        for (index, (head, cache)) in self.heads.iter().zip(&self.cache).enumerate() {
            let grad_head = grad_output * scale;
            let transformed = &cache.transformed;

            let mut grad_transformed = Array2::<f64>::zeros(transformed.dim());
            let mut grad_src = Array2::<f64>::zeros((rows, 1));
            let mut grad_dst = Array2::<f64>::zeros((rows, 1));

            for row in 0..rows {
                let block = row - row % n;
                let sources = &neighbors[row % n];
                let upstream = grad_head.row(row);

                // d loss / d alpha_ij = g_i . h_j
                let grad_alpha: Vec<f64> = sources
                    .iter()
                    .map(|&j| upstream.dot(&transformed.row(block + j)))
                    .collect();
                let weighted: f64 = sources
                    .iter()
                    .zip(&grad_alpha)
                    .map(|(&j, g)| cache.alpha[[row, j]] * g)
                    .sum();

                for (k, &j) in sources.iter().enumerate() {
                    let alpha = cache.alpha[[row, j]];

                    let mut source_row = grad_transformed.row_mut(block + j);
                    source_row.scaled_add(alpha, &upstream);

                    let grad_logit = alpha * (grad_alpha[k] - weighted) * cache.slope[[row, j]];
                    grad_src[[block + j, 0]] += grad_logit;
                    grad_dst[[row, 0]] += grad_logit;
                }
            }

            let grad_attention_src = transformed.t().dot(&grad_src);
            let grad_attention_dst = transformed.t().dot(&grad_dst);
            grad_transformed = grad_transformed
                + grad_src.dot(&head.attention_src.t())
                + grad_dst.dot(&head.attention_dst.t());

            let grad_weights = input.t().dot(&grad_transformed);
            grad_input = grad_input + grad_transformed.dot(&head.weights.t());

            self.head_gradients[index] = [grad_weights, grad_attention_src, grad_attention_dst];
        }

        grad_input
    }

    pub fn input_size(&self) -> usize {
        self.heads.first().map(|head| head.weights.nrows()).unwrap_or(0)
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Array2<f64>> {
        let mut parameters = Vec::with_capacity(self.heads.len() * 3 + 1);
        for head in &mut self.heads {
            parameters.push(&mut head.weights);
            parameters.push(&mut head.attention_src);
            parameters.push(&mut head.attention_dst);
        }
        parameters.push(&mut self.bias);
        parameters
    }

    pub fn gradients(&self) -> Vec<&Array2<f64>> {
        let mut gradients: Vec<&Array2<f64>> = self.head_gradients.iter().flatten().collect();
        gradients.push(&self.bias_gradient);
        gradients
    }
}
