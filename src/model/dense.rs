//! Fully connected layer.
//!
//! `output = activation(input W + b)` with cached state for backpropagation.

use super::activation::{relu, relu_derivative};
use super::glorot_uniform;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;

#[derive(Debug, Clone)]
pub struct DenseLayer {
    /// Weight matrix (input_size x output_size)
    pub weights: Array2<f64>,
    /// Bias row (1 x output_size)
    pub bias: Array2<f64>,
    /// ReLU when true, identity otherwise
    pub relu: bool,

    last_input: Option<Array2<f64>>,
    last_z: Option<Array2<f64>>,
    weight_gradient: Array2<f64>,
    bias_gradient: Array2<f64>,
}

impl DenseLayer {
    pub fn new(input_size: usize, output_size: usize, relu: bool, rng: &mut StdRng) -> Self {
        DenseLayer {
            weights: glorot_uniform(input_size, output_size, rng),
            bias: Array2::zeros((1, output_size)),
            relu,
            last_input: None,
            last_z: None,
            weight_gradient: Array2::zeros((input_size, output_size)),
            bias_gradient: Array2::zeros((1, output_size)),
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    pub fn forward(&mut self, input: &Array2<f64>) -> Array2<f64> {
        let z = input.dot(&self.weights) + &self.bias;
        let output = if self.relu { relu(&z) } else { z.clone() };
        self.last_input = Some(input.clone());
        self.last_z = Some(z);
        output
    }

    /// Stores parameter gradients and returns the gradient w.r.t. the input.
    ///
    /// A call without a preceding `forward` yields zero gradients.
    pub fn backward(&mut self, grad_output: &Array2<f64>) -> Array2<f64> {
        let (Some(input), Some(z)) = (&self.last_input, &self.last_z) else {
            return Array2::zeros((grad_output.nrows(), self.input_size()));
        };

        let delta = if self.relu {
            grad_output * &relu_derivative(z)
        } else {
            grad_output.clone()
        };

        self.weight_gradient = input.t().dot(&delta);
        self.bias_gradient = delta.sum_axis(Axis(0)).insert_axis(Axis(0));
        delta.dot(&self.weights.t())
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Array2<f64>> {
        vec![&mut self.weights, &mut self.bias]
    }

    pub fn gradients(&self) -> Vec<&Array2<f64>> {
        vec![&self.weight_gradient, &self.bias_gradient]
    }
}
