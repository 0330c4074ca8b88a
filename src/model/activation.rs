//! Activation functions and dropout.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::Rng;

/// Negative slope used inside graph attention scoring.
pub const ATTENTION_NEGATIVE_SLOPE: f64 = 0.2;

pub fn relu(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| v.max(0.0))
}

/// Derivative of ReLU evaluated at the pre-activation.
pub fn relu_derivative(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}

pub fn leaky_relu(v: f64, slope: f64) -> f64 {
    if v > 0.0 {
        v
    } else {
        slope * v
    }
}

pub fn leaky_relu_derivative(v: f64, slope: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else {
        slope
    }
}

/// Inverted dropout: kept units are scaled by `1 / (1 - rate)` during
/// training so evaluation needs no rescaling.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f64,
    mask: Option<Array2<f64>>,
}

impl Dropout {
    pub fn new(rate: f64) -> Self {
        Dropout {
            rate: rate.clamp(0.0, 0.95),
            mask: None,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Applies dropout when a generator is supplied (training), identity otherwise.
    pub fn forward(&mut self, input: Array2<f64>, rng: Option<&mut StdRng>) -> Array2<f64> {
        match rng {
            Some(rng) if self.rate > 0.0 => {
                let keep = 1.0 / (1.0 - self.rate);
                let rate = self.rate;
                let mask = Array2::from_shape_fn(input.dim(), |_| {
                    if rng.gen::<f64>() >= rate {
                        keep
                    } else {
                        0.0
                    }
                });
                let output = &input * &mask;
                self.mask = Some(mask);
                output
            }
            _ => {
                self.mask = None;
                input
            }
        }
    }

    pub fn backward(&self, grad_output: Array2<f64>) -> Array2<f64> {
        match &self.mask {
            Some(mask) => grad_output * mask,
            None => grad_output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_relu_and_derivative() {
        let x = array![[-1.0, 0.0, 2.0]];
        assert_eq!(relu(&x), array![[0.0, 0.0, 2.0]]);
        assert_eq!(relu_derivative(&x), array![[0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_leaky_relu() {
        assert_eq!(leaky_relu(2.0, 0.2), 2.0);
        assert!((leaky_relu(-1.0, 0.2) + 0.2).abs() < 1e-12);
        assert_eq!(leaky_relu_derivative(-1.0, 0.2), 0.2);
    }

    #[test]
    fn test_dropout_is_identity_without_rng() {
        let mut dropout = Dropout::new(0.5);
        let x = Array2::from_elem((3, 4), 1.0);
        assert_eq!(dropout.forward(x.clone(), None), x);
        assert_eq!(dropout.backward(x.clone()), x);
    }

    #[test]
    fn test_dropout_scales_kept_units() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut dropout = Dropout::new(0.5);
        let out = dropout.forward(Array2::from_elem((20, 20), 1.0), Some(&mut rng));
        assert!(out.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-12));
        assert!(out.iter().any(|&v| v == 0.0));
        let grad = dropout.backward(Array2::from_elem((20, 20), 1.0));
        assert_eq!(grad, out);
    }
}
