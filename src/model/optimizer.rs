//! Adam optimizer (Adaptive Moment Estimation).

use ndarray::Array2;

/// Adam over an ordered list of parameter matrices.
///
/// Moment buffers are created on the first step and matched to parameters
/// by position, so every step must pass parameters in the same order.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    t: i32,
    m: Vec<Array2<f64>>,
    v: Vec<Array2<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn steps(&self) -> i32 {
        self.t
    }

    /// Applies one update to every parameter from its gradient.
    pub fn step(&mut self, parameters: Vec<&mut Array2<f64>>, gradients: &[Array2<f64>]) {
        if self.m.len() != parameters.len() {
            self.m = parameters.iter().map(|p| Array2::zeros(p.dim())).collect();
            self.v = parameters.iter().map(|p| Array2::zeros(p.dim())).collect();
            self.t = 0;
        }
        self.t += 1;

        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for (index, (parameter, gradient)) in parameters.into_iter().zip(gradients).enumerate() {
            let m = &mut self.m[index];
            let v = &mut self.v[index];

            // Biased first and second moment estimates
            *m = &*m * self.beta1 + gradient * (1.0 - self.beta1);
            *v = &*v * self.beta2 + &(gradient * gradient) * (1.0 - self.beta2);

            let m_hat = &*m / bias1;
            let v_hat = &*v / bias2;

            *parameter -= &(m_hat * self.learning_rate / (v_hat.mapv(f64::sqrt) + self.epsilon));
        }
    }

    pub fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut adam = Adam::new(0.1);
        let mut w = array![[1.0, -1.0]];
        adam.step(vec![&mut w], &[array![[0.5, -2.0]]]);
        // Bias-corrected first step is lr * sign(g)
        assert!((w[[0, 0]] - 0.9).abs() < 1e-6);
        assert!((w[[0, 1]] + 0.9).abs() < 1e-6);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn test_minimises_quadratic() {
        let mut adam = Adam::new(0.05);
        let mut w = array![[3.0]];
        for _ in 0..1000 {
            let gradient = &w * 2.0;
            adam.step(vec![&mut w], &[gradient]);
        }
        assert!(w[[0, 0]].abs() < 0.1);
    }
}
