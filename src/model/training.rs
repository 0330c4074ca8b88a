//! Full-batch training loop.

use super::network::{node_inputs, ForecastNetwork, GraphStructure};
use super::optimizer::Adam;
use crate::tensor::GraphTensor;
use ndarray::{s, Array2};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum TrainingError {
    /// Loss became NaN or infinite
    Diverged { epoch: usize, loss: f64 },
    /// Tensor does not fit the network
    ShapeMismatch(String),
}

impl std::fmt::Display for TrainingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingError::Diverged { epoch, loss } => {
                write!(f, "Training diverged at epoch {} (loss {})", epoch, loss)
            }
            TrainingError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {}", msg),
        }
    }
}

impl std::error::Error for TrainingError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Progress is logged every `log_every` epochs
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 70,
            learning_rate: 1e-3,
            log_every: 10,
        }
    }
}

/// Per-epoch losses; `validation` is empty when no validation tensor was given.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LossHistory {
    pub train: Vec<f64>,
    pub validation: Vec<f64>,
}

impl LossHistory {
    pub fn final_train(&self) -> Option<f64> {
        self.train.last().copied()
    }

    pub fn final_validation(&self) -> Option<f64> {
        self.validation.last().copied()
    }
}

/// Mean squared error of forecasts at `t` against actuals at `t + 1`.
///
/// NaN when fewer than two steps are available.
pub fn forecast_loss(forecasts: &Array2<f64>, actuals: &Array2<f64>) -> f64 {
    let steps = forecasts.nrows().min(actuals.nrows());
    if steps < 2 || forecasts.ncols() != actuals.ncols() {
        return f64::NAN;
    }
    let predicted = forecasts.slice(s![..steps - 1, ..]);
    let observed = actuals.slice(s![1..steps, ..]);
    let diff = &predicted - &observed;
    diff.mapv(|d| d * d).mean().unwrap_or(f64::NAN)
}

/// Loss and its gradient with respect to every forecast; the last step gets none.
fn loss_and_gradient(forecasts: &Array2<f64>, actuals: &Array2<f64>) -> (f64, Array2<f64>) {
    let steps = forecasts.nrows();
    let mut gradient = Array2::zeros(forecasts.dim());
    let diff = &forecasts.slice(s![..steps - 1, ..]) - &actuals.slice(s![1..steps, ..]);
    let count = diff.len().max(1) as f64;
    let loss = diff.mapv(|d| d * d).sum() / count;
    gradient
        .slice_mut(s![..steps - 1, ..])
        .assign(&(diff * (2.0 / count)));
    (loss, gradient)
}

fn check_trainable(network: &ForecastNetwork, tensor: &GraphTensor) -> Result<(), TrainingError> {
    network.check_tensor(tensor)?;
    if tensor.n_steps() < 2 {
        return Err(TrainingError::ShapeMismatch(format!(
            "need at least 2 time steps to train, got {}",
            tensor.n_steps()
        )));
    }
    Ok(())
}

/// Trains `network` for a fixed number of epochs with Adam.
///
/// Each epoch is one full-batch step over every snapshot of `train_tensor`,
/// followed by an evaluation-mode pass over `validation` when given.
///
/// # Errors
/// `TrainingError::Diverged` as soon as a training or validation loss is not
/// finite; `TrainingError::ShapeMismatch` when a tensor does not fit.
pub fn train(
    network: &mut ForecastNetwork,
    train_tensor: &GraphTensor,
    validation: Option<&GraphTensor>,
    config: &TrainingConfig,
) -> Result<LossHistory, TrainingError> {
    check_trainable(network, train_tensor)?;
    if let Some(tensor) = validation {
        check_trainable(network, tensor)?;
    }

    let structure = GraphStructure::from_tensor(train_tensor);
    let inputs = node_inputs(train_tensor.features(), network.config().lookback);
    let actuals = train_tensor.actuals();
    let mut optimizer = Adam::new(config.learning_rate);
    let mut history = LossHistory::default();

    debug!(
        epochs = config.epochs,
        learning_rate = config.learning_rate,
        parameters = network.parameter_count(),
        "starting training"
    );

    for epoch in 1..=config.epochs {
        let raw = network.forward(&inputs, &structure, true);
        let forecasts = network.forecasts(&raw);
        let (loss, grad_forecasts) = loss_and_gradient(&forecasts, &actuals);
        if !loss.is_finite() {
            return Err(TrainingError::Diverged { epoch, loss });
        }

        let grad_raw = network.forecast_gradient_to_raw(&grad_forecasts);
        network.backward(&grad_raw, &structure);
        let gradients = network.gradients();
        optimizer.step(network.parameters_mut(), &gradients);
        history.train.push(loss);

        if let Some(tensor) = validation {
            let forecasts = network.predict(tensor)?;
            let validation_loss = forecast_loss(&forecasts, &tensor.actuals());
            if !validation_loss.is_finite() {
                return Err(TrainingError::Diverged {
                    epoch,
                    loss: validation_loss,
                });
            }
            history.validation.push(validation_loss);
        }

        if config.log_every > 0 && epoch % config.log_every == 0 {
            info!(
                epoch,
                train_loss = loss,
                validation_loss = history.final_validation().unwrap_or(f64::NAN),
                "epoch complete"
            );
        }
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphKind, RelationshipGraph};
    use crate::market_key::MarketKey;
    use crate::model::network::{NetworkConfig, OutputHead};
    use crate::table::VolatilityTable;
    use crate::tensor::to_tensor;
    use chrono::NaiveDate;
    use ndarray::array;

    fn tensor(days: usize, offset: f64) -> GraphTensor {
        let markets: Vec<MarketKey> = ["^GSPC", "^GDAXI", "^N225"]
            .iter()
            .map(|t| MarketKey::new(*t).unwrap())
            .collect();
        let start = NaiveDate::from_ymd_opt(2023, 3, 1).unwrap();
        let dates = (0..days as i64).map(|d| start + chrono::Duration::days(d)).collect();
        let columns = (0..3)
            .map(|m| {
                (0..days)
                    .map(|t| 0.2 + 0.05 * ((t as f64 + offset) * 0.3 + m as f64).sin())
                    .collect()
            })
            .collect();
        let table = VolatilityTable::from_columns(dates, markets.clone(), columns).unwrap();
        let mut graph = RelationshipGraph::new(GraphKind::Undirected, markets);
        graph.add_edge(0, 1, 0.7).unwrap();
        graph.add_edge(0, 2, 0.4).unwrap();
        to_tensor(&graph, &table).unwrap()
    }

    fn config() -> NetworkConfig {
        NetworkConfig {
            hidden_dim: 8,
            heads: 2,
            lookback: 2,
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_forecast_loss_shifts_by_one_step() {
        let forecasts = array![[1.0], [2.0], [9.0]];
        let actuals = array![[0.0], [1.0], [3.0]];
        // (1-1)^2 + (2-3)^2 over two pairs
        assert!((forecast_loss(&forecasts, &actuals) - 0.5).abs() < 1e-12);
        assert!(forecast_loss(&array![[1.0]], &array![[1.0]]).is_nan());
    }

    #[test]
    fn test_training_reduces_loss() {
        let train_tensor = tensor(40, 0.0);
        let validation = tensor(15, 40.0);
        let mut network = ForecastNetwork::new(config(), 3);
        let history = train(
            &mut network,
            &train_tensor,
            Some(&validation),
            &TrainingConfig {
                epochs: 60,
                learning_rate: 1e-2,
                log_every: 10,
            },
        )
        .unwrap();

        assert_eq!(history.train.len(), 60);
        assert_eq!(history.validation.len(), 60);
        assert!(history.final_train().unwrap() < history.train[0]);
    }

    #[test]
    fn test_joint_head_trains() {
        let train_tensor = tensor(20, 0.0);
        let mut network = ForecastNetwork::new(
            NetworkConfig {
                output: OutputHead::Joint,
                ..config()
            },
            3,
        );
        let history = train(&mut network, &train_tensor, None, &TrainingConfig::default()).unwrap();
        assert_eq!(history.train.len(), 70);
        assert!(history.validation.is_empty());
    }

    #[test]
    fn test_exploding_learning_rate_is_reported() {
        let train_tensor = tensor(20, 0.0);
        let mut network = ForecastNetwork::new(config(), 3);
        let result = train(
            &mut network,
            &train_tensor,
            None,
            &TrainingConfig {
                epochs: 5,
                learning_rate: f64::NAN,
                log_every: 0,
            },
        );
        assert!(matches!(result, Err(TrainingError::Diverged { epoch: 2, .. })));
    }

    #[test]
    fn test_single_step_tensor_is_rejected() {
        let mut network = ForecastNetwork::new(config(), 3);
        let result = train(&mut network, &tensor(1, 0.0), None, &TrainingConfig::default());
        assert!(matches!(result, Err(TrainingError::ShapeMismatch(_))));
    }
}
