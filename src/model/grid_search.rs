//! Exhaustive, sequential hyperparameter search.
//!
//! Every combination of the grid trains one freshly seeded network on the
//! training tensor; the trial with the lowest final-epoch validation loss
//! wins, earlier trials winning ties. Diverged trials are kept in the report
//! but never selected.

use super::network::{ForecastNetwork, NetworkConfig, OutputHead};
use super::training::{train, LossHistory, TrainingConfig};
use crate::tensor::GraphTensor;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum GridSearchError {
    /// At least one axis of the grid has no values
    EmptyGrid,
    /// Every trial failed
    NoSuccessfulTrial { trials: usize },
}

impl std::fmt::Display for GridSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridSearchError::EmptyGrid => write!(f, "Hyperparameter grid is empty"),
            GridSearchError::NoSuccessfulTrial { trials } => {
                write!(f, "None of the {} grid search trials succeeded", trials)
            }
        }
    }
}

impl std::error::Error for GridSearchError {}

/// One point of the grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub hidden_dim: usize,
    pub heads: usize,
    pub layers: usize,
    pub learning_rate: OrderedFloat<f64>,
    pub dropout: OrderedFloat<f64>,
}

impl Hyperparameters {
    pub fn new(hidden_dim: usize, heads: usize, layers: usize, learning_rate: f64, dropout: f64) -> Self {
        Hyperparameters {
            hidden_dim,
            heads,
            layers,
            learning_rate: OrderedFloat(learning_rate),
            dropout: OrderedFloat(dropout),
        }
    }
}

impl std::fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hidden={} heads={} layers={} lr={} dropout={}",
            self.hidden_dim, self.heads, self.layers, self.learning_rate, self.dropout
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterGrid {
    pub hidden_dims: Vec<usize>,
    pub heads: Vec<usize>,
    pub layers: Vec<usize>,
    pub learning_rates: Vec<f64>,
    pub dropouts: Vec<f64>,
}

impl Default for HyperparameterGrid {
    fn default() -> Self {
        HyperparameterGrid {
            hidden_dims: vec![32, 64, 128],
            heads: vec![4, 8],
            layers: vec![2],
            learning_rates: vec![1e-4, 1e-3, 1e-2],
            dropouts: vec![0.0],
        }
    }
}

impl HyperparameterGrid {
    pub fn len(&self) -> usize {
        self.hidden_dims.len()
            * self.heads.len()
            * self.layers.len()
            * self.learning_rates.len()
            * self.dropouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cartesian product; the last axis (dropout) varies fastest.
    pub fn combinations(&self) -> Vec<Hyperparameters> {
        let mut combinations = Vec::with_capacity(self.len());
        for &hidden_dim in &self.hidden_dims {
            for &heads in &self.heads {
                for &layers in &self.layers {
                    for &learning_rate in &self.learning_rates {
                        for &dropout in &self.dropouts {
                            combinations.push(Hyperparameters::new(
                                hidden_dim,
                                heads,
                                layers,
                                learning_rate,
                                dropout,
                            ));
                        }
                    }
                }
            }
        }
        combinations
    }
}

/// Settings shared by every trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSettings {
    pub epochs: usize,
    /// Trial k is seeded with `seed + k`
    pub seed: u64,
    pub lookback: usize,
    pub output: OutputHead,
    pub dense_layers: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            epochs: 70,
            seed: 42,
            lookback: 1,
            output: OutputHead::PerNode,
            dense_layers: 3,
        }
    }
}

impl SearchSettings {
    fn network_config(&self, parameters: &Hyperparameters, seed: u64) -> NetworkConfig {
        NetworkConfig {
            lookback: self.lookback,
            hidden_dim: parameters.hidden_dim,
            heads: parameters.heads,
            graph_layers: parameters.layers,
            dense_layers: self.dense_layers,
            dropout: parameters.dropout.into_inner(),
            output: self.output,
            seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialResult {
    pub index: usize,
    pub seed: u64,
    pub hyperparameters: Hyperparameters,
    /// Losses of a completed trial
    pub history: Option<LossHistory>,
    /// Failure message of a diverged trial
    pub failure: Option<String>,
}

impl TrialResult {
    pub fn final_validation_loss(&self) -> Option<f64> {
        self.history.as_ref().and_then(LossHistory::final_validation)
    }
}

#[derive(Debug, Clone)]
pub struct GridSearchResult {
    pub trials: Vec<TrialResult>,
    pub best_index: usize,
    pub best_network: ForecastNetwork,
}

impl GridSearchResult {
    pub fn best_trial(&self) -> &TrialResult {
        &self.trials[self.best_index]
    }

    pub fn best_history(&self) -> Option<&LossHistory> {
        self.best_trial().history.as_ref()
    }
}

/// Runs every grid combination in order and keeps the best trained network.
///
/// # Errors
/// `GridSearchError::EmptyGrid` for a grid without combinations and
/// `GridSearchError::NoSuccessfulTrial` when every trial failed.
pub fn grid_search(
    grid: &HyperparameterGrid,
    settings: &SearchSettings,
    train_tensor: &GraphTensor,
    validation: &GraphTensor,
) -> Result<GridSearchResult, GridSearchError> {
    let combinations = grid.combinations();
    if combinations.is_empty() {
        return Err(GridSearchError::EmptyGrid);
    }

    let mut trials = Vec::with_capacity(combinations.len());
    let mut best: Option<(usize, f64, ForecastNetwork)> = None;

    for (index, parameters) in combinations.into_iter().enumerate() {
        let seed = settings.seed.wrapping_add(index as u64);
        let mut network =
            ForecastNetwork::new(settings.network_config(&parameters, seed), train_tensor.n_nodes());
        let training = TrainingConfig {
            epochs: settings.epochs,
            learning_rate: parameters.learning_rate.into_inner(),
            ..TrainingConfig::default()
        };

        info!(trial = index, %parameters, "grid search trial");
        match train(&mut network, train_tensor, Some(validation), &training) {
            Ok(history) => {
                let loss = history.final_validation().unwrap_or(f64::NAN);
                info!(trial = index, validation_loss = loss, "trial finished");
                let improves = match &best {
                    Some((_, best_loss, _)) => loss < *best_loss,
                    None => loss.is_finite(),
                };
                if improves {
                    best = Some((index, loss, network));
                }
                trials.push(TrialResult {
                    index,
                    seed,
                    hyperparameters: parameters,
                    history: Some(history),
                    failure: None,
                });
            }
            Err(err) => {
                warn!(trial = index, error = %err, "trial failed");
                trials.push(TrialResult {
                    index,
                    seed,
                    hyperparameters: parameters,
                    history: None,
                    failure: Some(err.to_string()),
                });
            }
        }
    }

    match best {
        Some((best_index, loss, best_network)) => {
            info!(
                best = best_index,
                validation_loss = loss,
                parameters = %trials[best_index].hyperparameters,
                "grid search complete"
            );
            Ok(GridSearchResult {
                trials,
                best_index,
                best_network,
            })
        }
        None => Err(GridSearchError::NoSuccessfulTrial {
            trials: trials.len(),
        }),
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

    fn tensor(days: usize, offset: usize) -> GraphTensor {
        let markets: Vec<MarketKey> = ["^FCHI", "^KS11"]
            .iter()
            .map(|t| MarketKey::new(*t).unwrap())
            .collect();
        let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        let dates = (0..days as i64).map(|d| start + chrono::Duration::days(d)).collect();
        let columns = (0..2)
            .map(|m| {
                (0..days)
                    .map(|t| 0.1 + 0.02 * (((t + offset) % 7) as f64) + 0.01 * m as f64)
                    .collect()
            })
            .collect();
        let table = VolatilityTable::from_columns(dates, markets.clone(), columns).unwrap();
        let mut graph = RelationshipGraph::new(GraphKind::Directed, markets);
        graph.add_edge(0, 1, 12.5).unwrap();
        to_tensor(&graph, &table).unwrap()
    }

    fn small_grid() -> HyperparameterGrid {
        HyperparameterGrid {
            hidden_dims: vec![4, 8],
            heads: vec![1],
            layers: vec![1],
            learning_rates: vec![1e-3, 1e-2],
            dropouts: vec![0.0],
        }
    }

    #[test]
    fn test_combinations_follow_axis_order() {
        let grid = small_grid();
        let combinations = grid.combinations();
        assert_eq!(grid.len(), 4);
        assert_eq!(combinations[0], Hyperparameters::new(4, 1, 1, 1e-3, 0.0));
        assert_eq!(combinations[1], Hyperparameters::new(4, 1, 1, 1e-2, 0.0));
        assert_eq!(combinations[3], Hyperparameters::new(8, 1, 1, 1e-2, 0.0));
        assert_eq!(HyperparameterGrid::default().len(), 18);
    }

    #[test]
    fn test_empty_grid_is_rejected() {
        let grid = HyperparameterGrid {
            heads: vec![],
            ..small_grid()
        };
        let result = grid_search(&grid, &SearchSettings::default(), &tensor(20, 0), &tensor(8, 20));
        assert!(matches!(result, Err(GridSearchError::EmptyGrid)));
    }

    #[test]
    fn test_best_trial_has_minimum_validation_loss() {
        let settings = SearchSettings {
            epochs: 15,
            ..SearchSettings::default()
        };
        let result = grid_search(&small_grid(), &settings, &tensor(30, 0), &tensor(10, 30)).unwrap();
        assert_eq!(result.trials.len(), 4);
        let best = result.best_trial().final_validation_loss().unwrap();
        for trial in &result.trials {
            assert_eq!(trial.seed, 42 + trial.index as u64);
            assert!(best <= trial.final_validation_loss().unwrap());
        }
        assert_eq!(result.best_history().unwrap().train.len(), 15);
    }

    #[test]
    fn test_diverged_trials_are_excluded() {
        let grid = HyperparameterGrid {
            learning_rates: vec![f64::NAN, 1e-3],
            ..small_grid()
        };
        let settings = SearchSettings {
            epochs: 5,
            ..SearchSettings::default()
        };
        let result = grid_search(&grid, &settings, &tensor(20, 0), &tensor(8, 20)).unwrap();
        assert!(result.trials[0].failure.is_some());
        assert!(result.best_trial().failure.is_none());
        assert_eq!(result.best_trial().hyperparameters.learning_rate, OrderedFloat(1e-3));
    }

    #[test]
    fn test_all_failed_trials() {
        let grid = HyperparameterGrid {
            learning_rates: vec![f64::NAN],
            ..small_grid()
        };
        let settings = SearchSettings {
            epochs: 3,
            ..SearchSettings::default()
        };
        let result = grid_search(&grid, &settings, &tensor(20, 0), &tensor(8, 20));
        assert_eq!(result.unwrap_err(), GridSearchError::NoSuccessfulTrial { trials: 2 });
    }
}
