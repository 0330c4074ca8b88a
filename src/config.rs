//! Pipeline configuration.
//!
//! Defaults reproduce the research setup; a JSON file may override any
//! subset of the fields.

use crate::analytics::DEFAULT_VOLATILITY_WINDOW;
use crate::evaluation::DEFAULT_HORIZONS;
use crate::graph::correlation::DEFAULT_CORRELATION_THRESHOLD;
use crate::graph::var::{DEFAULT_HORIZON, DEFAULT_LAG_ORDER};
use crate::market_key::{MarketKey, MarketKeyError};
use crate::model::{HyperparameterGrid, OutputHead, SearchSettings};
use crate::table::SplitConfig;
use crate::time_series::DateRange;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Indices studied by default: US, Germany, France, UK, India, Japan, Korea, Hong Kong.
pub const DEFAULT_TICKERS: [&str; 8] = [
    "^GSPC", "^GDAXI", "^FCHI", "^FTSE", "^NSEI", "^N225", "^KS11", "^HSI",
];

/// How the relationship graph is built from the training split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum GraphStrategy {
    /// Undirected edges where |pearson r| exceeds `threshold`
    Correlation { threshold: f64 },
    /// Directed Diebold-Yilmaz spillover edges from a VAR(`lag_order`)
    Spillover { lag_order: usize, horizon: usize },
}

impl Default for GraphStrategy {
    fn default() -> Self {
        GraphStrategy::Correlation {
            threshold: DEFAULT_CORRELATION_THRESHOLD,
        }
    }
}

impl GraphStrategy {
    pub fn spillover() -> Self {
        GraphStrategy::Spillover {
            lag_order: DEFAULT_LAG_ORDER,
            horizon: DEFAULT_HORIZON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub volatility_window: usize,
    pub split: SplitConfig,
    pub graph: GraphStrategy,
    /// Lag augmentation of the Dickey-Fuller regression
    pub adf_lags: usize,
    pub lookback: usize,
    pub output: OutputHead,
    pub dense_layers: usize,
    pub epochs: usize,
    pub seed: u64,
    pub grid: HyperparameterGrid,
    pub horizons: Vec<usize>,
    pub database_path: PathBuf,
    /// Per-ticker CSV artifacts are written here when set
    pub csv_dir: Option<PathBuf>,
    /// Report and run summary are written here when set
    pub output_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            tickers: DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
            start: NaiveDate::from_ymd_opt(2007, 11, 6).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2022, 6, 3).unwrap_or_default(),
            volatility_window: DEFAULT_VOLATILITY_WINDOW,
            split: SplitConfig::default(),
            graph: GraphStrategy::default(),
            adf_lags: 1,
            lookback: 1,
            output: OutputHead::PerNode,
            dense_layers: 3,
            epochs: 70,
            seed: 42,
            grid: HyperparameterGrid::default(),
            horizons: DEFAULT_HORIZONS.to_vec(),
            database_path: PathBuf::from("./data/market_data.db"),
            csv_dir: None,
            output_dir: None,
        }
    }
}

/// Errors raised while loading a configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidTicker(MarketKeyError),
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Config I/O error: {}", e),
            ConfigError::Json(e) => write!(f, "Config parse error: {}", e),
            ConfigError::InvalidTicker(e) => write!(f, "Invalid ticker in config: {}", e),
            ConfigError::InvalidDateRange { start, end } => {
                write!(f, "Invalid date range: {} is after {}", start, end)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

impl From<MarketKeyError> for ConfigError {
    fn from(e: MarketKeyError) -> Self {
        ConfigError::InvalidTicker(e)
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks tickers and the date range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.markets()?;
        if self.start > self.end {
            return Err(ConfigError::InvalidDateRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn markets(&self) -> Result<Vec<MarketKey>, MarketKeyError> {
        self.tickers.iter().map(|t| MarketKey::new(t.as_str())).collect()
    }

    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.start, self.end)
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            epochs: self.epochs,
            seed: self.seed,
            lookback: self.lookback,
            output: self.output,
            dense_layers: self.dense_layers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_research_setup() {
        let config = PipelineConfig::default();
        assert_eq!(config.tickers.len(), 8);
        assert_eq!(config.volatility_window, 21);
        assert_eq!(config.horizons, vec![1, 5, 10, 22]);
        assert_eq!(config.graph, GraphStrategy::Correlation { threshold: 0.3 });
        assert_eq!(config.grid.len(), 18);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{
            "tickers": ["^GSPC", "^HSI"],
            "graph": { "strategy": "spillover", "lag_order": 3, "horizon": 12 },
            "output": "Joint",
            "epochs": 5
        }"#;
        let config = PipelineConfig::from_json_str(json).unwrap();
        assert_eq!(config.tickers, vec!["^GSPC", "^HSI"]);
        assert_eq!(
            config.graph,
            GraphStrategy::Spillover {
                lag_order: 3,
                horizon: 12
            }
        );
        assert_eq!(config.output, OutputHead::Joint);
        assert_eq!(config.search_settings().epochs, 5);
        assert_eq!(config.volatility_window, 21);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"tickers": ["bad ticker"]}"#),
            Err(ConfigError::InvalidTicker(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"start": "2020-01-01", "end": "2019-01-01"}"#),
            Err(ConfigError::InvalidDateRange { .. })
        ));
        assert!(matches!(
            PipelineConfig::from_json_str("{"),
            Err(ConfigError::Json(_))
        ));
    }
}
