//! End-to-end forecasting run.
//!
//! Stages run strictly in sequence:
//! 1. load and align every configured market (a failing market is dropped)
//! 2. realized volatility and descriptive statistics per market
//! 3. aligned volatility table and chronological split
//! 4. relationship graphs for each split (only the training graph is modelled)
//! 5. graph tensors, grid search, test-split forecasts and metrics
//! 6. text report and JSON artifacts

use crate::analytics::{DescriptiveStatistics, VolatilityError, VolatilitySeries};
use crate::config::{ConfigError, GraphStrategy, PipelineConfig};
use crate::csv_store::{save_market_csv, CsvStoreError};
use crate::evaluation::{evaluate_horizons, EvaluationError, HorizonMetrics};
use crate::graph::{
    build_correlation_graph, correlation_matrix, graph_from_spillover, spillover_table, GraphError,
    RelationshipGraph, SpilloverSummary,
};
use crate::market_key::{MarketKey, MarketKeyError};
use crate::model::{grid_search, GridSearchError, GridSearchResult, TrainingError};
use crate::report::{
    format_edges, format_matrix, format_metrics, format_spillover_summary, format_statistics,
    write_json, GraphVisualization, ReportError, RunSummary,
};
use crate::table::{TableError, TableSplit, VolatilityTable};
use crate::tensor::{to_tensor, TensorError};
use crate::time_series::{
    align_to_business_days, DataProvider, DataProviderError, DateRange, MarketSeries, PriceBar,
};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::Path;

/// Errors that stop a run.
#[derive(Debug)]
pub enum PipelineError {
    Config(ConfigError),
    InvalidTicker(MarketKeyError),
    /// Every market failed to load
    NoMarkets,
    Csv(CsvStoreError),
    Volatility { market: String, source: VolatilityError },
    Table(TableError),
    Graph(GraphError),
    Tensor(TensorError),
    GridSearch(GridSearchError),
    Training(TrainingError),
    Evaluation(EvaluationError),
    Report(ReportError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Config(e) => write!(f, "{}", e),
            PipelineError::InvalidTicker(e) => write!(f, "Invalid ticker: {}", e),
            PipelineError::NoMarkets => write!(f, "No market could be loaded"),
            PipelineError::Csv(e) => write!(f, "{}", e),
            PipelineError::Volatility { market, source } => {
                write!(f, "Volatility of {}: {}", market, source)
            }
            PipelineError::Table(e) => write!(f, "{}", e),
            PipelineError::Graph(e) => write!(f, "{}", e),
            PipelineError::Tensor(e) => write!(f, "{}", e),
            PipelineError::GridSearch(e) => write!(f, "{}", e),
            PipelineError::Training(e) => write!(f, "{}", e),
            PipelineError::Evaluation(e) => write!(f, "{}", e),
            PipelineError::Report(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Config(e)
    }
}

impl From<MarketKeyError> for PipelineError {
    fn from(e: MarketKeyError) -> Self {
        PipelineError::InvalidTicker(e)
    }
}

impl From<CsvStoreError> for PipelineError {
    fn from(e: CsvStoreError) -> Self {
        PipelineError::Csv(e)
    }
}

impl From<TableError> for PipelineError {
    fn from(e: TableError) -> Self {
        PipelineError::Table(e)
    }
}

impl From<GraphError> for PipelineError {
    fn from(e: GraphError) -> Self {
        PipelineError::Graph(e)
    }
}

impl From<TensorError> for PipelineError {
    fn from(e: TensorError) -> Self {
        PipelineError::Tensor(e)
    }
}

impl From<GridSearchError> for PipelineError {
    fn from(e: GridSearchError) -> Self {
        PipelineError::GridSearch(e)
    }
}

impl From<TrainingError> for PipelineError {
    fn from(e: TrainingError) -> Self {
        PipelineError::Training(e)
    }
}

impl From<EvaluationError> for PipelineError {
    fn from(e: EvaluationError) -> Self {
        PipelineError::Evaluation(e)
    }
}

impl From<ReportError> for PipelineError {
    fn from(e: ReportError) -> Self {
        PipelineError::Report(e)
    }
}

/// A market left out of the run and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedMarket {
    pub market: String,
    pub reason: String,
}

/// Aligned price series of the markets that loaded, in configured order.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    pub series: Vec<MarketSeries>,
    pub dropped: Vec<DroppedMarket>,
}

impl MarketData {
    pub fn markets(&self) -> Vec<MarketKey> {
        self.series.iter().map(|s| s.market.clone()).collect()
    }
}

/// Provider view that refuses markets whose retrieval already failed this
/// run, so bars cached by an earlier run cannot bring them back.
pub struct ExcludingProvider<'a> {
    inner: &'a dyn DataProvider,
    /// Ticker -> failure reason
    excluded: BTreeMap<String, String>,
}

impl<'a> ExcludingProvider<'a> {
    pub fn new(inner: &'a dyn DataProvider, excluded: BTreeMap<String, String>) -> Self {
        ExcludingProvider { inner, excluded }
    }

    pub fn excluded(&self) -> &BTreeMap<String, String> {
        &self.excluded
    }
}

impl DataProvider for ExcludingProvider<'_> {
    fn get_price_history(
        &self,
        market: &MarketKey,
        date_range: &DateRange,
    ) -> Result<Vec<PriceBar>, DataProviderError> {
        match self.excluded.get(market.as_str()) {
            Some(reason) => Err(DataProviderError::Other(format!("Retrieval failed: {}", reason))),
            None => self.inner.get_price_history(market, date_range),
        }
    }
}

/// Loads and aligns every market; failures are logged and the market dropped.
pub fn load_markets(provider: &dyn DataProvider, markets: &[MarketKey], range: &DateRange) -> MarketData {
    let mut data = MarketData {
        series: Vec::with_capacity(markets.len()),
        dropped: Vec::new(),
    };

    for market in markets {
        let aligned = provider
            .get_price_history(market, range)
            .and_then(|bars| align_to_business_days(market, &bars, range));
        match aligned {
            Ok(aligned) => {
                log::info!(
                    "Loaded {} business days for {} ({} filled)",
                    aligned.series.len(),
                    market,
                    aligned.filled_days
                );
                data.series.push(aligned.series);
            }
            Err(e) => {
                log::warn!("Error fetching data for {}: {}", market, e);
                data.dropped.push(DroppedMarket {
                    market: market.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    data
}

/// A relationship graph together with the matrix it was derived from.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    pub graph: RelationshipGraph,
    /// Correlation matrix, or off-diagonal spillover shares in percent
    pub matrix: Vec<Vec<f64>>,
    pub spillover: Option<SpilloverSummary>,
}

/// Builds the graph `strategy` describes from `table`.
pub fn build_graph(strategy: &GraphStrategy, table: &VolatilityTable) -> Result<BuiltGraph, GraphError> {
    match *strategy {
        GraphStrategy::Correlation { threshold } => Ok(BuiltGraph {
            graph: build_correlation_graph(table, threshold),
            matrix: correlation_matrix(table),
            spillover: None,
        }),
        GraphStrategy::Spillover { lag_order, horizon } => {
            let shares = spillover_table(table, lag_order, horizon)?;
            Ok(BuiltGraph {
                graph: graph_from_spillover(&shares),
                matrix: shares.off_diagonal(),
                spillover: Some(shares.summary()),
            })
        }
    }
}

/// Graphs of the three splits. Only `train` feeds the model; the held-out
/// graphs are informational and may be missing when they cannot be built.
#[derive(Debug, Clone)]
pub struct SplitGraphs {
    pub train: BuiltGraph,
    pub validation: Option<BuiltGraph>,
    pub test: Option<BuiltGraph>,
}

fn reporting_graph(name: &str, strategy: &GraphStrategy, table: &VolatilityTable) -> Option<BuiltGraph> {
    match build_graph(strategy, table) {
        Ok(built) => Some(built),
        Err(e) => {
            log::warn!("Skipping {} graph: {}", name, e);
            None
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub data: MarketData,
    pub statistics: Vec<(MarketKey, DescriptiveStatistics)>,
    pub table: VolatilityTable,
    pub split: TableSplit,
    pub graphs: SplitGraphs,
    pub search: GridSearchResult,
    /// Test-split forecasts, `(time, node)`
    pub test_forecasts: Array2<f64>,
    pub metrics: Vec<HorizonMetrics>,
    pub report: String,
}

impl PipelineRun {
    pub fn summary(&self, strategy: GraphStrategy) -> RunSummary {
        let best = self.search.best_trial();
        RunSummary {
            markets: self.table.markets().to_vec(),
            dropped_markets: self.data.dropped.iter().map(|d| d.market.clone()).collect(),
            graph_strategy: strategy,
            graph: GraphVisualization::from_graph(&self.graphs.train.graph),
            best_hyperparameters: best.hyperparameters.clone(),
            best_history: best.history.clone(),
            trials: self.search.trials.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Runs every stage for the configured markets drawn from `provider`.
///
/// # Errors
/// Any hard-stop condition: no loadable market, a series shorter than the
/// volatility window, too few rows to split, a training graph that cannot
/// be fitted, a node mismatch, a grid search without a successful trial, or
/// a failure writing artifacts.
pub fn run_pipeline(config: &PipelineConfig, provider: &dyn DataProvider) -> Result<PipelineRun, PipelineError> {
    config.validate()?;
    let markets = config.markets()?;
    let data = load_markets(provider, &markets, &config.date_range());
    if data.series.is_empty() {
        return Err(PipelineError::NoMarkets);
    }

    if let Some(dir) = &config.csv_dir {
        for series in &data.series {
            let path = save_market_csv(dir, &series.market, &series.bars)?;
            log::info!("Saved {}", path.display());
        }
    }

    let mut volatility = Vec::with_capacity(data.series.len());
    let mut statistics = Vec::with_capacity(data.series.len());
    for series in &data.series {
        let vol = VolatilitySeries::from_market_series(series, config.volatility_window).map_err(|source| {
            PipelineError::Volatility {
                market: series.market.to_string(),
                source,
            }
        })?;
        statistics.push((
            series.market.clone(),
            DescriptiveStatistics::compute(&vol.values, config.adf_lags),
        ));
        volatility.push(vol);
    }

    let table = VolatilityTable::from_series(&volatility)?;
    let split = table.split(&config.split)?;
    log::info!(
        "Split {} rows into train {}, validation {}, test {}",
        table.n_rows(),
        split.train.n_rows(),
        split.validation.n_rows(),
        split.test.n_rows()
    );

    let graphs = SplitGraphs {
        train: build_graph(&config.graph, &split.train)?,
        validation: reporting_graph("validation", &config.graph, &split.validation),
        test: reporting_graph("test", &config.graph, &split.test),
    };
    log::info!(
        "Training graph has {} edges over {} markets",
        graphs.train.graph.edge_count(),
        graphs.train.graph.node_count()
    );

    let train_tensor = to_tensor(&graphs.train.graph, &split.train)?;
    let validation_tensor = to_tensor(&graphs.train.graph, &split.validation)?;
    let test_tensor = to_tensor(&graphs.train.graph, &split.test)?;

    let search = grid_search(
        &config.grid,
        &config.search_settings(),
        &train_tensor,
        &validation_tensor,
    )?;

    let mut network = search.best_network.clone();
    let test_forecasts = network.predict(&test_tensor)?;
    let metrics = evaluate_horizons(&test_tensor.actuals(), &test_forecasts, &config.horizons)?;

    let mut run = PipelineRun {
        data,
        statistics,
        table,
        split,
        graphs,
        search,
        test_forecasts,
        metrics,
        report: String::new(),
    };
    run.report = render_report(&run);

    if let Some(dir) = &config.output_dir {
        write_artifacts(dir, &run, config.graph)?;
    }

    Ok(run)
}

fn render_report(run: &PipelineRun) -> String {
    let markets = run.table.markets();
    let mut sections = vec![format_statistics(&run.statistics)];

    let splits = [
        ("train", Some(&run.graphs.train)),
        ("validation", run.graphs.validation.as_ref()),
        ("test", run.graphs.test.as_ref()),
    ];
    for (name, built) in splits {
        let Some(built) = built else {
            continue;
        };
        sections.push(format_matrix(&format!("{} matrix", name), markets, &built.matrix));
        if let Some(summary) = &built.spillover {
            sections.push(format_spillover_summary(summary));
        }
        sections.push(format_edges(&format!("{} graph", name), &built.graph));
    }

    let best = run.search.best_trial();
    sections.push(format!(
        "Best hyperparameters: {} (validation loss {:.6})\n",
        best.hyperparameters,
        best.final_validation_loss().unwrap_or(f64::NAN)
    ));
    for metrics in &run.metrics {
        sections.push(format_metrics(markets, metrics));
    }

    sections.join("\n")
}

fn write_artifacts(dir: &Path, run: &PipelineRun, strategy: GraphStrategy) -> Result<(), PipelineError> {
    std::fs::create_dir_all(dir).map_err(ReportError::from)?;
    std::fs::write(dir.join("report.txt"), &run.report).map_err(ReportError::from)?;
    write_json(dir.join("run_summary.json"), &run.summary(strategy))?;
    log::info!("Wrote report and run summary to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_provider::SqliteDataProvider;
    use crate::time_series::InMemoryDataProvider;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn provider(markets: &[&str], range: &DateRange) -> InMemoryDataProvider {
        let mut provider = InMemoryDataProvider::new();
        for (m, ticker) in markets.iter().enumerate() {
            let mut rng = StdRng::seed_from_u64(100 + m as u64);
            let mut price = 100.0;
            let bars = range
                .business_days()
                .into_iter()
                .map(|date| {
                    price *= 1.0 + rng.gen_range(-0.02..0.02);
                    PriceBar::flat(date, price)
                })
                .collect();
            provider.add_data(MarketKey::new(*ticker).unwrap(), bars);
        }
        provider
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            tickers: vec!["^GSPC".into(), "^FTSE".into(), "^HSI".into(), "^N225".into()],
            start: NaiveDate::from_ymd_opt(2021, 1, 4).unwrap(),
            end: NaiveDate::from_ymd_opt(2021, 6, 30).unwrap(),
            volatility_window: 5,
            epochs: 4,
            grid: crate::model::HyperparameterGrid {
                hidden_dims: vec![4],
                heads: vec![1],
                layers: vec![1],
                learning_rates: vec![1e-2],
                dropouts: vec![0.0],
            },
            horizons: vec![1, 5],
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_missing_market_is_dropped() {
        let config = small_config();
        let data_source = provider(&["^GSPC", "^FTSE", "^N225"], &config.date_range());
        let data = load_markets(&data_source, &config.markets().unwrap(), &config.date_range());
        assert_eq!(data.series.len(), 3);
        assert_eq!(data.dropped.len(), 1);
        assert_eq!(data.dropped[0].market, "^HSI");
        assert_eq!(data.markets()[2].as_str(), "^N225");
    }

    #[test]
    fn test_failed_download_drops_cached_market() {
        let config = small_config();
        let range = config.date_range();
        let mut cache = SqliteDataProvider::new_in_memory().unwrap();
        let gspc = MarketKey::new("^GSPC").unwrap();
        let hsi = MarketKey::new("^HSI").unwrap();
        let days = range.business_days();
        let full: Vec<PriceBar> = days.iter().map(|d| PriceBar::flat(*d, 100.0)).collect();
        let stale: Vec<PriceBar> = days[..10].iter().map(|d| PriceBar::flat(*d, 50.0)).collect();
        cache.insert_bars(&gspc, &full).unwrap();
        cache.insert_bars(&hsi, &stale).unwrap();

        let mut failed = BTreeMap::new();
        failed.insert("^HSI".to_string(), "Network error: timed out".to_string());
        let source = ExcludingProvider::new(&cache, failed);

        let data = load_markets(&source, &[gspc.clone(), hsi], &range);
        assert_eq!(data.markets(), vec![gspc]);
        assert_eq!(data.dropped.len(), 1);
        assert_eq!(data.dropped[0].market, "^HSI");
        assert!(data.dropped[0].reason.contains("timed out"));

        // without the exclusion the stale cache would be filled across the range
        let unfiltered = load_markets(&cache, &[MarketKey::new("^HSI").unwrap()], &range);
        assert_eq!(unfiltered.series[0].len(), days.len());
    }

    #[test]
    fn test_run_with_correlation_graph() {
        let config = small_config();
        let data_source = provider(&["^GSPC", "^FTSE", "^HSI", "^N225"], &config.date_range());
        let run = run_pipeline(&config, &data_source).unwrap();

        assert_eq!(run.table.n_markets(), 4);
        let order: Vec<&str> = run.table.markets().iter().map(|m| m.as_str()).collect();
        assert_eq!(order, vec!["^FTSE", "^GSPC", "^HSI", "^N225"]);
        assert_eq!(run.graphs.train.graph.node_order(), run.table.markets());
        assert_eq!(run.statistics.len(), 4);
        assert_eq!(run.metrics.len(), 2);
        assert_eq!(run.test_forecasts.dim(), (run.split.test.n_rows(), 4));
        assert!(run.report.contains("Metrics for horizon 5:"));
        assert_eq!(run.summary(config.graph).markets.len(), 4);
    }

    #[test]
    fn test_run_with_spillover_graph_writes_artifacts() {
        let dir = std::env::temp_dir().join(format!("spillover_pipeline_{}", std::process::id()));
        let config = PipelineConfig {
            graph: GraphStrategy::spillover(),
            output_dir: Some(dir.clone()),
            ..small_config()
        };
        let data_source = provider(&["^GSPC", "^FTSE", "^HSI", "^N225"], &config.date_range());
        let run = run_pipeline(&config, &data_source).unwrap();

        assert!(run.graphs.train.spillover.is_some());
        assert!(run.report.contains("Total spillover index"));
        assert!(dir.join("report.txt").exists());
        let summary = std::fs::read_to_string(dir.join("run_summary.json")).unwrap();
        assert!(summary.contains("\"strategy\": \"spillover\""));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_no_markets() {
        let config = small_config();
        let empty = InMemoryDataProvider::new();
        assert!(matches!(run_pipeline(&config, &empty), Err(PipelineError::NoMarkets)));
    }

    #[test]
    fn test_short_history_is_a_hard_stop() {
        let config = PipelineConfig {
            end: NaiveDate::from_ymd_opt(2021, 1, 8).unwrap(),
            ..small_config()
        };
        let data_source = provider(&["^GSPC"], &config.date_range());
        assert!(matches!(
            run_pipeline(&config, &data_source),
            Err(PipelineError::Volatility { .. })
        ));
    }
}
