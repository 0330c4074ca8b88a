pub mod market_key;
pub mod time_series;
pub mod sqlite_provider;
pub mod yahoo_finance;
pub mod csv_store;
pub mod analytics;
pub mod table;
pub mod graph;
pub mod tensor;
pub mod model;
pub mod evaluation;
pub mod report;
pub mod config;
pub mod pipeline;


pub use market_key::{MarketKey, MarketKeyError};
pub use time_series::{
    align_to_business_days, AlignedSeries, DataProvider, DataProviderError, DateRange,
    InMemoryDataProvider, MarketSeries, PriceBar,
};
pub use sqlite_provider::SqliteDataProvider;
pub use yahoo_finance::{DownloadError, DownloadResult, DownloaderConfig, YahooFinanceDownloader};
pub use csv_store::{CsvDirectoryProvider, CsvStoreError};
pub use analytics::{realized_volatility, DescriptiveStatistics, VolatilityError, VolatilitySeries};
pub use table::{SplitConfig, TableError, TableSplit, VolatilityTable};
pub use graph::{
    build_correlation_graph, build_spillover_graph, Edge, GraphError, GraphKind, ModelFitError,
    RelationshipGraph, SpilloverSummary, SpilloverTable,
};
pub use tensor::{to_tensor, GraphTensor, TensorError};
pub use model::{
    grid_search, train, ForecastNetwork, GridSearchError, GridSearchResult, HyperparameterGrid,
    Hyperparameters, NetworkConfig, OutputHead, SearchSettings, TrainingConfig, TrainingError,
};
pub use evaluation::{evaluate, EvaluationError, HorizonMetrics, NodeMetrics};
pub use config::{ConfigError, GraphStrategy, PipelineConfig};
pub use pipeline::{run_pipeline, ExcludingProvider, PipelineError, PipelineRun};
