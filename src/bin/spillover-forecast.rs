//! Volatility spillover forecasting run
//!
//! Run with: `cargo run --release --bin spillover-forecast`
//!
//! Environment:
//!   SPILLOVER_CONFIG  JSON file overriding the default `PipelineConfig`
//!   DATABASE_PATH     SQLite cache of downloaded prices
//!   OUTPUT_DIR        directory for report.txt and run_summary.json
//!   CSV_DIR           directory for per-ticker CSV artifacts
//!   SKIP_DOWNLOAD     any value: use the cached prices only
//!   RUST_LOG          log filter, e.g. `RUST_LOG=spillover=debug`

use spillover::{
    run_pipeline, DownloaderConfig, ExcludingProvider, PipelineConfig, SqliteDataProvider,
    YahooFinanceDownloader,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let mut config = match std::env::var("SPILLOVER_CONFIG") {
        Ok(path) => PipelineConfig::from_json_file(&path)?,
        Err(_) => PipelineConfig::default(),
    };
    if let Ok(path) = std::env::var("DATABASE_PATH") {
        config.database_path = PathBuf::from(path);
    }
    if let Ok(dir) = std::env::var("OUTPUT_DIR") {
        config.output_dir = Some(PathBuf::from(dir));
    }
    if let Ok(dir) = std::env::var("CSV_DIR") {
        config.csv_dir = Some(PathBuf::from(dir));
    }

    println!("Volatility spillover forecast");
    println!("   Markets: {}", config.tickers.join(", "));
    println!("   Range: {} to {}", config.start, config.end);
    println!("   Graph: {:?}", config.graph);
    println!("   Database: {}", config.database_path.display());
    println!();

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut provider = SqliteDataProvider::new(&config.database_path)?;

    let mut failed = BTreeMap::new();
    if std::env::var("SKIP_DOWNLOAD").is_err() {
        let downloader = YahooFinanceDownloader::with_config(DownloaderConfig::default())?;
        let result = downloader
            .download_multiple_to_sqlite(&mut provider, &config.markets()?, &config.date_range())
            .await;
        println!(
            "Downloaded {} markets, {} failed",
            result.successful.len(),
            result.failed.len()
        );
        for (ticker, error) in &result.failed {
            println!("  {}: {}", ticker, error);
        }
        println!();
        failed = result.failed;
    }

    // markets that failed to download stay out even if older bars are cached
    let source = ExcludingProvider::new(&provider, failed);
    let run = run_pipeline(&config, &source)?;
    println!("{}", run.report);

    Ok(())
}
