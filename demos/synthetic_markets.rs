//! Synthetic spillover demo
//!
//! Simulates four markets where shocks to the first market feed into the
//! others a day later, then runs the full pipeline with both graph
//! strategies. No network access is needed.
//!
//! Run with: `RUST_LOG=info cargo run --release --example synthetic_markets`

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spillover::{
    run_pipeline, DateRange, GraphStrategy, HyperparameterGrid, InMemoryDataProvider, MarketKey,
    PipelineConfig, PriceBar,
};

fn simulate(range: &DateRange, tickers: &[&str], seed: u64) -> InMemoryDataProvider {
    let mut rng = StdRng::seed_from_u64(seed);
    let days = range.business_days();
    let mut prices = vec![100.0; tickers.len()];
    let mut previous_leader_shock = 0.0;
    let mut bars: Vec<Vec<PriceBar>> = vec![Vec::with_capacity(days.len()); tickers.len()];

    for date in days {
        let leader_shock: f64 = rng.gen_range(-0.02..0.02);
        for (m, price) in prices.iter_mut().enumerate() {
            let own: f64 = rng.gen_range(-0.01..0.01);
            let shock = if m == 0 {
                leader_shock
            } else {
                own + 0.6 * previous_leader_shock
            };
            *price *= 1.0 + shock;
            bars[m].push(PriceBar::flat(date, *price));
        }
        previous_leader_shock = leader_shock;
    }

    let mut provider = InMemoryDataProvider::new();
    for (ticker, series) in tickers.iter().zip(bars) {
        provider.add_data(MarketKey::new(*ticker).unwrap(), series);
    }
    provider
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let tickers = ["^GSPC", "^GDAXI", "^FTSE", "^N225"];
    let base = PipelineConfig {
        tickers: tickers.iter().map(|t| t.to_string()).collect(),
        start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
        epochs: 30,
        grid: HyperparameterGrid {
            hidden_dims: vec![16, 32],
            heads: vec![2],
            layers: vec![2],
            learning_rates: vec![1e-3, 1e-2],
            dropouts: vec![0.0],
        },
        ..PipelineConfig::default()
    };
    let provider = simulate(&base.date_range(), &tickers, 7);

    for graph in [GraphStrategy::default(), GraphStrategy::spillover()] {
        println!("==== {:?} ====", graph);
        let config = PipelineConfig {
            graph,
            ..base.clone()
        };
        let run = run_pipeline(&config, &provider)?;
        println!("{}", run.report);
    }

    Ok(())
}
