//! Diebold-Yilmaz spillover table, summary indices and directed graph.

use super::var::{ModelFitError, VarModel};
use super::{GraphError, GraphKind, RelationshipGraph};
use crate::market_key::MarketKey;
use crate::table::VolatilityTable;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pairwise spillover shares in percent.
///
/// `shares[i][j]` is the percentage of market j's forecast-error variance
/// attributable to shocks in market i, averaged over horizons 1..=H. For
/// every target j the column `shares[..][j]` sums to 100, own share included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpilloverTable {
    pub markets: Vec<MarketKey>,
    pub shares: Vec<Vec<f64>>,
    pub lag_order: usize,
    pub horizon: usize,
}

impl SpilloverTable {
    pub fn n_markets(&self) -> usize {
        self.markets.len()
    }

    /// Share of `target` explained by itself; `None` outside the table.
    pub fn own_share(&self, target: usize) -> Option<f64> {
        self.shares.get(target).and_then(|row| row.get(target)).copied()
    }

    /// The table with the diagonal zeroed, as printed in reports.
    pub fn off_diagonal(&self) -> Vec<Vec<f64>> {
        let mut matrix = self.shares.clone();
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 0.0;
        }
        matrix
    }

    pub fn summary(&self) -> SpilloverSummary {
        let n = self.n_markets();
        let off_diagonal = self.off_diagonal();

        let to_others: Vec<f64> = off_diagonal.iter().map(|row| row.iter().sum()).collect();
        let from_others: Vec<f64> = (0..n)
            .map(|j| off_diagonal.iter().map(|row| row[j]).sum())
            .collect();
        let net = to_others
            .iter()
            .zip(&from_others)
            .map(|(to, from)| to - from)
            .collect();

        let pairs = (n * n).saturating_sub(n);
        let total_index = if pairs == 0 {
            0.0
        } else {
            to_others.iter().sum::<f64>() / pairs as f64
        };

        SpilloverSummary {
            markets: self.markets.clone(),
            total_index,
            to_others,
            from_others,
            net,
        }
    }
}

/// Aggregate spillover indices of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpilloverSummary {
    pub markets: Vec<MarketKey>,
    /// Sum of off-diagonal shares divided by `N^2 - N`.
    pub total_index: f64,
    /// Per market, spillover transmitted to all other markets.
    pub to_others: Vec<f64>,
    /// Per market, spillover received from all other markets.
    pub from_others: Vec<f64>,
    /// `to_others - from_others`; positive for net transmitters.
    pub net: Vec<f64>,
}

/// Fits a VAR(`lag_order`) on `table` and computes the spillover table at `horizon`.
pub fn spillover_table(
    table: &VolatilityTable,
    lag_order: usize,
    horizon: usize,
) -> Result<SpilloverTable, ModelFitError> {
    let model = VarModel::fit(table, lag_order)?;
    let averaged = model.fevd(horizon)?.averaged();

    let n = table.n_markets();
    let shares = (0..n)
        .map(|source| {
            (0..n)
                .map(|target| averaged[(target, source)] * 100.0)
                .collect()
        })
        .collect();

    Ok(SpilloverTable {
        markets: table.markets().to_vec(),
        shares,
        lag_order,
        horizon,
    })
}

/// Builds the directed spillover graph.
///
/// Edge `i -> j` (`i != j`) exists when market i explains a strictly
/// positive share of market j's forecast-error variance; its weight is that
/// share in percent. Node order is the table's column order.
///
/// # Errors
/// `GraphError::ModelFit` when the VAR cannot be fitted.
pub fn build_spillover_graph(
    table: &VolatilityTable,
    lag_order: usize,
    horizon: usize,
) -> Result<RelationshipGraph, GraphError> {
    let spillover = spillover_table(table, lag_order, horizon)?;
    Ok(graph_from_spillover(&spillover))
}

/// Directed graph of the strictly positive off-diagonal shares.
pub fn graph_from_spillover(spillover: &SpilloverTable) -> RelationshipGraph {
    let mut graph = RelationshipGraph::new(GraphKind::Directed, spillover.markets.clone());
    for (source, row) in spillover.shares.iter().enumerate() {
        for (target, &weight) in row.iter().enumerate() {
            if source != target && weight > 0.0 {
                graph.insert_edge(source, target, weight);
            }
        }
    }

    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        lag_order = spillover.lag_order,
        horizon = spillover.horizon,
        "built spillover graph"
    );
    graph
}
