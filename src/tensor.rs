//! Graph tensor adapter.
//!
//! Turns a `RelationshipGraph` and a `VolatilityTable` into the fixed layout
//! the forecasting network consumes: a node feature matrix (one row per node
//! in the graph's node order, one column per date) and a directed edge list.

use crate::graph::{Edge, RelationshipGraph};
use crate::market_key::MarketKey;
use crate::table::VolatilityTable;
use chrono::NaiveDate;
use ndarray::Array2;
use std::collections::BTreeSet;

/// Error types for tensor construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// Graph nodes without a series, and series without a graph node
    NodeMismatch {
        missing_series: Vec<String>,
        unknown_series: Vec<String>,
    },
}

impl std::fmt::Display for TensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TensorError::NodeMismatch {
                missing_series,
                unknown_series,
            } => write!(
                f,
                "Node mismatch: no series for [{}], no node for [{}]",
                missing_series.join(", "),
                unknown_series.join(", ")
            ),
        }
    }
}

impl std::error::Error for TensorError {}

/// Immutable network input for one split.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphTensor {
    node_order: Vec<MarketKey>,
    dates: Vec<NaiveDate>,
    /// `features[(node, t)]`
    features: Array2<f64>,
    /// `(source, target)` positions in `node_order`
    edge_index: Vec<(usize, usize)>,
    edge_weight: Vec<f64>,
}

impl GraphTensor {
    pub fn node_order(&self) -> &[MarketKey] {
        &self.node_order
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn edge_index(&self) -> &[(usize, usize)] {
        &self.edge_index
    }

    pub fn edge_weight(&self) -> &[f64] {
        &self.edge_weight
    }

    pub fn n_nodes(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_steps(&self) -> usize {
        self.features.ncols()
    }

    /// Edge list as weighted `Edge` values.
    pub fn edges(&self) -> Vec<Edge> {
        self.edge_index
            .iter()
            .zip(&self.edge_weight)
            .map(|(&(source, target), &weight)| Edge {
                source,
                target,
                weight,
            })
            .collect()
    }

    /// Observed values as a `(time, node)` matrix.
    pub fn actuals(&self) -> Array2<f64> {
        self.features.t().to_owned()
    }
}

/// Builds the tensor of `table` laid out in `graph`'s node order.
///
/// Undirected edges become two directed entries, one each way.
///
/// # Errors
/// `TensorError::NodeMismatch` when a graph node has no column in the table
/// or a table column has no graph node.
pub fn to_tensor(graph: &RelationshipGraph, table: &VolatilityTable) -> Result<GraphTensor, TensorError> {
    let nodes: BTreeSet<&MarketKey> = graph.node_order().iter().collect();
    let series: BTreeSet<&MarketKey> = table.markets().iter().collect();

    let missing_series: Vec<String> = graph
        .node_order()
        .iter()
        .filter(|market| !series.contains(market))
        .map(|market| market.to_string())
        .collect();
    let unknown_series: Vec<String> = table
        .markets()
        .iter()
        .filter(|market| !nodes.contains(market))
        .map(|market| market.to_string())
        .collect();

    if !missing_series.is_empty() || !unknown_series.is_empty() {
        return Err(TensorError::NodeMismatch {
            missing_series,
            unknown_series,
        });
    }

    let n_steps = table.n_rows();
    let mut features = Array2::zeros((graph.node_count(), n_steps));
    for (row, market) in graph.node_order().iter().enumerate() {
        if let Some(column) = table.column(market) {
            for (t, &value) in column.iter().enumerate() {
                features[[row, t]] = value;
            }
        }
    }

    let edges = graph.directed_edges();
    Ok(GraphTensor {
        node_order: graph.node_order().to_vec(),
        dates: table.dates().to_vec(),
        features,
        edge_index: edges.iter().map(|edge| (edge.source, edge.target)).collect(),
        edge_weight: edges.iter().map(|edge| edge.weight).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphKind;

    fn key(ticker: &str) -> MarketKey {
        MarketKey::new(ticker).unwrap()
    }

    fn table(markets: &[&str]) -> VolatilityTable {
        let dates = vec![
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
        ];
        let columns = (0..markets.len())
            .map(|i| vec![i as f64, i as f64 + 0.5])
            .collect();
        VolatilityTable::from_columns(dates, markets.iter().map(|m| key(m)).collect(), columns)
            .unwrap()
    }

    #[test]
    fn test_rows_follow_graph_order() {
        // Table columns in a different order than the graph nodes
        let t = table(&["^GSPC", "^HSI", "^FTSE"]);
        let mut graph =
            RelationshipGraph::new(GraphKind::Undirected, vec![key("^FTSE"), key("^GSPC"), key("^HSI")]);
        graph.add_edge(0, 2, 0.6).unwrap();

        let tensor = to_tensor(&graph, &t).unwrap();
        assert_eq!(tensor.node_order(), graph.node_order());
        assert_eq!(tensor.features().row(0).to_vec(), vec![2.0, 2.5]);
        assert_eq!(tensor.features().row(1).to_vec(), vec![0.0, 0.5]);
        assert_eq!(tensor.edge_index(), &[(0, 2), (2, 0)]);
        assert_eq!(tensor.edge_weight(), &[0.6, 0.6]);
        assert_eq!(tensor.actuals().dim(), (2, 3));
    }

    #[test]
    fn test_directed_edges_are_not_mirrored() {
        let t = table(&["^GSPC", "^HSI"]);
        let mut graph = RelationshipGraph::new(GraphKind::Directed, vec![key("^GSPC"), key("^HSI")]);
        graph.add_edge(1, 0, 30.0).unwrap();
        let tensor = to_tensor(&graph, &t).unwrap();
        assert_eq!(tensor.edge_index(), &[(1, 0)]);
    }

    #[test]
    fn test_node_mismatch_both_ways() {
        let t = table(&["^GSPC", "^N225"]);
        let graph = RelationshipGraph::new(GraphKind::Directed, vec![key("^GSPC"), key("^HSI")]);
        assert_eq!(
            to_tensor(&graph, &t).unwrap_err(),
            TensorError::NodeMismatch {
                missing_series: vec!["^HSI".to_string()],
                unknown_series: vec!["^N225".to_string()],
            }
        );
    }
}
