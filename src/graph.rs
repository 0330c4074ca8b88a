//! Relationship graphs between markets.
//!
//! A `RelationshipGraph` wraps a petgraph `Graph` whose node indices follow an
//! explicit, stored market order. Two builders produce it from a
//! `VolatilityTable`: pairwise correlation thresholding (undirected) and the
//! Diebold-Yilmaz spillover decomposition (directed).

pub mod correlation;
pub mod spillover;
pub mod var;

pub use correlation::{build_correlation_graph, correlation_matrix};
pub use spillover::{
    build_spillover_graph, graph_from_spillover, spillover_table, SpilloverSummary, SpilloverTable,
};
pub use var::{ForecastErrorVarianceDecomposition, ModelFitError, VarModel};

use crate::market_key::MarketKey;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

/// Error types for graph construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The VAR behind a spillover graph could not be fitted
    ModelFit(ModelFitError),
    /// Edge refers to a node index outside the node order
    NodeOutOfRange { index: usize, node_count: usize },
    /// Edges from a market to itself are never stored
    SelfLoop(String),
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::ModelFit(e) => write!(f, "Model fit error: {}", e),
            GraphError::NodeOutOfRange { index, node_count } => write!(
                f,
                "Node index {} out of range for {} nodes",
                index, node_count
            ),
            GraphError::SelfLoop(market) => write!(f, "Self-loop on {}", market),
        }
    }
}

impl std::error::Error for GraphError {}

impl From<ModelFitError> for GraphError {
    fn from(e: ModelFitError) -> Self {
        GraphError::ModelFit(e)
    }
}

/// Whether stored edges are one-way or symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphKind {
    /// Each stored edge links both markets (correlation)
    Undirected,
    /// Each stored edge runs from source to target (spillover)
    Directed,
}

/// A weighted edge between two positions of the node order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Weighted graph over markets with a fixed node order.
#[derive(Debug, Clone)]
pub struct RelationshipGraph {
    kind: GraphKind,
    node_order: Vec<MarketKey>,
    graph: Graph<MarketKey, f64>,
}

impl RelationshipGraph {
    /// Creates a graph with one node per market, in the given order, and no edges.
    pub fn new(kind: GraphKind, node_order: Vec<MarketKey>) -> Self {
        let mut graph = Graph::with_capacity(node_order.len(), 0);
        for market in &node_order {
            graph.add_node(market.clone());
        }
        RelationshipGraph {
            kind,
            node_order,
            graph,
        }
    }

    /// Adds a weighted edge between two node positions.
    ///
    /// # Errors
    /// Fails on self-loops or positions outside the node order.
    pub fn add_edge(&mut self, source: usize, target: usize, weight: f64) -> Result<(), GraphError> {
        let node_count = self.node_order.len();
        for index in [source, target] {
            if index >= node_count {
                return Err(GraphError::NodeOutOfRange { index, node_count });
            }
        }
        if source == target {
            return Err(GraphError::SelfLoop(self.node_order[source].to_string()));
        }
        self.insert_edge(source, target, weight);
        Ok(())
    }

    /// Adds an edge whose endpoints the caller has already validated.
    fn insert_edge(&mut self, source: usize, target: usize, weight: f64) {
        self.graph
            .add_edge(NodeIndex::new(source), NodeIndex::new(target), weight);
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn node_order(&self) -> &[MarketKey] {
        &self.node_order
    }

    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    /// Number of stored edges (an undirected edge counts once).
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn position(&self, market: &MarketKey) -> Option<usize> {
        self.node_order.iter().position(|m| m == market)
    }

    /// Stored edges in insertion order.
    pub fn edges(&self) -> Vec<Edge> {
        self.graph
            .edge_references()
            .map(|edge| Edge {
                source: edge.source().index(),
                target: edge.target().index(),
                weight: *edge.weight(),
            })
            .collect()
    }

    /// Edges as message-passing directions: undirected edges appear twice,
    /// once each way, immediately after one another.
    pub fn directed_edges(&self) -> Vec<Edge> {
        let mut directed = Vec::with_capacity(self.edge_count() * 2);
        for edge in self.edges() {
            directed.push(edge);
            if self.kind == GraphKind::Undirected {
                directed.push(Edge {
                    source: edge.target,
                    target: edge.source,
                    weight: edge.weight,
                });
            }
        }
        directed
    }

    /// Weight of the edge `source -> target`; undirected graphs ignore direction.
    pub fn edge_weight(&self, source: &MarketKey, target: &MarketKey) -> Option<f64> {
        let a = NodeIndex::new(self.position(source)?);
        let b = NodeIndex::new(self.position(target)?);
        let found = match self.kind {
            GraphKind::Directed => self.graph.find_edge(a, b),
            GraphKind::Undirected => self.graph.find_edge(a, b).or_else(|| self.graph.find_edge(b, a)),
        };
        found.and_then(|edge| self.graph.edge_weight(edge).copied())
    }

    /// Markets receiving an edge from `market` (any neighbour if undirected).
    pub fn neighbors(&self, market: &MarketKey) -> Vec<MarketKey> {
        let Some(position) = self.position(market) else {
            return Vec::new();
        };
        let mut neighbors: Vec<usize> = self
            .directed_edges()
            .into_iter()
            .filter(|edge| edge.source == position)
            .map(|edge| edge.target)
            .collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        neighbors
            .into_iter()
            .map(|index| self.node_order[index].clone())
            .collect()
    }

    /// Share of possible edges that are present.
    pub fn density(&self) -> f64 {
        let n = self.node_count() as f64;
        if n <= 1.0 {
            return 0.0;
        }
        let possible = match self.kind {
            GraphKind::Undirected => n * (n - 1.0) / 2.0,
            GraphKind::Directed => n * (n - 1.0),
        };
        self.edge_count() as f64 / possible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markets(tickers: &[&str]) -> Vec<MarketKey> {
        tickers.iter().map(|t| MarketKey::new(*t).unwrap()).collect()
    }

    #[test]
    fn test_node_order_is_preserved() {
        let order = markets(&["^HSI", "^GSPC", "^FTSE"]);
        let graph = RelationshipGraph::new(GraphKind::Directed, order.clone());
        assert_eq!(graph.node_order(), order.as_slice());
        assert_eq!(graph.position(&order[1]), Some(1));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_add_edge_rejects_self_loops_and_unknown_nodes() {
        let mut graph = RelationshipGraph::new(GraphKind::Directed, markets(&["^HSI", "^GSPC"]));
        assert_eq!(
            graph.add_edge(0, 0, 1.0),
            Err(GraphError::SelfLoop("^HSI".to_string()))
        );
        assert!(matches!(
            graph.add_edge(0, 2, 1.0),
            Err(GraphError::NodeOutOfRange { index: 2, .. })
        ));
        assert!(graph.add_edge(0, 1, 1.0).is_ok());
    }

    #[test]
    fn test_undirected_edges_expand_both_ways() {
        let order = markets(&["^HSI", "^GSPC", "^FTSE"]);
        let mut graph = RelationshipGraph::new(GraphKind::Undirected, order.clone());
        graph.add_edge(0, 2, 0.5).unwrap();

        let directed = graph.directed_edges();
        assert_eq!(directed.len(), 2);
        assert_eq!((directed[0].source, directed[0].target), (0, 2));
        assert_eq!((directed[1].source, directed[1].target), (2, 0));
        assert_eq!(graph.edge_weight(&order[2], &order[0]), Some(0.5));
        assert_eq!(graph.neighbors(&order[2]), vec![order[0].clone()]);
        assert!((graph.density() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_directed_edges_keep_direction() {
        let order = markets(&["^HSI", "^GSPC"]);
        let mut graph = RelationshipGraph::new(GraphKind::Directed, order.clone());
        graph.add_edge(1, 0, 12.5).unwrap();

        assert_eq!(graph.directed_edges().len(), 1);
        assert_eq!(graph.edge_weight(&order[1], &order[0]), Some(12.5));
        assert_eq!(graph.edge_weight(&order[0], &order[1]), None);
        assert!(graph.neighbors(&order[0]).is_empty());
    }
}
