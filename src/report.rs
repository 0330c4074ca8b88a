//! Run reporting.
//!
//! Fixed-width text tables for the console and report file, a serialisable
//! node-link view of relationship graphs, and the JSON run summary.

use crate::analytics::DescriptiveStatistics;
use crate::config::GraphStrategy;
use crate::evaluation::HorizonMetrics;
use crate::graph::{GraphKind, RelationshipGraph, SpilloverSummary};
use crate::market_key::MarketKey;
use crate::model::{Hyperparameters, LossHistory, TrialResult};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Errors raised while writing report artifacts.
#[derive(Debug)]
pub enum ReportError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Io(e) => write!(f, "Report I/O error: {}", e),
            ReportError::Json(e) => write!(f, "Report serialization error: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        ReportError::Io(e)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Json(e)
    }
}

/// Renders a square market-by-market matrix with a title line.
pub fn format_matrix(title: &str, markets: &[MarketKey], matrix: &[Vec<f64>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", title);
    let _ = write!(out, "{:<8}", "");
    for market in markets {
        let _ = write!(out, " {:>10}", market.as_str());
    }
    out.push('\n');
    for (market, row) in markets.iter().zip(matrix) {
        let _ = write!(out, "{:<8}", market.as_str());
        for value in row {
            let _ = write!(out, " {:>10.4}", value);
        }
        out.push('\n');
    }
    out
}

/// One line per stored edge, `source -> target` or `source -- target`.
pub fn format_edges(title: &str, graph: &RelationshipGraph) -> String {
    let arrow = match graph.kind() {
        GraphKind::Directed => "->",
        GraphKind::Undirected => "--",
    };
    let order = graph.node_order();
    let mut out = String::new();
    let _ = writeln!(out, "{} ({} edges)", title, graph.edge_count());
    for edge in graph.edges() {
        let _ = writeln!(
            out,
            "  {:<8} {} {:<8} {:>10.4}",
            order[edge.source].as_str(),
            arrow,
            order[edge.target].as_str(),
            edge.weight
        );
    }
    out
}

/// Metrics table of one horizon: columns Index, MAFE, MSE, RMSE, MAPE, R2.
pub fn format_metrics(markets: &[MarketKey], metrics: &HorizonMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Metrics for horizon {}:", metrics.horizon);
    let _ = writeln!(
        out,
        "  {:<8} {:<10} {:<10} {:<10} {:<12} {:<10}",
        "Index", "MAFE", "MSE", "RMSE", "MAPE", "R2"
    );
    for node in &metrics.nodes {
        let name = markets
            .get(node.node)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| format!("Index {}", node.node + 1));
        let _ = writeln!(
            out,
            "  {:<8} {:<10.6} {:<10.6} {:<10.6} {:<12.6} {:<10.6}",
            name, node.mafe, node.mse, node.rmse, node.mape, node.r2
        );
    }
    out
}

pub fn format_statistics(statistics: &[(MarketKey, DescriptiveStatistics)]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Index", "Count", "Mean", "Std", "Skew", "Kurt", "ADF"
    );
    for (market, stats) in statistics {
        let adf = stats.adf_statistic.unwrap_or(f64::NAN);
        let _ = writeln!(
            out,
            "{:<8} {:>6} {:>10.6} {:>10.6} {:>10.4} {:>10.4} {:>10.4}",
            market.as_str(),
            stats.count,
            stats.mean,
            stats.std_dev,
            stats.skewness,
            stats.kurtosis,
            adf
        );
    }
    out
}

pub fn format_spillover_summary(summary: &SpilloverSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total spillover index: {:.4}%", summary.total_index);
    let _ = writeln!(out, "{:<8} {:>10} {:>10} {:>10}", "Index", "To", "From", "Net");
    for (i, market) in summary.markets.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:<8} {:>10.4} {:>10.4} {:>10.4}",
            market.as_str(),
            summary.to_others[i],
            summary.from_others[i],
            summary.net[i]
        );
    }
    out
}

/// A graph node in the node-link view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationNode {
    pub id: usize,
    pub market: String,
    pub in_degree: usize,
    pub out_degree: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationEdge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub kind: GraphKind,
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
}

/// Node-link structure of a relationship graph, ready for a plotting front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphVisualization {
    pub nodes: Vec<VisualizationNode>,
    pub edges: Vec<VisualizationEdge>,
    pub metadata: GraphMetadata,
}

impl GraphVisualization {
    pub fn from_graph(graph: &RelationshipGraph) -> Self {
        let n = graph.node_count();
        let edges = graph.edges();
        let mut in_degree = vec![0; n];
        let mut out_degree = vec![0; n];
        for edge in graph.directed_edges() {
            out_degree[edge.source] += 1;
            in_degree[edge.target] += 1;
        }

        let nodes = graph
            .node_order()
            .iter()
            .enumerate()
            .map(|(id, market)| VisualizationNode {
                id,
                market: market.to_string(),
                in_degree: in_degree[id],
                out_degree: out_degree[id],
            })
            .collect();

        let edges = edges
            .iter()
            .map(|edge| VisualizationEdge {
                source: edge.source,
                target: edge.target,
                weight: edge.weight,
                label: format!("{:.2}", edge.weight),
            })
            .collect();

        GraphVisualization {
            nodes,
            edges,
            metadata: GraphMetadata {
                kind: graph.kind(),
                node_count: n,
                edge_count: graph.edge_count(),
                density: graph.density(),
            },
        }
    }
}

/// Everything a run produced, written as `run_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub markets: Vec<MarketKey>,
    pub dropped_markets: Vec<String>,
    pub graph_strategy: GraphStrategy,
    pub graph: GraphVisualization,
    pub best_hyperparameters: Hyperparameters,
    pub best_history: Option<LossHistory>,
    pub trials: Vec<TrialResult>,
    pub metrics: Vec<HorizonMetrics>,
}

/// Pretty-printed JSON of `value` at `path`, creating parent directories.
pub fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<(), ReportError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
