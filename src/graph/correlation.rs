//! Undirected graph from pairwise Pearson correlation of volatility.

use super::{GraphKind, RelationshipGraph};
use crate::analytics::primitives::pearson_correlation;
use crate::table::VolatilityTable;
use tracing::debug;

/// Default absolute-correlation threshold for an edge.
pub const DEFAULT_CORRELATION_THRESHOLD: f64 = 0.3;

/// Full pairwise correlation matrix in table column order.
///
/// Rows with a missing value are dropped first. Entries involving a
/// constant column are NaN, including the diagonal.
pub fn correlation_matrix(table: &VolatilityTable) -> Vec<Vec<f64>> {
    let table = table.drop_missing_rows();
    let columns = table.columns();
    let n = columns.len();

    let mut matrix = vec![vec![f64::NAN; n]; n];
    for i in 0..n {
        for j in i..n {
            let r = pearson_correlation(&columns[i], &columns[j]);
            matrix[i][j] = r;
            matrix[j][i] = r;
        }
    }
    matrix
}

/// Builds the undirected correlation graph.
///
/// An edge links markets `i` and `j` (`i != j`) when `|r_ij| > threshold`;
/// its weight is the signed correlation. NaN correlations never produce an
/// edge. Node order is the table's column order.
pub fn build_correlation_graph(table: &VolatilityTable, threshold: f64) -> RelationshipGraph {
    let matrix = correlation_matrix(table);
    let mut graph = RelationshipGraph::new(GraphKind::Undirected, table.markets().to_vec());

    for (i, row) in matrix.iter().enumerate() {
        for (j, &r) in row.iter().enumerate().skip(i + 1) {
            if r.abs() > threshold {
                graph.insert_edge(i, j, r);
            }
        }
    }

    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        threshold,
        "built correlation graph"
    );
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_key::MarketKey;
    use chrono::NaiveDate;

    fn table(columns: Vec<Vec<f64>>) -> VolatilityTable {
        let rows = columns[0].len();
        let dates = (0..rows)
            .map(|d| NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(d as i64))
            .collect();
        let markets = (0..columns.len())
            .map(|i| MarketKey::new(format!("M{}", i)).unwrap())
            .collect();
        VolatilityTable::from_columns(dates, markets, columns).unwrap()
    }

    #[test]
    fn test_threshold_and_sign() {
        let t = table(vec![
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![2.0, 4.1, 5.9, 8.2, 10.0],
            vec![5.0, 4.0, 3.0, 2.0, 1.0],
            vec![1.0, -1.0, 1.0, -1.0, 1.0],
        ]);
        let graph = build_correlation_graph(&t, 0.3);
        let m = t.markets();

        assert!(graph.edge_weight(&m[0], &m[1]).unwrap() > 0.99);
        assert!(graph.edge_weight(&m[0], &m[2]).unwrap() < -0.99);
        // Alternating column is uncorrelated with the trend
        assert_eq!(graph.edge_weight(&m[0], &m[3]), None);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_graph_is_symmetric_without_self_loops() {
        let t = table(vec![
            vec![0.1, 0.4, 0.2, 0.8, 0.3, 0.9],
            vec![0.2, 0.5, 0.1, 0.7, 0.4, 0.8],
            vec![0.9, 0.1, 0.5, 0.3, 0.6, 0.2],
        ]);
        for threshold in [0.0, 0.1, 0.3, 0.5, 0.9, 1.0] {
            let graph = build_correlation_graph(&t, threshold);
            for edge in graph.directed_edges() {
                assert_ne!(edge.source, edge.target);
                let reverse = graph
                    .directed_edges()
                    .into_iter()
                    .any(|e| e.source == edge.target && e.target == edge.source);
                assert!(reverse);
            }
        }
    }

    #[test]
    fn test_constant_columns_produce_no_edges() {
        let t = table(vec![vec![0.2; 6], vec![0.2; 6], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]]);
        let graph = build_correlation_graph(&t, 0.0);
        assert_eq!(graph.edge_count(), 0);

        let matrix = correlation_matrix(&t);
        assert!(matrix[0][0].is_nan());
        assert!((matrix[2][2] - 1.0).abs() < 1e-12);
    }
}
