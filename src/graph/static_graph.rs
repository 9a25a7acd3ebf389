//! Static distance graph
//!
//! Reads the `from,to,cost` edge list of a PEMS dataset into a binary
//! adjacency matrix and converts it to the scaled Laplacian
//! `L~ = 2L / lambda_max - I` used as the static support.

use csv::ReaderBuilder;
use ndarray::{Array1, Array2, Axis};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::error::{DagcnError, Result};

const POWER_ITERATIONS: usize = 200;

#[derive(Debug, Deserialize)]
struct EdgeRecord {
    from: f64,
    to: f64,
    #[allow(dead_code)]
    cost: f64,
}

/// Build an `N x N` adjacency matrix from a distance CSV
///
/// Every listed pair gets weight 1. Edges referencing nodes outside
/// `0..num_nodes` are a dataset error.
pub fn load_adjacency_matrix<P: AsRef<Path>>(path: P, num_nodes: usize) -> Result<Array2<f64>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path.as_ref())?;

    let mut adj = Array2::zeros((num_nodes, num_nodes));
    let mut edges = 0usize;
    for record in reader.deserialize() {
        let edge: EdgeRecord = record?;
        let (i, j) = (edge.from as usize, edge.to as usize);
        if i >= num_nodes || j >= num_nodes {
            return Err(DagcnError::Dataset(format!(
                "edge ({}, {}) outside of {} nodes",
                i, j, num_nodes
            )));
        }
        adj[[i, j]] = 1.0;
        edges += 1;
    }
    debug!("Loaded {} edges for {} nodes", edges, num_nodes);

    Ok(adj)
}

/// Largest eigenvalue of a symmetric positive semi-definite matrix
fn largest_eigenvalue(m: &Array2<f64>) -> f64 {
    let n = m.nrows();
    if n == 0 {
        return 0.0;
    }
    // non-uniform start avoids orthogonality with the leading eigenvector
    let mut v = Array1::from_shape_fn(n, |i| 1.0 + i as f64 / n as f64);
    let norm = v.dot(&v).sqrt();
    v /= norm;

    let mut lambda = 0.0;
    for _ in 0..POWER_ITERATIONS {
        let w = m.dot(&v);
        let w_norm = w.dot(&w).sqrt();
        if w_norm <= f64::EPSILON {
            return 0.0;
        }
        lambda = v.dot(&w);
        v = w / w_norm;
    }
    lambda
}

/// Scaled graph Laplacian `2L / lambda_max - I`
///
/// The input is symmetrized first. A graph without edges has `L = 0` and maps
/// to `-I`, so the result is always finite for non-negative inputs.
pub fn scaled_laplacian(adj: &Array2<f64>) -> Result<Array2<f64>> {
    let (rows, cols) = adj.dim();
    if rows != cols {
        return Err(DagcnError::shape(
            "scaled_laplacian",
            "square adjacency",
            vec![rows as i64, cols as i64],
        ));
    }

    let w = (adj + &adj.t()) / 2.0;
    let degree = w.sum_axis(Axis(1));
    let mut laplacian = -&w;
    for i in 0..rows {
        laplacian[[i, i]] += degree[i];
    }

    let lambda_max = largest_eigenvalue(&laplacian);
    let mut scaled = if lambda_max > f64::EPSILON {
        laplacian * (2.0 / lambda_max)
    } else {
        Array2::zeros((rows, cols))
    };
    for i in 0..rows {
        scaled[[i, i]] -= 1.0;
    }
    scaled.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });

    Ok(scaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_adjacency_matrix() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "from,to,cost").unwrap();
        writeln!(file, "0,1,393.0").unwrap();
        writeln!(file, "1,2,211.5").unwrap();
        let adj = load_adjacency_matrix(file.path(), 3).unwrap();
        assert_eq!(adj[[0, 1]], 1.0);
        assert_eq!(adj[[1, 2]], 1.0);
        assert_eq!(adj[[1, 0]], 0.0);
        assert_eq!(adj.sum(), 2.0);
    }

    #[test]
    fn test_edge_out_of_range() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "from,to,cost").unwrap();
        writeln!(file, "0,5,1.0").unwrap();
        assert!(load_adjacency_matrix(file.path(), 3).is_err());
    }

    #[test]
    fn test_scaled_laplacian_path_graph() {
        // path 0 - 1: L = [[1, -1], [-1, 1]], lambda_max = 2
        let adj = Array2::from_shape_vec((2, 2), vec![0.0, 1.0, 1.0, 0.0]).unwrap();
        let l = scaled_laplacian(&adj).unwrap();
        assert_abs_diff_eq!(l[[0, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(l[[0, 1]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(l[[1, 0]], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_edgeless_graph_is_finite() {
        let l = scaled_laplacian(&Array2::zeros((4, 4))).unwrap();
        assert!(l.iter().all(|v| v.is_finite()));
        assert_eq!(l, -Array2::<f64>::eye(4));
    }

    #[test]
    fn test_random_nonnegative_distances_are_finite() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for n in [1usize, 3, 8, 20] {
            let adj = Array2::from_shape_fn((n, n), |_| {
                if rng.gen_bool(0.3) {
                    rng.gen_range(0.0..500.0)
                } else {
                    0.0
                }
            });
            let l = scaled_laplacian(&adj).unwrap();
            assert!(l.iter().all(|v| v.is_finite()), "n = {}", n);
        }
    }
}
