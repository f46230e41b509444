//! Two-dimensional embedding projection.
//!
//! A small principal-component analysis: center the retained vectors,
//! build the covariance matrix, extract the first axis by power iteration,
//! deflate, extract the second, then re-orthogonalize it. Initial vectors are
//! fixed, so the output is reproducible run to run.

use crate::model::{EmbeddingPoint, SENTINEL_CLUSTER, TweetRow, UserEmbeddings};
use crate::npy::DenseArray;
use rayon::prelude::*;
use tracing::debug;

/// Below this norm an axis is considered collapsed.
const DEGENERATE_NORM: f64 = 1e-10;

/// Power iteration limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionParams {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-9,
        }
    }
}

/// Project `matrix` to two dimensions. Row `i` of the matrix belongs to
/// `rows[i]`; only the overlapping prefix is used, and rows without a
/// cluster (or in the sentinel cluster) are dropped from both sides.
#[must_use]
pub fn project(rows: &[TweetRow], matrix: &DenseArray, params: ProjectionParams) -> UserEmbeddings {
    let limit = rows.len().min(matrix.rows());
    let retained: Vec<usize> = (0..limit)
        .filter(|&i| {
            let cluster = rows[i].cluster_id.as_str();
            !cluster.is_empty() && cluster != SENTINEL_CLUSTER
        })
        .collect();

    let one_dimensional = matrix.shape.len() == 1;
    let original_dimensions = if one_dimensional { 1 } else { matrix.cols() };
    let vectors: Vec<Vec<f64>> = retained.iter().map(|&i| matrix.row(i)).collect();

    let coords = if one_dimensional {
        project_scalar(&vectors)
    } else {
        project_pca(&vectors, original_dimensions, params)
    };

    let embeddings = retained
        .iter()
        .zip(coords)
        .map(|(&i, (x, y))| EmbeddingPoint {
            tweet_id: rows[i].tweet_id.clone(),
            cluster_id: rows[i].cluster_id.clone(),
            x,
            y,
        })
        .collect::<Vec<_>>();

    debug!(
        points = embeddings.len(),
        dimensions = original_dimensions,
        "Projected embeddings"
    );
    UserEmbeddings {
        embeddings,
        original_dimensions,
    }
}

#[allow(clippy::cast_precision_loss)]
fn column_mean(vectors: &[Vec<f64>], dims: usize) -> Vec<f64> {
    let mut mean = vec![0.0; dims];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    let n = vectors.len().max(1) as f64;
    mean.iter_mut().for_each(|m| *m /= n);
    mean
}

fn project_scalar(vectors: &[Vec<f64>]) -> Vec<(f64, f64)> {
    let mean = column_mean(vectors, 1);
    vectors.iter().map(|v| (v[0] - mean[0], 0.0)).collect()
}

fn project_pca(vectors: &[Vec<f64>], dims: usize, params: ProjectionParams) -> Vec<(f64, f64)> {
    if vectors.is_empty() || dims == 0 {
        return Vec::new();
    }
    let mean = column_mean(vectors, dims);
    let centered: Vec<Vec<f64>> = vectors
        .iter()
        .map(|v| v.iter().zip(&mean).map(|(x, m)| x - m).collect())
        .collect();

    let cov = covariance(&centered, dims);

    let first = power_iteration(&cov, params).unwrap_or_else(|| axis(dims, 0));
    let lambda = dot(&first, &mat_vec(&cov, &first));
    let deflated: Vec<Vec<f64>> = cov
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(|(j, c)| c - lambda * first[i] * first[j])
                .collect()
        })
        .collect();

    let second = power_iteration(&deflated, params)
        .and_then(|mut v| {
            let overlap = dot(&v, &first);
            v.iter_mut().zip(&first).for_each(|(x, f)| *x -= overlap * f);
            normalize(&mut v).then_some(v)
        })
        .unwrap_or_else(|| fallback_axis(&first));

    centered
        .iter()
        .map(|v| (dot(v, &first), dot(v, &second)))
        .collect()
}

/// Covariance of centered vectors (sample covariance; population for n = 1).
#[allow(clippy::cast_precision_loss)]
fn covariance(centered: &[Vec<f64>], dims: usize) -> Vec<Vec<f64>> {
    let n = centered.len();
    let denom = if n > 1 { (n - 1) as f64 } else { 1.0 };
    let columns: Vec<Vec<f64>> = (0..dims)
        .map(|j| centered.iter().map(|v| v[j]).collect())
        .collect();

    (0..dims)
        .into_par_iter()
        .map(|a| {
            (0..dims)
                .map(|b| dot(&columns[a], &columns[b]) / denom)
                .collect()
        })
        .collect()
}

/// Dominant eigenvector of a symmetric matrix, or `None` when it collapses.
fn power_iteration(matrix: &[Vec<f64>], params: ProjectionParams) -> Option<Vec<f64>> {
    let dims = matrix.len();
    let mut v = initial_vector(dims);
    normalize(&mut v);

    for _ in 0..params.max_iterations {
        let mut next = mat_vec(matrix, &v);
        if !normalize(&mut next) {
            return None;
        }
        let delta = next
            .iter()
            .zip(&v)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        v = next;
        if delta < params.tolerance {
            break;
        }
    }
    Some(v)
}

#[allow(clippy::cast_precision_loss)]
fn initial_vector(dims: usize) -> Vec<f64> {
    // Golden-ratio sequence: fixed, and unlikely to be orthogonal to any axis.
    (0..dims)
        .map(|i| ((i as f64 + 1.0) * 0.618_033_988_749_895).fract() + 0.1)
        .collect()
}

fn fallback_axis(first: &[f64]) -> Vec<f64> {
    let dims = first.len();
    if dims < 2 {
        return vec![0.0; dims];
    }
    if first[1].abs() > 0.9 {
        axis(dims, 0)
    } else {
        axis(dims, 1)
    }
}

fn axis(dims: usize, index: usize) -> Vec<f64> {
    let mut v = vec![0.0; dims];
    if let Some(slot) = v.get_mut(index) {
        *slot = 1.0;
    }
    v
}

/// Scale to unit length; false if the vector is (near) zero.
fn normalize(v: &mut [f64]) -> bool {
    let norm = dot(v, v).sqrt();
    if !norm.is_finite() || norm < DEGENERATE_NORM {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    true
}

fn mat_vec(matrix: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    matrix.iter().map(|row| dot(row, v)).collect()
}

/// Dot product, four lanes at a time.
#[inline]
#[must_use]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    use wide::f64x4;

    debug_assert_eq!(a.len(), b.len(), "vectors must have same dimension");

    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f64x4::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        sum += f64x4::from([ca[0], ca[1], ca[2], ca[3]]) * f64x4::from([cb[0], cb[1], cb[2], cb[3]]);
    }

    let mut scalar_sum = sum.reduce_add();
    for (x, y) in remainder_a.iter().zip(remainder_b) {
        scalar_sum += x * y;
    }
    scalar_sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npy::Elements;

    fn rows(clusters: &[&str]) -> Vec<TweetRow> {
        clusters
            .iter()
            .enumerate()
            .map(|(i, c)| TweetRow {
                tweet_id: format!("t{i}"),
                cluster_id: (*c).to_string(),
                ..TweetRow::default()
            })
            .collect()
    }

    fn matrix(data: Vec<f64>, shape: &[usize]) -> DenseArray {
        DenseArray {
            shape: shape.to_vec(),
            data: Elements::F64(data),
        }
    }

    #[test]
    fn dot_handles_remainders() {
        let a: Vec<f64> = (1..=7).map(f64::from).collect();
        let expected: f64 = a.iter().map(|x| x * x).sum();
        assert!((dot(&a, &a) - expected).abs() < 1e-9);
    }

    #[test]
    fn alignment_is_positional_and_bounded() {
        let rows = rows(&["a", "b", "c", "d", "e"]);
        let m = matrix(vec![0.0, 1.0, 2.0, 3.0, 4.0, 6.0], &[3, 2]);
        let out = project(&rows, &m, ProjectionParams::default());
        assert_eq!(out.embeddings.len(), 3);
        assert_eq!(out.original_dimensions, 2);
        for (i, point) in out.embeddings.iter().enumerate() {
            assert_eq!(point.tweet_id, format!("t{i}"));
        }
    }

    #[test]
    fn sentinel_and_empty_clusters_are_dropped_in_lockstep() {
        let rows = rows(&["a", "-1", "", "b"]);
        let m = matrix(vec![1.0, 0.0, 9.0, 9.0, 9.0, 9.0, -1.0, 0.0], &[4, 2]);
        let out = project(&rows, &m, ProjectionParams::default());
        let ids: Vec<&str> = out.embeddings.iter().map(|p| p.tweet_id.as_str()).collect();
        assert_eq!(ids, ["t0", "t3"]);
        // Two points on the x axis project symmetrically along the first axis.
        assert!((out.embeddings[0].x + out.embeddings[1].x).abs() < 1e-9);
        assert!((out.embeddings[0].x.abs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn first_axis_follows_dominant_variance() {
        // Points spread along (1, 1) with a little noise along (1, -1).
        let data = vec![
            -2.0, -2.1, -1.0, -0.9, 0.0, 0.1, 1.0, 0.9, 2.0, 2.1,
        ];
        let rows = rows(&["a"; 5]);
        let m = matrix(data, &[5, 2]);
        let out = project(&rows, &m, ProjectionParams::default());
        let xs: Vec<f64> = out.embeddings.iter().map(|p| p.x.abs()).collect();
        let ys: Vec<f64> = out.embeddings.iter().map(|p| p.y.abs()).collect();
        let spread_x: f64 = xs.iter().sum();
        let spread_y: f64 = ys.iter().sum();
        assert!(spread_x > 10.0 * spread_y);
    }

    #[test]
    fn projection_is_deterministic() {
        let data: Vec<f64> = (0..40).map(|i| f64::from(i * 7 % 11)).collect();
        let rows = rows(&["a"; 10]);
        let m = matrix(data, &[10, 4]);
        let a = project(&rows, &m, ProjectionParams::default());
        let b = project(&rows, &m, ProjectionParams::default());
        assert_eq!(a, b);
    }

    #[test]
    fn degenerate_data_uses_fallback_axis() {
        let rows = rows(&["a", "a", "a"]);
        let m = matrix(vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0], &[3, 2]);
        let out = project(&rows, &m, ProjectionParams::default());
        assert!(out.embeddings.iter().all(|p| p.x == 0.0 && p.y == 0.0));
    }

    #[test]
    fn one_dimensional_input_is_centered() {
        let rows = rows(&["a", "a", "a"]);
        let m = matrix(vec![1.0, 2.0, 6.0], &[3]);
        let out = project(&rows, &m, ProjectionParams::default());
        let xs: Vec<f64> = out.embeddings.iter().map(|p| p.x).collect();
        assert_eq!(xs, [-2.0, -1.0, 3.0]);
        assert!(out.embeddings.iter().all(|p| p.y == 0.0));
        assert_eq!(out.original_dimensions, 1);
    }
}
