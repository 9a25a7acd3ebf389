//! Adaptive adjacency from observed signals
//!
//! One `N x N` affinity matrix is built per mini-batch of recent windows over
//! the whole training split. The per-batch matrices are stacked, optionally
//! persisted, and aggregated once into the global adaptive support:
//! non-finite entries become zero, the stack is averaged over batches and the
//! mean is scaled down to the magnitude of the static support.

use ndarray::{Array2, Array3, ArrayView4, Axis};
use ndarray_npy::{read_npy, write_npy};
use std::path::Path;
use tracing::{debug, info};

use crate::data::{DataLoader, SplitData};
use crate::error::{DagcnError, Result};
use crate::utils::{batch_progress, AdjacencyConfig, AffinityMethod};

const LOG_FLOOR: f64 = 1e-12;

/// Pairwise node scoring
///
/// Implementations receive one profile row per node and must return a
/// symmetric matrix with entries in `[0, 1]` that depends only on the input.
pub trait AffinityKernel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score every node pair of an `(nodes, profile_len)` matrix
    fn affinity(&self, profiles: &Array2<f64>) -> Array2<f64>;
}

/// Symmetric KL divergence between softmax-normalized node series
///
/// `a_ij = exp(-(KL(p_i || p_j) + KL(p_j || p_i)) / 2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct KlKernel;

impl AffinityKernel for KlKernel {
    fn name(&self) -> &'static str {
        "kl"
    }

    fn affinity(&self, profiles: &Array2<f64>) -> Array2<f64> {
        let p = row_softmax(profiles);
        let log_p = p.mapv(|v| v.max(LOG_FLOOR).ln());
        // cross[i, j] = sum_t p_i(t) * ln p_j(t)
        let cross = p.dot(&log_p.t());

        let n = p.nrows();
        let mut out = Array2::zeros((n, n));
        for i in 0..n {
            out[[i, i]] = 1.0;
            for j in (i + 1)..n {
                let sym_kl = cross[[i, i]] + cross[[j, j]] - cross[[i, j]] - cross[[j, i]];
                // a corrupted profile yields NaN, which aggregation zeroes
                let a = if sym_kl.is_finite() {
                    (-0.5 * sym_kl.max(0.0)).exp()
                } else {
                    f64::NAN
                };
                out[[i, j]] = a;
                out[[j, i]] = a;
            }
        }
        out
    }
}

/// Absolute Pearson correlation between node series
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationKernel;

impl AffinityKernel for CorrelationKernel {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn affinity(&self, profiles: &Array2<f64>) -> Array2<f64> {
        let (n, len) = profiles.dim();
        let mut z = profiles.clone();
        for mut row in z.rows_mut() {
            let mean = row.mean().unwrap_or(0.0);
            let std = row.std(0.0);
            if std > f64::EPSILON {
                row.mapv_inplace(|v| (v - mean) / std);
            } else {
                row.fill(0.0);
            }
        }
        let corr = z.dot(&z.t()) / len.max(1) as f64;

        let mut out = Array2::zeros((n, n));
        for i in 0..n {
            out[[i, i]] = 1.0;
            for j in (i + 1)..n {
                let a = corr[[i, j]].abs().min(1.0);
                out[[i, j]] = a;
                out[[j, i]] = a;
            }
        }
        out
    }
}

/// Kernel selected by configuration
pub fn kernel_for(method: AffinityMethod) -> Box<dyn AffinityKernel> {
    match method {
        AffinityMethod::Kl => Box::new(KlKernel),
        AffinityMethod::Correlation => Box::new(CorrelationKernel),
    }
}

/// Flatten a `(batch, channels, nodes, time)` window into one row per node
pub fn node_profiles(batch: ArrayView4<f32>) -> Array2<f64> {
    let (b, c, n, t) = batch.dim();
    let mut profiles = Array2::zeros((n, b * c * t));
    for node in 0..n {
        let series = batch.index_axis(Axis(2), node);
        for (dst, &src) in profiles.row_mut(node).iter_mut().zip(series.iter()) {
            *dst = src as f64;
        }
    }
    profiles
}

fn row_softmax(x: &Array2<f64>) -> Array2<f64> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 && sum.is_finite() {
            row /= sum;
        }
    }
    out
}

/// Builds per-batch adjacency matrices
pub struct AdaptiveAdjacency {
    kernel: Box<dyn AffinityKernel>,
    num_nodes: usize,
    theta: f64,
    gamma: f64,
}

impl AdaptiveAdjacency {
    pub fn new(kernel: Box<dyn AffinityKernel>, num_nodes: usize, theta: f64, gamma: f64) -> Self {
        Self {
            kernel,
            num_nodes,
            theta,
            gamma,
        }
    }

    pub fn from_config(config: &AdjacencyConfig, num_nodes: usize) -> Self {
        Self::new(
            kernel_for(config.method),
            num_nodes,
            config.theta,
            config.gamma,
        )
    }

    /// Adjacency of one `(batch, channels, nodes, time)` window batch
    pub fn build(&self, batch: ArrayView4<f32>) -> Result<Array2<f32>> {
        let dim = batch.dim();
        if dim.2 != self.num_nodes {
            return Err(DagcnError::shape(
                "adaptive adjacency batch",
                format!("(batch, channels, {}, time)", self.num_nodes),
                vec![dim.0 as i64, dim.1 as i64, dim.2 as i64, dim.3 as i64],
            ));
        }

        let scores = self.kernel.affinity(&node_profiles(batch));
        Ok(scores.mapv(|v| {
            if v < self.theta {
                self.gamma as f32
            } else {
                v as f32
            }
        }))
    }

    /// One matrix per mini-batch over the whole split
    ///
    /// The pass uses its own batch size and a seeded shuffle, independent of
    /// the training loader.
    pub fn build_stack(&self, split: &SplitData, batch_size: usize, seed: u64) -> Result<AdjacencyStack> {
        let loader = DataLoader::new(split.len(), batch_size, true, seed);
        let pb = batch_progress(loader.num_batches(), "adjacency");
        info!(
            "Constructing global adjacency with the {} kernel over {} batches",
            self.kernel.name(),
            loader.num_batches()
        );

        let mut matrices = Vec::with_capacity(loader.num_batches());
        for indices in loader {
            let batch = split.batch(&indices);
            matrices.push(self.build(batch.recent.view())?);
            pb.inc(1);
        }
        pb.finish_and_clear();

        AdjacencyStack::from_matrices(matrices)
    }
}

/// Stack of per-batch matrices, `(batches, nodes, nodes)`
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyStack {
    matrices: Array3<f32>,
}

impl AdjacencyStack {
    /// Stack per-batch matrices; an empty list is a configuration error
    pub fn from_matrices(matrices: Vec<Array2<f32>>) -> Result<Self> {
        let first = matrices.first().ok_or(DagcnError::EmptyAdjacencyStack)?;
        let (n, m) = first.dim();
        let mut stack = Array3::zeros((matrices.len(), n, m));
        for (i, mat) in matrices.iter().enumerate() {
            if mat.dim() != (n, m) {
                return Err(DagcnError::shape(
                    "adjacency stack",
                    format!("({}, {})", n, m),
                    vec![mat.nrows() as i64, mat.ncols() as i64],
                ));
            }
            stack.index_axis_mut(Axis(0), i).assign(mat);
        }
        Self::from_array(stack)
    }

    /// Wrap a raw `(batches, nodes, nodes)` array
    pub fn from_array(matrices: Array3<f32>) -> Result<Self> {
        let (b, n, m) = matrices.dim();
        if b == 0 {
            return Err(DagcnError::EmptyAdjacencyStack);
        }
        if n != m {
            return Err(DagcnError::shape(
                "adjacency stack",
                "(batches, N, N)",
                vec![b as i64, n as i64, m as i64],
            ));
        }
        Ok(Self { matrices })
    }

    pub fn len(&self) -> usize {
        self.matrices.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_nodes(&self) -> usize {
        self.matrices.dim().1
    }

    pub fn matrices(&self) -> &Array3<f32> {
        &self.matrices
    }

    /// Persist the raw stack as `.npy`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_npy(path.as_ref(), &self.matrices)?;
        info!("Saved adjacency stack {:?} to {}", self.matrices.dim(), path.as_ref().display());
        Ok(())
    }

    /// Load a stack written by [`AdjacencyStack::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let matrices: Array3<f32> = read_npy(path.as_ref())?;
        debug!("Loaded adjacency stack {:?}", matrices.dim());
        Self::from_array(matrices)
    }

    /// Sanitize, average over batches and scale
    ///
    /// Deterministic: the batch sum runs in a fixed order in `f64`.
    pub fn aggregate(&self, scale: f64) -> Array2<f32> {
        let (b, n, m) = self.matrices.dim();
        let mut sum = Array2::<f64>::zeros((n, m));
        for mat in self.matrices.axis_iter(Axis(0)) {
            sum.zip_mut_with(&mat, |acc, &v| {
                *acc += if v.is_finite() { v as f64 } else { 0.0 };
            });
        }
        sum.mapv(|v| {
            let out = (v / b as f64 * scale) as f32;
            if out.is_finite() {
                out
            } else {
                0.0
            }
        })
    }
}

/// Build (or read back) the stack over `split` and aggregate it
///
/// With `load_existing` the stack comes from `artifact`; otherwise it is
/// rebuilt and written there. Aggregation always runs on the loaded stack.
pub fn global_adjacency(
    config: &AdjacencyConfig,
    split: &SplitData,
    num_nodes: usize,
    seed: u64,
    artifact: &Path,
) -> Result<Array2<f32>> {
    let stack = if config.load_existing {
        info!("Loading adjacency stack from {}", artifact.display());
        AdjacencyStack::load(artifact)?
    } else {
        let stack = AdaptiveAdjacency::from_config(config, num_nodes).build_stack(
            split,
            config.batch_size,
            seed,
        )?;
        stack.save(artifact)?;
        stack
    };
    if stack.num_nodes() != num_nodes {
        return Err(DagcnError::shape(
            "adjacency stack",
            format!("(batches, {}, {})", num_nodes, num_nodes),
            vec![stack.len() as i64, stack.num_nodes() as i64, stack.num_nodes() as i64],
        ));
    }
    Ok(stack.aggregate(config.scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn random_batch(seed: u64, b: usize, n: usize, t: usize) -> Array4<f32> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        Array4::from_shape_fn((b, 1, n, t), |_| rng.gen_range(-2.0..2.0))
    }

    fn assert_symmetric_bounded(a: &Array2<f32>) {
        let n = a.nrows();
        for i in 0..n {
            for j in 0..n {
                assert_eq!(a[[i, j]], a[[j, i]]);
                assert!((0.0..=1.0).contains(&a[[i, j]]));
            }
        }
    }

    #[test]
    fn test_kernels_symmetric_bounded_deterministic() {
        let batch = random_batch(1, 4, 6, 12);
        for method in [AffinityMethod::Kl, AffinityMethod::Correlation] {
            let builder = AdaptiveAdjacency::new(kernel_for(method), 6, 1e-5, 0.0);
            let a = builder.build(batch.view()).unwrap();
            let b = builder.build(batch.view()).unwrap();
            assert_eq!(a.dim(), (6, 6));
            assert_symmetric_bounded(&a);
            assert_eq!(a, b);
            assert_eq!(a[[2, 2]], 1.0);
        }
    }

    #[test]
    fn test_kl_identical_nodes_score_one() {
        let mut batch = random_batch(2, 2, 3, 8);
        let copy = batch.index_axis(Axis(2), 0).to_owned();
        batch.index_axis_mut(Axis(2), 1).assign(&copy);
        let a = KlKernel.affinity(&node_profiles(batch.view()));
        assert!((a[[0, 1]] - 1.0).abs() < 1e-9);
        assert!(a[[0, 2]] < 1.0);
    }

    #[test]
    fn test_threshold_zeroes_small_scores() {
        let builder = AdaptiveAdjacency::new(Box::new(CorrelationKernel), 3, 0.5, 0.0);
        // node 2 is constant, so its correlation with everything is zero
        let batch = Array4::from_shape_fn((1, 1, 3, 4), |(_, _, n, t)| match n {
            0 => t as f32,
            1 => 2.0 * t as f32,
            _ => 1.0,
        });
        let a = builder.build(batch.view()).unwrap();
        assert!((a[[0, 1]] - 1.0).abs() < 1e-6);
        assert_eq!(a[[0, 2]], 0.0);
    }

    #[test]
    fn test_wrong_node_count() {
        let builder = AdaptiveAdjacency::new(Box::new(KlKernel), 5, 1e-5, 0.0);
        let batch = random_batch(3, 2, 4, 6);
        assert!(matches!(
            builder.build(batch.view()),
            Err(DagcnError::Shape { .. })
        ));
    }

    #[test]
    fn test_empty_stack_is_error() {
        assert!(matches!(
            AdjacencyStack::from_matrices(Vec::new()),
            Err(DagcnError::EmptyAdjacencyStack)
        ));
        assert!(matches!(
            AdjacencyStack::from_array(Array3::zeros((0, 3, 3))),
            Err(DagcnError::EmptyAdjacencyStack)
        ));
    }

    #[test]
    fn test_aggregate_sanitizes_and_scales() {
        let mut a = Array2::from_elem((2, 2), 2.0f32);
        a[[0, 1]] = f32::NAN;
        let mut b = Array2::from_elem((2, 2), 4.0f32);
        b[[1, 0]] = f32::INFINITY;
        b[[0, 1]] = f32::NEG_INFINITY;
        let stack = AdjacencyStack::from_matrices(vec![a, b]).unwrap();

        let agg = stack.aggregate(0.5);
        assert!(agg.iter().all(|v| v.is_finite()));
        assert_eq!(agg[[0, 0]], 1.5);
        assert_eq!(agg[[0, 1]], 0.0);
        assert_eq!(agg[[1, 0]], 0.5);
    }

    #[test]
    fn test_nan_sample_disconnects_node() {
        let mut batch = random_batch(5, 2, 3, 4);
        batch[[0, 0, 1, 2]] = f32::NAN;
        for method in [AffinityMethod::Kl, AffinityMethod::Correlation] {
            let builder = AdaptiveAdjacency::new(kernel_for(method), 3, 1e-5, 0.0);
            let matrix = builder.build(batch.view()).unwrap();
            let agg = AdjacencyStack::from_matrices(vec![matrix]).unwrap().aggregate(1.0);
            assert!(agg.iter().all(|v| v.is_finite()));
            for (i, j) in [(0, 1), (1, 0), (1, 2), (2, 1)] {
                assert_eq!(agg[[i, j]], 0.0, "{:?} entry ({}, {})", method, i, j);
            }
            assert!(agg[[0, 2]] > 0.0);
        }
    }

    #[test]
    fn test_aggregate_is_bit_identical() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let matrices = (0..5)
            .map(|_| {
                Array2::from_shape_fn((7, 7), |_| {
                    if rng.gen_bool(0.1) {
                        f32::NAN
                    } else {
                        rng.gen_range(0.0..1.0)
                    }
                })
            })
            .collect();
        let stack = AdjacencyStack::from_matrices(matrices).unwrap();
        let first = stack.aggregate(1e-6);
        let second = stack.aggregate(1e-6);
        let bits = |m: &Array2<f32>| m.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_global_adjacency_rebuild_then_load() {
        let split = SplitData {
            week: Array4::zeros((5, 1, 3, 4)),
            day: Array4::zeros((5, 1, 3, 2)),
            recent: random_batch(4, 5, 3, 4),
            target: Array3::zeros((5, 3, 2)),
        };
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("stack.npy");
        let mut config = AdjacencyConfig {
            batch_size: 2,
            scale: 1.0,
            ..Default::default()
        };

        let built = global_adjacency(&config, &split, 3, 1, &artifact).unwrap();
        assert_eq!(AdjacencyStack::load(&artifact).unwrap().len(), 3);

        config.load_existing = true;
        let loaded = global_adjacency(&config, &split, 3, 1, &artifact).unwrap();
        assert_eq!(built, loaded);
        assert!(global_adjacency(&config, &split, 4, 1, &artifact).is_err());
    }

    #[test]
    fn test_stack_artifact_roundtrip() {
        let stack = AdjacencyStack::from_matrices(vec![
            Array2::eye(3),
            Array2::from_elem((3, 3), 0.25),
        ])
        .unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("stack.npy");
        stack.save(&path).unwrap();
        let loaded = AdjacencyStack::load(&path).unwrap();
        assert_eq!(loaded, stack);
        assert_eq!(loaded.aggregate(1.0), stack.aggregate(1.0));
    }
}
