//! Z-score normalization statistics
//!
//! Statistics are computed on the training split only, per feature channel,
//! over the sample, node and time axes.

use ndarray::{Array4, Axis, Zip};
use ndarray_npy::{NpzReader, NpzWriter};
use std::fs::File;
use std::path::Path;

use crate::error::{DagcnError, Result};

/// Mean and standard deviation of one window component, shaped `(1, F, 1, 1)`
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentStats {
    pub mean: Array4<f32>,
    pub std: Array4<f32>,
}

impl ComponentStats {
    /// Per-feature statistics of a `(samples, features, nodes, time)` array
    pub fn fit(train: &Array4<f32>) -> Self {
        let features = train.dim().1;
        let mut mean = Array4::zeros((1, features, 1, 1));
        let mut std = Array4::ones((1, features, 1, 1));

        for (f, channel) in train.axis_iter(Axis(1)).enumerate() {
            let n = channel.len();
            if n == 0 {
                continue;
            }
            let m = channel.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            let var = channel
                .iter()
                .map(|&v| (v as f64 - m).powi(2))
                .sum::<f64>()
                / n as f64;
            let s = var.sqrt();
            mean[[0, f, 0, 0]] = m as f32;
            // constant channels are centred but not scaled
            std[[0, f, 0, 0]] = if s > f64::EPSILON { s as f32 } else { 1.0 };
        }

        Self { mean, std }
    }

    /// Standardise `x` in place
    pub fn normalize(&self, x: &mut Array4<f32>) {
        let mean = self.mean.broadcast(x.dim());
        let std = self.std.broadcast(x.dim());
        if let (Some(mean), Some(std)) = (mean, std) {
            Zip::from(x)
                .and(&mean)
                .and(&std)
                .for_each(|v, &m, &s| *v = (*v - m) / s);
        }
    }
}

/// Statistics of all three window components
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationStats {
    pub week: ComponentStats,
    pub day: ComponentStats,
    pub recent: ComponentStats,
}

impl NormalizationStats {
    /// Write `week_mean`, `week_std`, ... to a compressed `.npz` file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut npz = NpzWriter::new_compressed(File::create(path)?);
        for (name, stats) in self.components() {
            npz.add_array(format!("{}_mean", name), &stats.mean)?;
            npz.add_array(format!("{}_std", name), &stats.std)?;
        }
        npz.finish()?;
        Ok(())
    }

    /// Read statistics written by [`NormalizationStats::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut npz = NpzReader::new(File::open(path)?)?;
        let mut read = |name: &str| -> Result<ComponentStats> {
            Ok(ComponentStats {
                mean: read_npz_array(&mut npz, &format!("{}_mean", name))?,
                std: read_npz_array(&mut npz, &format!("{}_std", name))?,
            })
        };
        Ok(Self {
            week: read("week")?,
            day: read("day")?,
            recent: read("recent")?,
        })
    }

    fn components(&self) -> [(&'static str, &ComponentStats); 3] {
        [("week", &self.week), ("day", &self.day), ("recent", &self.recent)]
    }
}

/// Read an `f32` array by key, accepting archives written with or without
/// the `.npy` suffix on entry names
pub(crate) fn read_npz_array<D: ndarray::Dimension>(
    npz: &mut NpzReader<File>,
    key: &str,
) -> Result<ndarray::Array<f32, D>> {
    let entry = find_entry(npz, key)?;
    Ok(npz.by_name(&entry)?)
}

pub(crate) fn find_entry(npz: &mut NpzReader<File>, key: &str) -> Result<String> {
    let with_suffix = format!("{}.npy", key);
    npz.names()?
        .into_iter()
        .find(|name| name == key || *name == with_suffix)
        .ok_or_else(|| DagcnError::Dataset(format!("array '{}' not found in npz archive", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    #[test]
    fn test_fit_per_feature() {
        // feature 0 holds 1..=4, feature 1 is constant
        let x = Array4::from_shape_fn((2, 2, 1, 2), |(s, f, _, t)| {
            if f == 0 {
                (s * 2 + t + 1) as f32
            } else {
                5.0
            }
        });
        let stats = ComponentStats::fit(&x);
        assert_abs_diff_eq!(stats.mean[[0, 0, 0, 0]], 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(stats.std[[0, 0, 0, 0]], 1.25f32.sqrt(), epsilon = 1e-6);
        assert_eq!(stats.std[[0, 1, 0, 0]], 1.0);

        let mut y = x.clone();
        stats.normalize(&mut y);
        assert_abs_diff_eq!(y.index_axis(Axis(1), 1).sum(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y.index_axis(Axis(1), 0).sum(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_stats_file_roundtrip() {
        let x = Array4::from_shape_fn((3, 2, 2, 4), |(s, f, n, t)| (s + f * 3 + n + t) as f32);
        let c = ComponentStats::fit(&x);
        let stats = NormalizationStats {
            week: c.clone(),
            day: c.clone(),
            recent: c,
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("stats_data.npz");
        stats.save(&path).unwrap();
        let loaded = NormalizationStats::load(&path).unwrap();
        assert_eq!(loaded, stats);
    }
}
