//! Dataset provider
//!
//! This module provides:
//! - Reading the raw `(time, nodes, features)` signal from a `.npz` file
//! - Week / day / recent window extraction
//! - Train / validation / test splitting and z-score normalization
//! - Seeded batch iteration and tensor conversion

mod dataset;
mod stats;
mod tensor;
mod windows;

pub use dataset::{Batch, DataLoader, SplitData};
pub use stats::{ComponentStats, NormalizationStats};
pub use tensor::{to_array3, to_tensor};
pub use windows::{generate_windows, search_data, SampleIndices, WindowSet};

use ndarray::Array3;
use ndarray_npy::NpzReader;
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::error::{DagcnError, Result};
use crate::utils::DataConfig;

/// Train / validation / test splits with the statistics used to normalize them
#[derive(Debug, Clone)]
pub struct TrafficDataset {
    pub train: SplitData,
    pub val: SplitData,
    pub test: SplitData,
    pub stats: NormalizationStats,
}

impl TrafficDataset {
    /// Read the signal file named by `config` and build all splits
    pub fn load(config: &DataConfig) -> Result<Self> {
        let path = config.signal_file();
        info!("Reading graph signal matrix from {}", path.display());
        let signal = read_signal(&path)?;
        Self::from_signal(signal, config)
    }

    /// Window, split and normalize an in-memory `(time, nodes, features)` signal
    pub fn from_signal(signal: Array3<f32>, config: &DataConfig) -> Result<Self> {
        let num_nodes = signal.dim().1;
        if num_nodes != config.num_nodes {
            return Err(DagcnError::Dataset(format!(
                "signal has {} nodes but {} are configured",
                num_nodes, config.num_nodes
            )));
        }

        let windows = generate_windows(signal.view(), config)?;
        let total = windows.len();
        let split1 = (total as f64 * config.train_ratio) as usize;
        let split2 = split1 + (total as f64 * config.val_ratio) as usize;
        if split1 == 0 || split2 <= split1 || split2 >= total {
            return Err(DagcnError::Dataset(format!(
                "{} samples are too few for a train/val/test split",
                total
            )));
        }

        let all = SplitData {
            week: windows.week,
            day: windows.day,
            recent: windows.recent,
            target: windows.target,
        };
        let mut train = all.slice(0, split1);
        let mut val = all.slice(split1, split2);
        let mut test = all.slice(split2, total);
        drop(all);

        let stats = NormalizationStats {
            week: ComponentStats::fit(&train.week),
            day: ComponentStats::fit(&train.day),
            recent: ComponentStats::fit(&train.recent),
        };
        for split in [&mut train, &mut val, &mut test] {
            stats.week.normalize(&mut split.week);
            stats.day.normalize(&mut split.day);
            stats.recent.normalize(&mut split.recent);
        }

        info!(
            "Samples: train {} | val {} | test {} | recent window {:?}",
            train.len(),
            val.len(),
            test.len(),
            train.recent.dim()
        );

        Ok(Self {
            train,
            val,
            test,
            stats,
        })
    }
}

/// Read the `data` array of a PEMS `.npz` file as `f32`
pub fn read_signal<P: AsRef<Path>>(path: P) -> Result<Array3<f32>> {
    let mut npz = NpzReader::new(File::open(path.as_ref())?)?;
    let entry = stats::find_entry(&mut npz, "data")?;
    // PEMS archives ship float64; accept float32 as well
    let as_f64: std::result::Result<Array3<f64>, _> = npz.by_name(&entry);
    match as_f64 {
        Ok(values) => Ok(values.mapv(|v| v as f32)),
        Err(_) => {
            let values: Array3<f32> = npz.by_name(&entry)?;
            Ok(values)
        }
    }
}
