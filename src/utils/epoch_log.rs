//! Append-only per-epoch CSV log

use chrono::Local;
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Column order of every log line
pub const EPOCH_LOG_HEADER: [&str; 9] = [
    "seed",
    "epoch",
    "train_loss",
    "valid_loss",
    "learning_rate",
    "_MAE",
    "_MAPE",
    "_RMSE",
    "datetime",
];

/// One line of the epoch log
#[derive(Debug, Clone, Serialize)]
pub struct EpochRecord {
    pub seed: u64,
    pub epoch: usize,
    pub train_loss: f64,
    pub valid_loss: f64,
    pub learning_rate: f64,
    #[serde(rename = "_MAE")]
    pub mae: f64,
    #[serde(rename = "_MAPE")]
    pub mape: f64,
    #[serde(rename = "_RMSE")]
    pub rmse: f64,
    pub datetime: String,
}

impl EpochRecord {
    /// Current local time without commas, so a line always has nine fields
    pub fn timestamp_now() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

/// Handle on the log file
#[derive(Debug, Clone)]
pub struct EpochLog {
    path: PathBuf,
}

impl EpochLog {
    /// Open the log in append mode and write the header once for this run
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Self::open_append(&path)?);
        writer.write_record(EPOCH_LOG_HEADER)?;
        writer.flush()?;
        Ok(Self { path })
    }

    /// Append one record and flush immediately
    pub fn append(&self, record: &EpochRecord) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Self::open_append(&self.path)?);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}
