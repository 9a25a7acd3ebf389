//! Checkpoint directory and file naming

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{DagcnError, Result};

/// Create the checkpoint directory
///
/// An existing directory aborts the run unless `force` is set, in which case
/// it is removed and recreated empty.
pub fn prepare_checkpoint_dir(dir: &Path, force: bool) -> Result<()> {
    if dir.exists() {
        if !force {
            return Err(DagcnError::OutputDirExists(dir.to_path_buf()));
        }
        warn!("Removing existing params folder {}", dir.display());
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    info!("Created params folder {}", dir.display());
    Ok(())
}

/// `{model_name}_epoch_{epoch}_{val_loss}.params`, loss rounded to two decimals
pub fn checkpoint_path(dir: &Path, model_name: &str, epoch: usize, val_loss: f64) -> PathBuf {
    dir.join(format!(
        "{}_epoch_{}_{}.params",
        model_name,
        epoch,
        rounded_loss(val_loss)
    ))
}

/// Two decimals without trailing zeros, keeping one digit after the point
fn rounded_loss(value: f64) -> String {
    let mut s = format!("{:.2}", value);
    if s.contains('.') {
        while s.ends_with('0') && !s.ends_with(".0") {
            s.pop();
        }
    }
    s
}

/// Every `.params` file in `dir`, sorted by name
pub fn list_checkpoints(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "params") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
