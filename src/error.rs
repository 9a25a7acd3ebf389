//! Error types
//!
//! Every fallible library operation returns [`Result`]. Numeric corruption in
//! the adaptive adjacency is sanitised in place and never surfaces here.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the forecasting pipeline
#[derive(Error, Debug)]
pub enum DagcnError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Params folder {0} exists! Select a new params path or pass --force")]
    OutputDirExists(PathBuf),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Adaptive adjacency stack is empty; at least one training batch is required")]
    EmptyAdjacencyStack,

    #[error("Shape mismatch in {context}: expected {expected}, got {actual:?}")]
    Shape {
        context: &'static str,
        expected: String,
        actual: Vec<i64>,
    },

    #[error("Device error: {0}")]
    Device(String),

    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NPY read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error("NPY write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error("NPZ read error: {0}")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),

    #[error("NPZ write error: {0}")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl DagcnError {
    /// Build a shape error from a tensor size
    pub fn shape(context: &'static str, expected: impl Into<String>, actual: Vec<i64>) -> Self {
        Self::Shape {
            context,
            expected: expected.into(),
            actual,
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, DagcnError>;
