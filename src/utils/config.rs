//! Configuration management
//!
//! A single immutable [`Config`] is built once at start-up (defaults, then an
//! optional TOML file, then CLI overrides) and passed by reference to every
//! component constructor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DagcnError, Result};

/// Supported PEMS datasets, each with a fixed sensor count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatasetId {
    Pems04,
    Pems08,
}

impl DatasetId {
    /// Resolve the numeric dataset code used on the command line
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            4 => Ok(Self::Pems04),
            8 => Ok(Self::Pems08),
            other => Err(DagcnError::Config(format!(
                "unknown dataset code {} (expected 4 or 8)",
                other
            ))),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Pems04 => 4,
            Self::Pems08 => 8,
        }
    }

    /// Number of road sensors in the dataset
    pub fn num_nodes(&self) -> usize {
        match self {
            Self::Pems04 => 307,
            Self::Pems08 => 170,
        }
    }

    /// Directory name below the data root, e.g. `PEMS04`
    pub fn dir_name(&self) -> String {
        format!("PEMS0{}", self.code())
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// Base optimizer wrapped by Lookahead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    AdamW,
    Adam,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = DagcnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "adamw" => Ok(Self::AdamW),
            "adam" => Ok(Self::Adam),
            "sgd" | "momentum" => Ok(Self::Sgd),
            other => Err(DagcnError::Config(format!("unknown optimizer '{}'", other))),
        }
    }
}

/// Pairwise scoring used by the adaptive adjacency constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityMethod {
    Kl,
    Correlation,
}

/// Which support matrix the network receives at every step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportPolicy {
    /// Adaptive adjacency only
    Adaptive,
    /// Scaled Laplacian of the distance graph only
    Static,
    /// Element-wise sum of both
    Sum,
}

/// Data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root holding `PEMS04/`, `PEMS08/`
    pub data_dir: PathBuf,
    pub dataset: DatasetId,
    pub num_nodes: usize,
    pub num_of_weeks: usize,
    pub num_of_days: usize,
    pub num_of_hours: usize,
    pub points_per_hour: usize,
    pub num_for_predict: usize,
    pub train_ratio: f64,
    pub val_ratio: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            dataset: DatasetId::Pems04,
            num_nodes: 307,
            num_of_weeks: 2,
            num_of_days: 1,
            num_of_hours: 2,
            points_per_hour: 12,
            num_for_predict: 12,
            train_ratio: 0.6,
            val_ratio: 0.2,
        }
    }
}

impl DataConfig {
    pub fn distance_file(&self) -> PathBuf {
        self.data_dir
            .join(self.dataset.dir_name())
            .join("distance.csv")
    }

    pub fn signal_file(&self) -> PathBuf {
        self.data_dir
            .join(self.dataset.dir_name())
            .join(format!("pems0{}.npz", self.dataset.code()))
    }

    /// Length of the recent window in time steps
    pub fn recent_len(&self) -> usize {
        self.num_of_hours * self.num_for_predict
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub c_in: i64,
    pub c_out: i64,
    /// Recent window length consumed by the input layer
    pub length: i64,
    /// Chebyshev expansion order
    pub k: i64,
    /// Temporal kernel width (odd)
    pub kt: i64,
    pub num_blocks: usize,
    pub embed_dim: i64,
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            c_in: 1,
            c_out: 64,
            length: 24,
            k: 2,
            kt: 3,
            num_blocks: 2,
            embed_dim: 10,
            dropout: 0.1,
        }
    }
}

/// One-shot learning-rate drop triggered by validation loss
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LrDropConfig {
    pub enabled: bool,
    /// Fires once the best validation loss falls below this value
    pub threshold: f64,
    pub learning_rate: f64,
}

impl Default for LrDropConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 710.0,
            learning_rate: 0.0001,
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// `cpu`, `cuda` or `cuda:N`
    pub device: String,
    pub max_epoch: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Only used by the `sgd` optimizer
    pub momentum: f64,
    pub optimizer: OptimizerKind,
    pub weight_decay: f64,
    /// Per-epoch multiplicative learning-rate decay
    pub decay: f64,
    pub seed: u64,
    pub lookahead_k: usize,
    pub lookahead_alpha: f64,
    pub support_policy: SupportPolicy,
    pub lr_drop: LrDropConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            max_epoch: 70,
            batch_size: 18,
            learning_rate: 0.001,
            momentum: 0.9,
            optimizer: OptimizerKind::AdamW,
            weight_decay: 0.001,
            decay: 0.99,
            seed: 31150,
            lookahead_k: 5,
            lookahead_alpha: 0.5,
            support_policy: SupportPolicy::Adaptive,
            lr_drop: LrDropConfig::default(),
        }
    }
}

/// Adaptive adjacency configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjacencyConfig {
    pub method: AffinityMethod,
    /// Batch size of the offline adjacency pass
    pub batch_size: usize,
    /// Per-batch entries below `theta` are replaced by `gamma`
    pub theta: f64,
    pub gamma: f64,
    /// Scaling applied after averaging over batches
    pub scale: f64,
    /// `.npy` file holding the raw per-batch stack
    pub artifact: PathBuf,
    /// Read the stack from `artifact` instead of rebuilding it
    pub load_existing: bool,
}

impl Default for AdjacencyConfig {
    fn default() -> Self {
        Self {
            method: AffinityMethod::Kl,
            batch_size: 16,
            theta: 0.00001,
            gamma: 0.0,
            scale: 0.000001,
            artifact: PathBuf::from("adaptive_adjacency_stack.npy"),
            load_existing: false,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub params_dir: PathBuf,
    /// Remove an existing checkpoint directory instead of aborting
    pub force: bool,
    /// Epoch CSV log; a timestamped name is used when unset
    pub log_file: Option<PathBuf>,
    pub save_predictions: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            params_dir: PathBuf::from("dagcn_params"),
            force: true,
            log_file: None,
            save_predictions: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub adjacency: AdjacencyConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Model identifier used in checkpoint names
    pub fn model_name(&self) -> String {
        format!("DAGCN_params_{}", self.data.dataset.code())
    }

    /// Directory receiving checkpoints, stats and predictions
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output.params_dir.join(self.model_name())
    }

    /// Reject inconsistent settings before any computation starts
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(DagcnError::Config(msg));

        if self.data.num_nodes == 0 {
            return fail("num_nodes must be positive".into());
        }
        if self.data.num_nodes != self.data.dataset.num_nodes() {
            return fail(format!(
                "{} has {} sensors but num_nodes is {}",
                self.data.dataset,
                self.data.dataset.num_nodes(),
                self.data.num_nodes
            ));
        }
        if self.model.length as usize != self.data.recent_len() {
            return fail(format!(
                "recent window length {} does not match num_of_hours * num_for_predict = {}",
                self.model.length,
                self.data.recent_len()
            ));
        }
        if self.data.train_ratio <= 0.0 || self.data.train_ratio + self.data.val_ratio >= 1.0 {
            return fail("train_ratio + val_ratio must lie in (0, 1)".into());
        }
        if self.training.batch_size == 0 || self.adjacency.batch_size == 0 {
            return fail("batch sizes must be positive".into());
        }
        if self.training.max_epoch == 0 {
            return fail("max_epoch must be positive".into());
        }
        if !(self.training.decay > 0.0 && self.training.decay <= 1.0) {
            return fail(format!("decay {} must lie in (0, 1]", self.training.decay));
        }
        if self.training.lookahead_k == 0 {
            return fail("lookahead_k must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.training.lookahead_alpha) {
            return fail("lookahead_alpha must lie in [0, 1]".into());
        }
        if self.training.lr_drop.enabled
            && self.training.lr_drop.learning_rate >= self.training.learning_rate
        {
            return fail("lr_drop.learning_rate must be lower than learning_rate".into());
        }
        Ok(())
    }
}
