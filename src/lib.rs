//! # DAGCN traffic forecasting
//!
//! Spatio-temporal graph convolutional network for short-horizon forecasting
//! of road sensor readings (PEMS04 / PEMS08), driven by a data-dependent
//! adjacency matrix built from the training signals.
//!
//! ## Modules
//!
//! - `data`: signal loading, week/day/recent windows, normalization, batching
//! - `graph`: scaled Laplacian of the distance graph and the adaptive adjacency
//! - `model`: spatial attention, gated temporal and Chebyshev graph convolutions
//! - `training`: Lookahead optimizer, learning-rate schedule, trainer, checkpoints
//! - `utils`: configuration, logging, metrics, epoch log
//!
//! ## Example
//!
//! ```no_run
//! use dagcn_traffic::{global_adjacency, Config, Trainer, TrafficDataset};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let dataset = TrafficDataset::load(&config.data)?;
//!     let support = global_adjacency(
//!         &config.adjacency,
//!         &dataset.train,
//!         config.data.num_nodes,
//!         config.training.seed,
//!         &config.adjacency.artifact,
//!     )?;
//!
//!     let dir = config.checkpoint_dir();
//!     let mut trainer = Trainer::new(
//!         &config,
//!         &support,
//!         dataset.train.len(),
//!         &dir,
//!         &dir.join("log.csv"),
//!     )?;
//!     let report = trainer.run(&dataset)?;
//!     println!("best epoch {}: {}", report.best_epoch, report.metrics);
//!     Ok(())
//! }
//! ```

pub mod data;
pub mod error;
pub mod graph;
pub mod model;
pub mod training;
pub mod utils;

// Re-export main types for convenience
pub use data::{DataLoader, SplitData, TrafficDataset};
pub use error::{DagcnError, Result};
pub use graph::{global_adjacency, scaled_laplacian, AdaptiveAdjacency, AdjacencyStack};
pub use model::{ForecastNetwork, ForecastOutput, NetworkConfig};
pub use training::{FinalReport, Trainer, TrainerState};
pub use utils::{setup_logging, Config};
