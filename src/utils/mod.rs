//! Utility module
//!
//! - Configuration management
//! - Logging setup
//! - Forecast metrics
//! - Append-only epoch log
//! - Progress bars

mod config;
mod epoch_log;
mod logging;
pub mod metrics;
mod progress;

pub use config::{
    AdjacencyConfig, AffinityMethod, Config, DataConfig, DatasetId, LoggingConfig, LrDropConfig,
    ModelConfig, OptimizerKind, OutputConfig, SupportPolicy, TrainingConfig,
};
pub use epoch_log::{EpochLog, EpochRecord, EPOCH_LOG_HEADER};
pub use logging::{level_for_verbosity, setup_logging};
pub use metrics::ForecastMetrics;
pub use progress::batch_progress;
