//! Training and evaluation
//!
//! This module provides:
//! - Lookahead-wrapped optimizers with exponential decay and a one-shot
//!   learning-rate drop
//! - Per-epoch history and best-epoch selection
//! - Checkpoint directory handling
//! - The trainer state machine

mod checkpoint;
mod history;
mod optim;
mod trainer;

pub use checkpoint::{checkpoint_path, list_checkpoints, prepare_checkpoint_dir};
pub use history::{best_epoch, EpochSummary, TrainingHistory};
pub use optim::{build_base_optimizer, ExponentialDecay, Lookahead, LrDropRule, OptimizerPhase};
pub use trainer::{
    parse_device, select_support, FinalReport, TestPrediction, Trainer, TrainerState,
};
