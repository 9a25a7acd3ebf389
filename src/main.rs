//! Train and evaluate the DAGCN forecaster
//!
//! Pipeline: configuration, checkpoint folder, dataset and normalization
//! statistics, static and adaptive supports, training, best-checkpoint test.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use dagcn_traffic::graph::{global_adjacency, load_adjacency_matrix, scaled_laplacian};
use dagcn_traffic::training::{prepare_checkpoint_dir, select_support};
use dagcn_traffic::utils::{level_for_verbosity, DatasetId, OptimizerKind, SupportPolicy};
use dagcn_traffic::{setup_logging, Config, Trainer, TrafficDataset};

#[derive(Parser)]
#[command(name = "dagcn_traffic")]
#[command(about = "Train a dynamic adaptive GCN on PEMS traffic data")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// cpu, cuda or cuda:N
    #[arg(long)]
    device: Option<String>,

    #[arg(long)]
    max_epoch: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Momentum of the sgd optimizer
    #[arg(long)]
    momentum: Option<f64>,

    /// adamW, adam, or sgd / momentum
    #[arg(long)]
    optimizer: Option<String>,

    /// Recent window length
    #[arg(long)]
    length: Option<i64>,

    /// Remove an existing params folder
    #[arg(long)]
    force: Option<bool>,

    /// Dataset code: 4 (PEMS04) or 8 (PEMS08)
    #[arg(long)]
    data_name: Option<u8>,

    /// Number of road sensors
    #[arg(long)]
    num_point: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Per-epoch learning-rate decay
    #[arg(long)]
    decay: Option<f64>,

    /// Root holding PEMS04/ and PEMS08/
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    params_dir: Option<PathBuf>,

    /// Read the adjacency stack artifact instead of rebuilding it
    #[arg(long)]
    load_adjacency: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> Result<(Config, u8)> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("reading configuration {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(code) = self.data_name {
            let dataset = DatasetId::from_code(code)?;
            config.data.dataset = dataset;
            config.data.num_nodes = dataset.num_nodes();
        }
        if let Some(n) = self.num_point {
            config.data.num_nodes = n;
        }
        if let Some(dir) = self.data_dir {
            config.data.data_dir = dir;
        }
        if let Some(length) = self.length {
            config.model.length = length;
        }
        if let Some(device) = self.device {
            config.training.device = device;
        }
        if let Some(v) = self.max_epoch {
            config.training.max_epoch = v;
        }
        if let Some(v) = self.batch_size {
            config.training.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.training.learning_rate = v;
        }
        if let Some(v) = self.momentum {
            config.training.momentum = v;
        }
        if let Some(name) = self.optimizer {
            config.training.optimizer = name.parse::<OptimizerKind>()?;
        }
        if let Some(v) = self.seed {
            config.training.seed = v;
        }
        if let Some(v) = self.decay {
            config.training.decay = v;
        }
        if let Some(force) = self.force {
            config.output.force = force;
        }
        if let Some(dir) = self.params_dir {
            config.output.params_dir = dir;
        }
        if self.load_adjacency {
            config.adjacency.load_existing = true;
        }

        Ok((config, self.verbose))
    }
}

fn main() -> Result<()> {
    let (config, verbose) = Args::parse().into_config()?;
    setup_logging(level_for_verbosity(verbose, &config.logging.level));

    config.validate()?;
    info!("Model is {}", config.model_name());
    info!(
        "Dataset {} | nodes {} | batch size {} | learning rate {} | decay {}",
        config.data.dataset,
        config.data.num_nodes,
        config.training.batch_size,
        config.training.learning_rate,
        config.training.decay
    );

    let checkpoint_dir = config.checkpoint_dir();
    prepare_checkpoint_dir(&checkpoint_dir, config.output.force)?;

    let dataset = TrafficDataset::load(&config.data)
        .with_context(|| format!("loading {}", config.data.signal_file().display()))?;
    dataset.stats.save(checkpoint_dir.join("stats_data.npz"))?;

    let policy = config.training.support_policy;
    let static_support = match policy {
        SupportPolicy::Static | SupportPolicy::Sum => {
            let path = config.data.distance_file();
            let adj = load_adjacency_matrix(&path, config.data.num_nodes)
                .with_context(|| format!("reading {}", path.display()))?;
            Some(scaled_laplacian(&adj)?.mapv(|v| v as f32))
        }
        SupportPolicy::Adaptive => None,
    };
    let adaptive_support = match policy {
        SupportPolicy::Adaptive | SupportPolicy::Sum => Some(global_adjacency(
            &config.adjacency,
            &dataset.train,
            config.data.num_nodes,
            config.training.seed,
            &config.adjacency.artifact,
        )?),
        SupportPolicy::Static => None,
    };
    let support = select_support(policy, static_support.as_ref(), adaptive_support.as_ref())?;

    let log_path = config.output.log_file.clone().unwrap_or_else(|| {
        config.output.params_dir.join(format!(
            "DAGCN_{}_{}.txt",
            config.data.dataset.code(),
            Local::now().format("%Y%m%d_%H%M%S")
        ))
    });
    info!("Writing epoch log to {}", log_path.display());

    let mut trainer = Trainer::new(
        &config,
        &support,
        dataset.train.len(),
        &checkpoint_dir,
        &log_path,
    )?;
    let report = trainer.run(&dataset)?;

    info!(
        "Best epoch {} (validation loss {:.4}): {}",
        report.best_epoch, report.best_val_loss, report.metrics
    );
    Ok(())
}
