//! Training loop
//!
//! One run walks `Initializing -> (TrainingEpoch -> Validating ->
//! Checkpointing -> EarlyStopCheck)* -> Finalizing`. Every epoch is
//! checkpointed; the first epoch with the lowest validation loss is reloaded
//! for the final test evaluation.

use ndarray::{Array2, Array3, Axis};
use ndarray_npy::NpzWriter;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tch::{nn, Device, Kind, Reduction, Tensor};
use tracing::{debug, info};

use super::checkpoint::checkpoint_path;
use super::history::{EpochSummary, TrainingHistory};
use super::optim::{LrDropRule, OptimizerPhase};
use crate::data::{to_array3, to_tensor, DataLoader, SplitData, TrafficDataset};
use crate::error::{DagcnError, Result};
use crate::model::{ForecastNetwork, NetworkConfig};
use crate::utils::{batch_progress, Config, EpochLog, EpochRecord, ForecastMetrics, SupportPolicy};

/// Where the run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Initializing,
    TrainingEpoch,
    Validating,
    Checkpointing,
    EarlyStopCheck,
    Finalizing,
}

/// Parse `cpu`, `cuda` or `cuda:N`
///
/// A CUDA device that is not available is an error, never a silent CPU run.
pub fn parse_device(name: &str) -> Result<Device> {
    let name = name.trim().to_ascii_lowercase();
    let index = match name.as_str() {
        "cpu" => return Ok(Device::Cpu),
        "cuda" => 0,
        other => match other.strip_prefix("cuda:") {
            Some(i) => i
                .parse::<usize>()
                .map_err(|_| DagcnError::Device(format!("invalid device '{}'", other)))?,
            None => return Err(DagcnError::Device(format!("unknown device '{}'", other))),
        },
    };
    if !tch::Cuda::is_available() || index >= tch::Cuda::device_count() as usize {
        return Err(DagcnError::Device(format!("cuda:{} is not available", index)));
    }
    Ok(Device::Cuda(index))
}

/// Support matrix handed to the network under `policy`
pub fn select_support(
    policy: SupportPolicy,
    static_support: Option<&Array2<f32>>,
    adaptive_support: Option<&Array2<f32>>,
) -> Result<Array2<f32>> {
    let missing = |what: &str| DagcnError::Config(format!("{:?} support needs the {} matrix", policy, what));
    match policy {
        SupportPolicy::Adaptive => adaptive_support.cloned().ok_or_else(|| missing("adaptive")),
        SupportPolicy::Static => static_support.cloned().ok_or_else(|| missing("static")),
        SupportPolicy::Sum => {
            let s = static_support.ok_or_else(|| missing("static"))?;
            let a = adaptive_support.ok_or_else(|| missing("adaptive"))?;
            if s.dim() != a.dim() {
                return Err(DagcnError::shape(
                    "support sum",
                    format!("{:?}", s.dim()),
                    vec![a.nrows() as i64, a.ncols() as i64],
                ));
            }
            Ok(s + a)
        }
    }
}

/// Test-split output of the network
#[derive(Debug, Clone)]
pub struct TestPrediction {
    /// `(samples, nodes, horizon)`
    pub prediction: Array3<f32>,
    /// Attention of the last block averaged over samples, `(nodes, nodes)`
    pub spatial_weights: Array2<f32>,
    pub refined_adjacency: Array2<f32>,
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct FinalReport {
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub best_checkpoint: PathBuf,
    pub metrics: ForecastMetrics,
    pub per_horizon: Vec<ForecastMetrics>,
    /// Seconds
    pub mean_train_time: f64,
    pub test_time: f64,
    pub total_time: f64,
}

/// Trainer for the forecasting network
pub struct Trainer<'a> {
    config: &'a Config,
    device: Device,
    vs: nn::VarStore,
    network: ForecastNetwork,
    phase: OptimizerPhase,
    lr_drop: LrDropRule,
    support: Tensor,
    loader: DataLoader,
    history: TrainingHistory,
    state: TrainerState,
    checkpoint_dir: PathBuf,
    log: EpochLog,
    started: Instant,
}

impl<'a> Trainer<'a> {
    /// Seed, build the network and optimizer, and move `support` to the device
    pub fn new(
        config: &'a Config,
        support: &Array2<f32>,
        train_len: usize,
        checkpoint_dir: &Path,
        log_path: &Path,
    ) -> Result<Self> {
        let started = Instant::now();
        let device = parse_device(&config.training.device)?;
        info!("Using device: {:?}", device);
        tch::manual_seed(config.training.seed as i64);

        let vs = nn::VarStore::new(device);
        let net_config = NetworkConfig::from_model_config(
            &config.model,
            config.data.num_nodes,
            config.data.num_for_predict,
        );
        let network = ForecastNetwork::new(&vs.root(), net_config)?;
        let num_params: i64 = vs.trainable_variables().iter().map(|t| t.numel() as i64).sum();
        info!("Network has {} parameters in total", num_params);

        let phase = OptimizerPhase::initial(&vs, &config.training)?;
        let lr_drop = LrDropRule::from_config(&config.training);
        let loader = DataLoader::new(train_len, config.training.batch_size, true, config.training.seed);
        let support = to_tensor(support, device)?;
        let log = EpochLog::create(log_path)?;

        Ok(Self {
            config,
            device,
            vs,
            network,
            phase,
            lr_drop,
            support,
            loader,
            history: TrainingHistory::new(),
            state: TrainerState::Initializing,
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            log,
            started,
        })
    }

    /// Train for `max_epoch` epochs and evaluate the best checkpoint
    pub fn run(&mut self, dataset: &TrafficDataset) -> Result<FinalReport> {
        let max_epoch = self.config.training.max_epoch;
        for epoch in 1..=max_epoch {
            self.transition(TrainerState::TrainingEpoch);
            let (train_loss, train_time) = self.train_epoch(&dataset.train, epoch)?;
            info!(
                "Epoch step: {}, t-loss: {:.4}, time: {:.2}s",
                epoch, train_loss, train_time
            );

            self.transition(TrainerState::Validating);
            let val_loss = self.evaluate_loss(&dataset.val)?;
            let test = self.predict(&dataset.test)?;
            let metrics = ForecastMetrics::compute(&dataset.test.target.view(), &test.prediction.view());
            debug!("Epoch {} test {}", epoch, metrics);

            self.transition(TrainerState::Checkpointing);
            let checkpoint = checkpoint_path(&self.checkpoint_dir, &self.config.model_name(), epoch, val_loss);
            self.vs.save(&checkpoint)?;
            debug!("Saved parameters to {}", checkpoint.display());

            let learning_rate = self.phase.learning_rate();
            self.log.append(&EpochRecord {
                seed: self.config.training.seed,
                epoch,
                train_loss,
                valid_loss: val_loss,
                learning_rate,
                mae: metrics.mae,
                mape: metrics.mape,
                rmse: metrics.rmse,
                datetime: EpochRecord::timestamp_now(),
            })?;
            self.history.push(EpochSummary {
                epoch,
                train_loss,
                val_loss,
                train_time,
                learning_rate,
                checkpoint,
            });

            self.transition(TrainerState::EarlyStopCheck);
            self.early_stop_check(epoch)?;
        }

        self.transition(TrainerState::Finalizing);
        self.finalize(dataset)
    }

    /// Forward, MSE, backward and step over every training batch, then one
    /// schedule step. Returns the mean batch loss and the elapsed seconds.
    fn train_epoch(&mut self, split: &SplitData, epoch: usize) -> Result<(f64, f64)> {
        let start = Instant::now();
        let pb = batch_progress(self.loader.num_batches(), format!("epoch {}", epoch));
        let mut total_loss = 0.0;
        let mut num_batches = 0usize;

        while let Some(indices) = self.loader.next_batch() {
            let batch = split.batch(&indices);
            let x = to_tensor(&batch.recent, self.device)?;
            let y = to_tensor(&batch.target, self.device)?;

            let output = self.network.forward_t(&x, &self.support, true)?;
            let loss = output.prediction.mse_loss(&y, Reduction::Mean);
            self.phase.backward_step(&loss);

            total_loss += loss.double_value(&[]);
            num_batches += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();
        self.loader.reset();
        self.phase.end_epoch();

        if num_batches == 0 {
            return Err(DagcnError::Dataset("training split has no batches".into()));
        }
        Ok((total_loss / num_batches as f64, start.elapsed().as_secs_f64()))
    }

    /// Mean batch MSE over `split` in eval mode
    pub fn evaluate_loss(&self, split: &SplitData) -> Result<f64> {
        let loader = DataLoader::new(split.len(), self.config.training.batch_size, false, 0);
        let mut total_loss = 0.0;
        let mut num_batches = 0usize;

        for indices in loader {
            let batch = split.batch(&indices);
            let x = to_tensor(&batch.recent, self.device)?;
            let y = to_tensor(&batch.target, self.device)?;
            let output = tch::no_grad(|| self.network.forward_t(&x, &self.support, false))?;
            total_loss += output.prediction.mse_loss(&y, Reduction::Mean).double_value(&[]);
            num_batches += 1;
        }

        if num_batches == 0 {
            return Err(DagcnError::Dataset("evaluation split is empty".into()));
        }
        Ok(total_loss / num_batches as f64)
    }

    /// Run the network over `split` in sample order
    pub fn predict(&self, split: &SplitData) -> Result<TestPrediction> {
        let n = self.config.data.num_nodes as i64;
        let loader = DataLoader::new(split.len(), self.config.training.batch_size, false, 0);
        let mut predictions = Vec::new();
        let mut weight_sum = Tensor::zeros([n, n], (Kind::Float, self.device));
        let mut refined = None;

        for indices in loader {
            let batch = split.batch(&indices);
            let x = to_tensor(&batch.recent, self.device)?;
            let output = tch::no_grad(|| self.network.forward_t(&x, &self.support, false))?;
            weight_sum += output
                .spatial_weights
                .sum_dim_intlist(Some([0i64].as_slice()), false, Kind::Float);
            predictions.push(to_array3(&output.prediction)?);
            refined = Some(output.refined_adjacency);
        }

        let refined = refined.ok_or_else(|| DagcnError::Dataset("prediction split is empty".into()))?;
        let views: Vec<_> = predictions.iter().map(|p| p.view()).collect();
        let prediction = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| DagcnError::Dataset(e.to_string()))?;
        let mean_weights = weight_sum / split.len() as f64;

        Ok(TestPrediction {
            prediction,
            spatial_weights: to_array2(&mean_weights)?,
            refined_adjacency: to_array2(&refined)?,
        })
    }

    fn early_stop_check(&mut self, epoch: usize) -> Result<()> {
        let best = self
            .history
            .best()
            .map(|b| (b.epoch, b.val_loss))
            .ok_or_else(|| DagcnError::Dataset("no finite validation loss recorded".into()))?;
        info!(
            ">>> Lowest v-loss in {}: epoch_{} {:.4} lr = {}",
            epoch,
            best.0,
            best.1,
            self.phase.learning_rate()
        );
        self.lr_drop
            .apply(best.1, &mut self.phase, &self.vs, &self.config.training)?;
        Ok(())
    }

    fn finalize(&mut self, dataset: &TrafficDataset) -> Result<FinalReport> {
        let mean_train_time = self.history.mean_train_time();
        info!("Training finished. Training time/epoch: {:.4} secs/epoch", mean_train_time);

        let best = self
            .history
            .best()
            .cloned()
            .ok_or_else(|| DagcnError::Dataset("no epoch was completed".into()))?;
        info!(
            "The valid loss on best model is epoch{}, value is {:.4}",
            best.epoch, best.val_loss
        );
        self.vs.load(&best.checkpoint)?;

        let start = Instant::now();
        let test = self.predict(&dataset.test)?;
        let test_time = start.elapsed().as_secs_f64();

        let truth = dataset.test.target.view();
        let metrics = ForecastMetrics::compute(&truth, &test.prediction.view());
        let per_horizon = ForecastMetrics::per_horizon(&truth, &test.prediction.view());
        for (i, m) in per_horizon.iter().enumerate() {
            info!("Steps 1..={:>2}: {}", i + 1, m);
        }
        info!("All steps: {}", metrics);

        if self.config.output.save_predictions {
            let path = self.checkpoint_dir.join("predictions.npz");
            save_predictions(&path, &test, &dataset.test.target)?;
            info!("Saved test predictions to {}", path.display());
        }

        let total_time = self.started.elapsed().as_secs_f64();
        info!("Test time: {:.2}s", test_time);
        info!("Total time: {:.2}s", total_time);

        Ok(FinalReport {
            best_epoch: best.epoch,
            best_val_loss: best.val_loss,
            best_checkpoint: best.checkpoint,
            metrics,
            per_horizon,
            mean_train_time,
            test_time,
            total_time,
        })
    }

    fn transition(&mut self, next: TrainerState) {
        debug!("Trainer state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Rate the next optimizer step will use
    pub fn learning_rate(&self) -> f64 {
        self.phase.learning_rate()
    }

    pub fn network(&self) -> &ForecastNetwork {
        &self.network
    }
}

fn to_array2(tensor: &Tensor) -> Result<Array2<f32>> {
    let batched = to_array3(&tensor.unsqueeze(0))?;
    Ok(batched.index_axis_move(Axis(0), 0))
}

fn save_predictions(path: &Path, test: &TestPrediction, truth: &Array3<f32>) -> Result<()> {
    let mut npz = NpzWriter::new_compressed(File::create(path)?);
    npz.add_array("prediction", &test.prediction)?;
    npz.add_array("ground_truth", truth)?;
    npz.add_array("spatial_weights", &test.spatial_weights)?;
    npz.add_array("refined_adjacency", &test.refined_adjacency)?;
    npz.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device("cpu").unwrap(), Device::Cpu);
        assert_eq!(parse_device(" CPU ").unwrap(), Device::Cpu);
        assert!(matches!(parse_device("tpu"), Err(DagcnError::Device(_))));
        assert!(parse_device("cuda:x").is_err());
        if !tch::Cuda::is_available() {
            assert!(matches!(parse_device("cuda:0"), Err(DagcnError::Device(_))));
        }
    }

    #[test]
    fn test_select_support() {
        let s = Array2::from_elem((2, 2), 1.0f32);
        let a = Array2::from_elem((2, 2), 0.5f32);
        assert_eq!(select_support(SupportPolicy::Static, Some(&s), None).unwrap(), s);
        assert_eq!(
            select_support(SupportPolicy::Adaptive, Some(&s), Some(&a)).unwrap(),
            a
        );
        assert_eq!(
            select_support(SupportPolicy::Sum, Some(&s), Some(&a)).unwrap(),
            Array2::from_elem((2, 2), 1.5f32)
        );
        assert!(select_support(SupportPolicy::Sum, Some(&s), None).is_err());
    }
}
