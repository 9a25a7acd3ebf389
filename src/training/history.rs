//! Per-epoch training history

use std::path::PathBuf;

/// Everything recorded for one finished epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    /// Seconds spent in the training pass
    pub train_time: f64,
    /// Rate in effect at the end of the epoch, after the schedule step
    pub learning_rate: f64,
    pub checkpoint: PathBuf,
}

/// History of a run, reset only at process start
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    epochs: Vec<EpochSummary>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, summary: EpochSummary) {
        self.epochs.push(summary);
    }

    pub fn epochs(&self) -> &[EpochSummary] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn val_losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.val_loss).collect()
    }

    /// Epoch with the lowest validation loss so far
    pub fn best(&self) -> Option<&EpochSummary> {
        best_epoch(&self.val_losses()).and_then(|epoch| self.epochs.get(epoch - 1))
    }

    /// Mean training seconds per epoch
    pub fn mean_train_time(&self) -> f64 {
        if self.epochs.is_empty() {
            return 0.0;
        }
        self.epochs.iter().map(|e| e.train_time).sum::<f64>() / self.epochs.len() as f64
    }
}

/// 1-based epoch of the first minimum; NaN losses never win
pub fn best_epoch(val_losses: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &loss) in val_losses.iter().enumerate() {
        if loss.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if loss >= current => {}
            _ => best = Some((i + 1, loss)),
        }
    }
    best.map(|(epoch, _)| epoch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(epoch: usize, val_loss: f64) -> EpochSummary {
        EpochSummary {
            epoch,
            train_loss: 1.0,
            val_loss,
            train_time: epoch as f64,
            learning_rate: 0.001,
            checkpoint: PathBuf::from(format!("epoch_{}.params", epoch)),
        }
    }

    #[test]
    fn test_best_epoch_takes_first_minimum() {
        assert_eq!(best_epoch(&[5.0, 2.0, 3.0, 2.0]), Some(2));
        assert_eq!(best_epoch(&[]), None);
        assert_eq!(best_epoch(&[f64::NAN, 4.0]), Some(2));
    }

    #[test]
    fn test_history_best_and_timing() {
        let mut history = TrainingHistory::new();
        for (i, v) in [5.0, 2.0, 3.0, 2.0].iter().enumerate() {
            history.push(summary(i + 1, *v));
        }
        let best = history.best().unwrap();
        assert_eq!(best.epoch, 2);
        assert_eq!(best.checkpoint, PathBuf::from("epoch_2.params"));
        assert_eq!(history.mean_train_time(), 2.5);
    }
}
