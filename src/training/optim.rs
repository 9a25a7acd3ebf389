//! Optimizers, learning-rate schedule and the one-shot learning-rate drop
//!
//! The run starts in [`OptimizerPhase::Initial`]: the base optimizer wrapped
//! by [`Lookahead`] with an exponential per-epoch decay. [`LrDropRule`] may
//! replace it once by a fresh plain optimizer at a lower, constant rate.

use tch::nn::{self, OptimizerConfig};
use tch::Tensor;
use tracing::info;

use crate::error::Result;
use crate::utils::{OptimizerKind, TrainingConfig};

/// Build a base optimizer over every trainable variable of `vs`
pub fn build_base_optimizer(
    vs: &nn::VarStore,
    kind: OptimizerKind,
    learning_rate: f64,
    weight_decay: f64,
    momentum: f64,
) -> Result<nn::Optimizer> {
    let optimizer = match kind {
        OptimizerKind::AdamW => nn::AdamW {
            wd: weight_decay,
            ..Default::default()
        }
        .build(vs, learning_rate)?,
        OptimizerKind::Adam => nn::Adam {
            wd: weight_decay,
            ..Default::default()
        }
        .build(vs, learning_rate)?,
        OptimizerKind::Sgd => nn::Sgd {
            momentum,
            wd: weight_decay,
            ..Default::default()
        }
        .build(vs, learning_rate)?,
    };
    Ok(optimizer)
}

/// Lookahead wrapper keeping a slow copy of every parameter
///
/// Every `k` inner steps: `slow += alpha * (fast - slow)`, then `fast = slow`.
pub struct Lookahead {
    inner: nn::Optimizer,
    fast: Vec<Tensor>,
    slow: Vec<Tensor>,
    k: usize,
    alpha: f64,
    steps: usize,
}

impl Lookahead {
    pub fn new(inner: nn::Optimizer, vs: &nn::VarStore, k: usize, alpha: f64) -> Self {
        let fast = vs.trainable_variables();
        let slow: Vec<Tensor> = tch::no_grad(|| fast.iter().map(|p| p.detach().copy()).collect());
        Self {
            inner,
            fast,
            slow,
            k: k.max(1),
            alpha,
            steps: 0,
        }
    }

    pub fn zero_grad(&mut self) {
        self.inner.zero_grad();
    }

    pub fn step(&mut self) {
        self.inner.step();
        self.steps += 1;
        if self.steps % self.k == 0 {
            self.sync();
        }
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.inner.set_lr(lr);
    }

    /// Inner steps taken so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn sync(&mut self) {
        let alpha = self.alpha;
        tch::no_grad(|| {
            for (fast, slow) in self.fast.iter_mut().zip(self.slow.iter_mut()) {
                let delta = (&*fast - &*slow) * alpha;
                *slow += delta;
                fast.copy_(slow);
            }
        });
    }
}

/// `lr <- lr * gamma` once per epoch
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialDecay {
    initial_lr: f64,
    gamma: f64,
    epoch: usize,
}

impl ExponentialDecay {
    pub fn new(initial_lr: f64, gamma: f64) -> Self {
        Self {
            initial_lr,
            gamma,
            epoch: 0,
        }
    }

    /// Advance one epoch and return the new rate
    pub fn step(&mut self) -> f64 {
        self.epoch += 1;
        self.last_lr()
    }

    pub fn last_lr(&self) -> f64 {
        self.initial_lr * self.gamma.powi(self.epoch as i32)
    }
}

/// Optimizer currently driving the parameters
pub enum OptimizerPhase {
    Initial {
        optimizer: Lookahead,
        schedule: ExponentialDecay,
    },
    Dropped {
        optimizer: nn::Optimizer,
        learning_rate: f64,
    },
}

impl OptimizerPhase {
    /// Lookahead-wrapped base optimizer on the exponential schedule
    pub fn initial(vs: &nn::VarStore, config: &TrainingConfig) -> Result<Self> {
        let base = build_base_optimizer(
            vs,
            config.optimizer,
            config.learning_rate,
            config.weight_decay,
            config.momentum,
        )?;
        Ok(Self::Initial {
            optimizer: Lookahead::new(base, vs, config.lookahead_k, config.lookahead_alpha),
            schedule: ExponentialDecay::new(config.learning_rate, config.decay),
        })
    }

    /// Zero gradients, backpropagate `loss` and take one step
    pub fn backward_step(&mut self, loss: &Tensor) {
        match self {
            Self::Initial { optimizer, .. } => {
                optimizer.zero_grad();
                loss.backward();
                optimizer.step();
            }
            Self::Dropped { optimizer, .. } => {
                optimizer.zero_grad();
                loss.backward();
                optimizer.step();
            }
        }
    }

    /// End-of-epoch schedule step; the dropped phase keeps a constant rate
    pub fn end_epoch(&mut self) {
        if let Self::Initial {
            optimizer,
            schedule,
        } = self
        {
            let lr = schedule.step();
            optimizer.set_lr(lr);
        }
    }

    /// Learning rate in effect for the next step
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Initial { schedule, .. } => schedule.last_lr(),
            Self::Dropped { learning_rate, .. } => *learning_rate,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

/// One-shot drop armed until the best validation loss crosses `threshold`
#[derive(Debug, Clone, PartialEq)]
pub struct LrDropRule {
    threshold: f64,
    learning_rate: f64,
    armed: bool,
}

impl LrDropRule {
    pub fn new(enabled: bool, threshold: f64, learning_rate: f64) -> Self {
        Self {
            threshold,
            learning_rate,
            armed: enabled,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(
            config.lr_drop.enabled,
            config.lr_drop.threshold,
            config.lr_drop.learning_rate,
        )
    }

    /// Disarm and return `true` the first time `best_val_loss` is below the
    /// threshold
    pub fn check(&mut self, best_val_loss: f64) -> bool {
        if self.armed && best_val_loss < self.threshold {
            self.armed = false;
            true
        } else {
            false
        }
    }

    /// Check the rule and, when it fires, swap in a fresh plain optimizer
    ///
    /// Parameters live in the var store and are untouched.
    pub fn apply(
        &mut self,
        best_val_loss: f64,
        phase: &mut OptimizerPhase,
        vs: &nn::VarStore,
        config: &TrainingConfig,
    ) -> Result<bool> {
        if !self.check(best_val_loss) {
            return Ok(false);
        }
        let optimizer = build_base_optimizer(
            vs,
            config.optimizer,
            self.learning_rate,
            config.weight_decay,
            config.momentum,
        )?;
        *phase = OptimizerPhase::Dropped {
            optimizer,
            learning_rate: self.learning_rate,
        };
        info!(
            "Optimizer changed: best validation loss {:.4} < {}, learning rate now {}",
            best_val_loss, self.threshold, self.learning_rate
        );
        Ok(true)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::{Device, Kind};

    #[test]
    fn test_exponential_decay() {
        let mut schedule = ExponentialDecay::new(0.001, 0.99);
        assert_eq!(schedule.last_lr(), 0.001);
        schedule.step();
        let lr = schedule.step();
        assert_abs_diff_eq!(lr, 0.001 * 0.99 * 0.99, epsilon = 1e-15);
    }

    #[test]
    fn test_drop_fires_exactly_once() {
        let mut rule = LrDropRule::new(true, 710.0, 1e-4);
        let fired: Vec<bool> = [900.0, 705.0, 690.0, 720.0, 650.0]
            .iter()
            .map(|&v| rule.check(v))
            .collect();
        assert_eq!(fired, vec![false, true, false, false, false]);
        assert!(!rule.is_armed());
    }

    #[test]
    fn test_disabled_rule_never_fires() {
        let mut rule = LrDropRule::new(false, 710.0, 1e-4);
        assert!(!rule.check(1.0));
    }

    #[test]
    fn test_phase_transition() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _w = vs.root().var("w", &[3], nn::Init::Const(1.0));
        let config = TrainingConfig::default();
        let mut phase = OptimizerPhase::initial(&vs, &config).unwrap();
        let mut rule = LrDropRule::from_config(&config);

        phase.end_epoch();
        assert_abs_diff_eq!(phase.learning_rate(), 0.001 * 0.99, epsilon = 1e-12);

        assert!(!rule.apply(800.0, &mut phase, &vs, &config).unwrap());
        assert!(rule.apply(700.0, &mut phase, &vs, &config).unwrap());
        assert!(phase.is_dropped());
        assert_eq!(phase.learning_rate(), 1e-4);

        phase.end_epoch();
        assert_eq!(phase.learning_rate(), 1e-4);
        assert!(!rule.apply(600.0, &mut phase, &vs, &config).unwrap());
    }

    #[test]
    fn test_lookahead_interpolates_every_k_steps() {
        let vs = nn::VarStore::new(Device::Cpu);
        let w = vs.root().var("w", &[1], nn::Init::Const(0.0));
        let base = build_base_optimizer(&vs, OptimizerKind::Sgd, 1.0, 0.0, 0.0).unwrap();
        let mut opt = Lookahead::new(base, &vs, 2, 0.5);

        // loss = -w: each plain SGD step adds 1.0
        for _ in 0..2 {
            let loss = -w.sum(Kind::Float);
            opt.zero_grad();
            loss.backward();
            opt.step();
        }
        // fast reached 2.0, slow moves halfway from 0.0
        assert_abs_diff_eq!(w.double_value(&[0]), 1.0, epsilon = 1e-6);
        assert_eq!(opt.steps(), 2);
    }
}
