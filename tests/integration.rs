//! Integration tests for DAGCN traffic forecasting

use ndarray::{Array2, Array3};
use tempfile::tempdir;

use dagcn_traffic::graph::{global_adjacency, scaled_laplacian};
use dagcn_traffic::training::{list_checkpoints, select_support, TrainerState};
use dagcn_traffic::utils::{Config, DataConfig, SupportPolicy, EPOCH_LOG_HEADER};
use dagcn_traffic::{Trainer, TrafficDataset};

const NODES: usize = 4;

fn synthetic_config() -> Config {
    let mut config = Config::default();
    config.data = DataConfig {
        num_nodes: NODES,
        num_of_weeks: 1,
        num_of_days: 1,
        num_of_hours: 2,
        points_per_hour: 1,
        num_for_predict: 1,
        ..Default::default()
    };
    config.model.length = 2;
    config.model.c_out = 8;
    config.model.embed_dim = 3;
    config.training.max_epoch = 1;
    config.training.batch_size = 6;
    config.adjacency.batch_size = 4;
    config
}

/// 188 steps of a daily-periodic signal: 20 windowed samples, 12 for training
fn synthetic_dataset(config: &Config) -> TrafficDataset {
    let signal = Array3::from_shape_fn((188, NODES, 3), |(t, n, f)| {
        let phase = (t % 24) as f32 / 24.0 * std::f32::consts::TAU;
        (phase + n as f32).sin() * 20.0 + 60.0 + f as f32
    });
    TrafficDataset::from_signal(signal, &config.data).unwrap()
}

#[test]
fn test_one_epoch_end_to_end() {
    let mut config = synthetic_config();
    // any finite validation loss is below this, so the drop fires after epoch 1
    config.training.lr_drop.threshold = f64::MAX;
    let dataset = synthetic_dataset(&config);
    assert_eq!(dataset.train.len(), 12);

    let dir = tempdir().unwrap();
    let checkpoint_dir = dir.path().join("params");
    std::fs::create_dir_all(&checkpoint_dir).unwrap();
    let log_path = dir.path().join("epochs.txt");

    let support = Array2::<f32>::eye(NODES);
    let mut trainer = Trainer::new(
        &config,
        &support,
        dataset.train.len(),
        &checkpoint_dir,
        &log_path,
    )
    .unwrap();
    let report = trainer.run(&dataset).unwrap();

    assert_eq!(trainer.state(), TrainerState::Finalizing);
    let epochs = trainer.history().epochs();
    assert_eq!(epochs.len(), 1);
    assert!(epochs[0].train_loss.is_finite());
    assert!(epochs[0].val_loss.is_finite());
    assert_eq!(report.best_epoch, 1);
    assert_eq!(trainer.learning_rate(), config.training.lr_drop.learning_rate);
    assert!(report.metrics.mae.is_finite());
    assert_eq!(report.per_horizon.len(), 1);

    assert_eq!(list_checkpoints(&checkpoint_dir).unwrap().len(), 1);
    assert!(checkpoint_dir.join("predictions.npz").exists());

    let content = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], EPOCH_LOG_HEADER.join(","));
    assert_eq!(lines[1].split(',').count(), 9);
}

#[test]
fn test_disabled_lr_drop_keeps_schedule() {
    let mut config = synthetic_config();
    config.training.lr_drop.enabled = false;
    config.training.lr_drop.threshold = f64::MAX;
    let dataset = synthetic_dataset(&config);

    let dir = tempdir().unwrap();
    let checkpoint_dir = dir.path().join("params");
    std::fs::create_dir_all(&checkpoint_dir).unwrap();
    let support = Array2::<f32>::eye(NODES);
    let mut trainer = Trainer::new(
        &config,
        &support,
        dataset.train.len(),
        &checkpoint_dir,
        &dir.path().join("epochs.txt"),
    )
    .unwrap();
    trainer.run(&dataset).unwrap();

    let expected = config.training.learning_rate * config.training.decay;
    assert!((trainer.learning_rate() - expected).abs() < 1e-12);
}

#[test]
fn test_blended_support_is_finite() {
    let config = synthetic_config();
    let dataset = synthetic_dataset(&config);
    let dir = tempdir().unwrap();

    let adaptive = global_adjacency(
        &config.adjacency,
        &dataset.train,
        NODES,
        config.training.seed,
        &dir.path().join("stack.npy"),
    )
    .unwrap();
    assert_eq!(adaptive.dim(), (NODES, NODES));
    assert!(adaptive.iter().all(|v| v.is_finite() && *v >= 0.0));

    let laplacian = scaled_laplacian(&Array2::zeros((NODES, NODES)))
        .unwrap()
        .mapv(|v| v as f32);
    let support = select_support(SupportPolicy::Sum, Some(&laplacian), Some(&adaptive)).unwrap();
    assert!(support.iter().all(|v| v.is_finite()));
}
