//! Keypoint training loop.
//!
//! Ties together dataset batching, the tensor bridge, the masked objective,
//! metrics and the plateau/early-stopping schedules into an Adam training loop.
//! Checkpoints are written as:
//!
//! ```text
//! {checkpoint_dir}/model_config.json
//! {checkpoint_dir}/training_config.json
//! {checkpoint_dir}/history.json
//! {checkpoint_dir}/epoch_{n}/{model.mpk, optimizer.mpk, best_model.mpk, meta.json}
//! {checkpoint_dir}/best/{model.mpk, meta.json}
//! {checkpoint_dir}/final/{model.mpk, optimizer.mpk, best_model.mpk, meta.json}
//! ```
//!
//! Each epoch checkpoint carries the best weights seen up to that epoch, so a
//! resumed run restores the best model of its own history. `best/` is
//! rewritten at the end of every run to match the returned best epoch.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::model::cnn::{KeypointNet, KeypointNetConfig};
use crate::training::data::KeypointDataset;
use crate::training::loss::{masked_mae_metric, masked_mse_loss};
use crate::training::metrics::{EpochAccumulator, EpochRecord, KeypointMetrics, MetricsHistory};
use crate::training::schedule::{EarlyStopping, PlateauScheduler, StopDecision};

/// Metadata saved alongside each checkpoint for resuming training.
#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub plateau: PlateauScheduler,
    pub early_stopping: EarlyStopping,
    pub history: MetricsHistory,
}

/// Identifies the weights stored in `best/`.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct BestMeta {
    pub epoch: usize,
    pub loss: f64,
}

/// Configuration for keypoint training.
#[derive(Config, Debug)]
pub struct KeypointTrainingConfig {
    /// Initial learning rate for Adam.
    #[config(default = 1e-3)]
    pub lr: f64,
    /// Samples per optimizer step.
    #[config(default = 64)]
    pub batch_size: usize,
    /// Maximum number of epochs.
    #[config(default = 60)]
    pub epochs: usize,
    /// Fraction of the data held out for validation.
    #[config(default = 0.15)]
    pub val_fraction: f64,
    /// Seed for the split, per-epoch shuffling and weight initialization.
    #[config(default = 42)]
    pub seed: u64,
    /// Maximum gradient norm for clipping. 0 disables clipping.
    #[config(default = 0.0)]
    pub max_grad_norm: f64,
    /// L2 weight decay. 0 disables it.
    #[config(default = 0.0)]
    pub weight_decay: f64,
    /// LR multiplier applied when the monitored loss plateaus.
    #[config(default = 0.5)]
    pub plateau_factor: f64,
    /// Epochs without improvement before the LR is reduced. 0 disables.
    #[config(default = 5)]
    pub plateau_patience: usize,
    /// Lower bound for the plateau-reduced LR.
    #[config(default = 0.0)]
    pub min_lr: f64,
    /// Epochs without improvement before training stops. 0 disables.
    #[config(default = 10)]
    pub early_stopping_patience: usize,
    /// Return the weights of the best epoch rather than the last one.
    #[config(default = true)]
    pub restore_best: bool,
    /// Epochs between checkpoint saves. 0 saves only best and final.
    #[config(default = 5)]
    pub checkpoint_interval: usize,
    /// Directory for saving checkpoints.
    #[config(default = "String::from(\"checkpoints/keypoints\")")]
    pub checkpoint_dir: String,
}

/// Result of a training run.
#[derive(Debug)]
pub struct TrainOutcome<B: AutodiffBackend> {
    /// Best weights when `restore_best` is set, else the last epoch's.
    pub model: KeypointNet<B>,
    pub history: MetricsHistory,
    pub best_epoch: Option<usize>,
    /// Last epoch that ran.
    pub last_epoch: usize,
    pub stopped_early: bool,
}

/// Evaluate a model over a whole dataset without gradients.
///
/// Batches run in order; the result is the per-sample mean of the masked
/// loss and MAE.
pub fn evaluate<B: Backend>(
    model: &KeypointNet<B>,
    dataset: &KeypointDataset,
    batch_size: usize,
    device: &B::Device,
) -> anyhow::Result<KeypointMetrics> {
    let mut acc = EpochAccumulator::new();
    for indices in dataset.sequential_batches(batch_size) {
        let (images, packed) = dataset.batch_tensors::<B>(&indices, device);
        let pred = model.forward(images);
        let loss: f64 = masked_mse_loss(packed.clone(), pred.clone())?
            .into_scalar()
            .elem();
        let mae: f64 = masked_mae_metric(packed, pred)?.into_scalar().elem();
        acc.update(loss, mae, indices.len());
    }
    acc.finish()
        .ok_or_else(|| anyhow::anyhow!("Cannot evaluate on an empty dataset"))
}

/// Run the keypoint training loop.
///
/// # Arguments
/// - `config`: training hyperparameters
/// - `model_config`: architecture of `model`, written to `model_config.json`
/// - `model`: initialized KeypointNet (consumed and returned updated)
/// - `train_set`: samples to fit
/// - `val_set`: optional held-out samples; when absent, the schedules watch
///   the training loss instead
/// - `device`: burn device for tensor operations
/// - `resume_epoch`: if `Some(n)`, load model, optimizer and schedule state
///   from `{checkpoint_dir}/epoch_{n}/` and continue with epoch `n + 1`;
///   `n` must be below `config.epochs`
pub fn train<B: AutodiffBackend>(
    config: &KeypointTrainingConfig,
    model_config: &KeypointNetConfig,
    mut model: KeypointNet<B>,
    train_set: &KeypointDataset,
    val_set: Option<&KeypointDataset>,
    device: &B::Device,
    resume_epoch: Option<usize>,
) -> anyhow::Result<TrainOutcome<B>> {
    if train_set.is_empty() {
        anyhow::bail!("Training set is empty");
    }
    if let Some(epoch) = resume_epoch {
        if epoch >= config.epochs {
            anyhow::bail!(
                "Cannot resume from epoch {epoch}: training is configured for {} epochs",
                config.epochs
            );
        }
    }
    if train_set.image_size() != model_config.image_size {
        anyhow::bail!(
            "Dataset images are {0}x{0} but the model expects {1}x{1}",
            train_set.image_size(),
            model_config.image_size
        );
    }
    let val_set = val_set.filter(|v| !v.is_empty());

    let checkpoint_dir = PathBuf::from(&config.checkpoint_dir);
    std::fs::create_dir_all(&checkpoint_dir)?;
    model_config
        .save(checkpoint_dir.join("model_config.json"))
        .map_err(|e| anyhow::anyhow!("Failed to write model_config.json: {e}"))?;
    config
        .save(checkpoint_dir.join("training_config.json"))
        .map_err(|e| anyhow::anyhow!("Failed to write training_config.json: {e}"))?;

    let mut optim_config = AdamConfig::new();
    if config.max_grad_norm > 0.0 {
        optim_config = optim_config.with_grad_clipping(Some(GradientClippingConfig::Norm(
            config.max_grad_norm as f32,
        )));
    }
    if config.weight_decay > 0.0 {
        optim_config =
            optim_config.with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay as f32)));
    }
    let mut optimizer = optim_config.init();

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let mut plateau = PlateauScheduler::new(
        config.lr,
        config.plateau_factor,
        config.plateau_patience,
        config.min_lr,
    );
    let mut early_stopping = EarlyStopping::new(config.early_stopping_patience);
    let mut history = MetricsHistory::new();
    let mut best_model: Option<KeypointNet<B>> = None;
    let start_epoch: usize;

    if let Some(epoch) = resume_epoch {
        let epoch_dir = checkpoint_dir.join(format!("epoch_{epoch}"));

        model = model
            .load_file(epoch_dir.join("model"), &recorder, device)
            .map_err(|e| anyhow::anyhow!("Failed to load model from {}: {e}", epoch_dir.display()))?;

        let optim_record = recorder
            .load(epoch_dir.join("optimizer"), device)
            .map_err(|e| anyhow::anyhow!("Failed to load optimizer from {}: {e}", epoch_dir.display()))?;
        optimizer = optimizer.load_record(optim_record);

        let meta_path = epoch_dir.join("meta.json");
        let meta: CheckpointMeta = serde_json::from_reader(
            std::fs::File::open(&meta_path)
                .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", meta_path.display()))?,
        )
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", meta_path.display()))?;
        plateau = meta.plateau;
        early_stopping = meta.early_stopping;
        history = meta.history;
        start_epoch = meta.epoch;

        if let Some(best_epoch) = early_stopping.best_epoch() {
            let best = model
                .clone()
                .load_file(epoch_dir.join("best_model"), &recorder, device)
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to load best model (epoch {best_epoch}) from {}: {e}",
                        epoch_dir.display()
                    )
                })?;
            best_model = Some(best);
        }

        tracing::info!(
            start_epoch,
            lr = format!("{:.2e}", plateau.lr()),
            best_epoch = ?early_stopping.best_epoch(),
            "Resumed training from checkpoint"
        );
    } else {
        start_epoch = 0;
    }

    tracing::info!(
        train = train_set.len(),
        val = val_set.map(|v| v.len()).unwrap_or(0),
        epochs = config.epochs,
        batch_size = config.batch_size,
        lr = config.lr,
        "Starting keypoint training"
    );

    let train_start = Instant::now();
    let mut stopped_early = false;
    let mut last_epoch = start_epoch;

    for epoch in (start_epoch + 1)..=config.epochs {
        let lr = plateau.lr();
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(epoch as u64));
        let batches = train_set.shuffled_batches(config.batch_size, &mut rng);

        let pb = ProgressBar::new(batches.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_message(format!("epoch {epoch}/{}", config.epochs));

        let mut acc = EpochAccumulator::new();
        for indices in &batches {
            let (images, packed) = train_set.batch_tensors::<B>(indices, device);
            let pred = model.forward(images);

            let loss = masked_mse_loss(packed.clone(), pred.clone())?;
            let mae: f64 = masked_mae_metric(packed, pred.detach())?
                .into_scalar()
                .elem();
            let loss_val: f64 = loss.clone().into_scalar().elem();

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);

            acc.update(loss_val, mae, indices.len());
            pb.inc(1);
        }
        pb.finish_and_clear();

        let train_metrics = acc
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Epoch {epoch} ran no batches"))?;
        let val_metrics = match val_set {
            Some(v) => Some(evaluate(&model.valid(), v, config.batch_size, device)?),
            None => None,
        };

        for (split, metrics) in [("train", Some(&train_metrics)), ("val", val_metrics.as_ref())] {
            let Some(metrics) = metrics else { continue };
            let warnings = metrics.health_check();
            if !warnings.is_empty() {
                tracing::warn!(epoch, split, "Health check warnings: {:?}", warnings);
            }
            if !metrics.loss.is_finite() {
                anyhow::bail!("{split} loss became non-finite at epoch {epoch}");
            }
        }

        let record = EpochRecord {
            epoch,
            lr,
            train: train_metrics,
            val: val_metrics,
        };
        let monitored = crate::training::metrics::monitored_loss(&record);
        history.push(record);
        last_epoch = epoch;

        let val_str = val_metrics
            .map(|m| format!(" | val: {m}"))
            .unwrap_or_default();
        tracing::info!(
            epoch,
            lr = format!("{lr:.2e}"),
            "train: {train_metrics}{val_str}"
        );

        let decision = early_stopping.update(epoch, monitored);
        if decision == StopDecision::Improved {
            save_best(
                &checkpoint_dir.join("best"),
                &model,
                BestMeta {
                    epoch,
                    loss: monitored,
                },
                &recorder,
            )?;
            best_model = Some(model.clone());
            tracing::debug!(epoch, loss = monitored, "New best model");
        }
        plateau.step(monitored);

        if config.checkpoint_interval > 0 && epoch % config.checkpoint_interval == 0 {
            let meta = CheckpointMeta {
                epoch,
                plateau: plateau.clone(),
                early_stopping: early_stopping.clone(),
                history: history.clone(),
            };
            save_checkpoint(
                &checkpoint_dir.join(format!("epoch_{epoch}")),
                &model,
                best_model.as_ref(),
                optimizer.to_record(),
                &meta,
                &recorder,
            )?;
            tracing::info!(epoch, "Checkpoint saved (model + optimizer + meta)");
        }

        if decision == StopDecision::Stop {
            tracing::info!(
                epoch,
                best_epoch = ?early_stopping.best_epoch(),
                "Early stopping: no improvement for {} epochs",
                config.early_stopping_patience
            );
            stopped_early = true;
            break;
        }
    }

    tracing::info!(
        epochs_run = last_epoch.saturating_sub(start_epoch),
        best_epoch = ?early_stopping.best_epoch(),
        elapsed_secs = format!("{:.1}", train_start.elapsed().as_secs_f64()),
        "Training loop finished"
    );

    // Final checkpoint keeps the last weights so training can continue from it.
    let meta = CheckpointMeta {
        epoch: last_epoch,
        plateau,
        early_stopping: early_stopping.clone(),
        history: history.clone(),
    };
    save_checkpoint(
        &checkpoint_dir.join("final"),
        &model,
        best_model.as_ref(),
        optimizer.to_record(),
        &meta,
        &recorder,
    )?;
    serde_json::to_writer_pretty(
        std::fs::File::create(checkpoint_dir.join("history.json"))?,
        &history,
    )?;

    // `best/` may hold weights from an abandoned run that was resumed earlier.
    if let (Some(best), Some(epoch), Some(loss)) = (
        best_model.as_ref(),
        early_stopping.best_epoch(),
        early_stopping.best(),
    ) {
        save_best(&checkpoint_dir.join("best"), best, BestMeta { epoch, loss }, &recorder)?;
    }

    if config.restore_best {
        if let Some(best) = best_model {
            tracing::info!(best_epoch = ?early_stopping.best_epoch(), "Restored best weights");
            model = best;
        }
    }

    tracing::info!("Training complete. Final checkpoint saved (model + optimizer + meta).");

    Ok(TrainOutcome {
        model,
        history,
        best_epoch: early_stopping.best_epoch(),
        last_epoch,
        stopped_early,
    })
}

fn save_best<B: AutodiffBackend>(
    dir: &Path,
    model: &KeypointNet<B>,
    meta: BestMeta,
    recorder: &NamedMpkFileRecorder<FullPrecisionSettings>,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    model
        .clone()
        .save_file(dir.join("model"), recorder)
        .map_err(|e| anyhow::anyhow!("Failed to save best model to {}: {e}", dir.display()))?;
    serde_json::to_writer(std::fs::File::create(dir.join("meta.json"))?, &meta)?;
    Ok(())
}

fn save_checkpoint<B: AutodiffBackend, R: burn::record::Record<B>>(
    dir: &Path,
    model: &KeypointNet<B>,
    best_model: Option<&KeypointNet<B>>,
    optimizer_record: R,
    meta: &CheckpointMeta,
    recorder: &NamedMpkFileRecorder<FullPrecisionSettings>,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    model
        .clone()
        .save_file(dir.join("model"), recorder)
        .map_err(|e| anyhow::anyhow!("Failed to save model to {}: {e}", dir.display()))?;
    if let Some(best) = best_model {
        best.clone()
            .save_file(dir.join("best_model"), recorder)
            .map_err(|e| anyhow::anyhow!("Failed to save best model to {}: {e}", dir.display()))?;
    }
    recorder
        .record(optimizer_record, dir.join("optimizer"))
        .map_err(|e| anyhow::anyhow!("Failed to save optimizer to {}: {e}", dir.display()))?;
    serde_json::to_writer(std::fs::File::create(dir.join("meta.json"))?, meta)?;
    Ok(())
}

/// Load a KeypointNet from a checkpoint file.
///
/// Creates a fresh model from config, then loads saved weights on top.
pub fn resume_from_checkpoint<B: Backend>(
    path: &Path,
    config: &KeypointNetConfig,
    device: &B::Device,
) -> anyhow::Result<KeypointNet<B>> {
    let model = config
        .init::<B>(device)
        .load_file(
            path,
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load checkpoint from {}: {e}", path.display()))?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::PreparedSample;
    use crate::training::packing::pack_labels;
    use burn::backend::ndarray::NdArray;
    use burn::backend::Autodiff;
    use facedata::NUM_COORDS;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<NdArray<f32>>;

    fn tiny_model_config() -> KeypointNetConfig {
        KeypointNetConfig::new()
            .with_image_size(8)
            .with_c1(2)
            .with_c2(2)
            .with_c3(2)
            .with_d_hidden(8)
            .with_dropout1(0.0)
            .with_dropout2(0.0)
            .with_dropout3(0.0)
            .with_head_dropout(0.0)
    }

    /// Bright images with keypoints on the right, dark on the left.
    fn tiny_dataset(n: usize) -> KeypointDataset {
        let samples = (0..n)
            .map(|i| {
                let bright = i % 2 == 0;
                let value = if bright { 0.9 } else { 0.1 };
                let mut labels = vec![if bright { 6.0 } else { 2.0 }; NUM_COORDS];
                if i % 3 == 0 {
                    labels[i % NUM_COORDS] = f32::NAN;
                }
                PreparedSample {
                    row: i + 1,
                    image: vec![value; 64],
                    target: pack_labels(&labels).unwrap(),
                }
            })
            .collect();
        KeypointDataset::new(samples, 8).unwrap()
    }

    fn config_in(dir: &Path) -> KeypointTrainingConfig {
        KeypointTrainingConfig::new()
            .with_lr(1e-2)
            .with_batch_size(4)
            .with_epochs(3)
            .with_checkpoint_interval(1)
            .with_checkpoint_dir(dir.to_string_lossy().into_owned())
    }

    #[test]
    fn test_training_config_defaults() {
        let config = KeypointTrainingConfig::new();
        assert_eq!(config.lr, 1e-3);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.epochs, 60);
        assert_eq!(config.val_fraction, 0.15);
        assert_eq!(config.plateau_factor, 0.5);
        assert_eq!(config.plateau_patience, 5);
        assert_eq!(config.early_stopping_patience, 10);
        assert!(config.restore_best);
    }

    #[test]
    fn test_evaluate_matches_batching() {
        let device = Default::default();
        let model = tiny_model_config().init::<TestBackend>(&device);
        let dataset = tiny_dataset(7);

        let whole = evaluate(&model, &dataset, 7, &device).unwrap();
        let chunked = evaluate(&model, &dataset, 3, &device).unwrap();
        assert_eq!(whole.samples, 7);
        assert!((whole.loss - chunked.loss).abs() < 1e-4 * whole.loss.max(1.0));
        assert!((whole.mae - chunked.mae).abs() < 1e-4 * whole.mae.max(1.0));
    }

    #[test]
    fn test_train_reduces_loss_and_writes_checkpoints() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let model_config = tiny_model_config();
        let model = model_config.init::<TestAutodiffBackend>(&device);
        let train_set = tiny_dataset(12);
        let val_set = tiny_dataset(4);
        let config = config_in(tmp.path()).with_epochs(8);

        let outcome = train(
            &config,
            &model_config,
            model,
            &train_set,
            Some(&val_set),
            &device,
            None,
        )
        .unwrap();

        assert_eq!(outcome.history.len(), outcome.last_epoch);
        let first = outcome.history.epochs.first().unwrap().train.loss;
        let last = outcome.history.epochs.last().unwrap().train.loss;
        assert!(last < first, "loss did not decrease: {first} -> {last}");
        assert!(outcome.best_epoch.is_some());

        assert!(tmp.path().join("model_config.json").exists());
        assert!(tmp.path().join("history.json").exists());
        assert!(tmp.path().join("epoch_1/model.mpk").exists());
        assert!(tmp.path().join("epoch_1/optimizer.mpk").exists());
        assert!(tmp.path().join("epoch_1/meta.json").exists());
        assert!(tmp.path().join("best/model.mpk").exists());
        assert!(tmp.path().join("final/model.mpk").exists());

        let reloaded = KeypointNetConfig::load(tmp.path().join("model_config.json")).unwrap();
        assert_eq!(reloaded.c1, 2);
    }

    #[test]
    fn test_resume_continues_epochs() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let model_config = tiny_model_config();
        let train_set = tiny_dataset(8);
        let config = config_in(tmp.path()).with_epochs(2);

        let first = train(
            &config,
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &train_set,
            None,
            &device,
            None,
        )
        .unwrap();
        assert_eq!(first.last_epoch, 2);

        let config = config.with_epochs(4);
        let resumed = train(
            &config,
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &train_set,
            None,
            &device,
            Some(2),
        )
        .unwrap();

        assert_eq!(resumed.last_epoch, 4);
        let epochs: Vec<usize> = resumed.history.epochs.iter().map(|r| r.epoch).collect();
        assert_eq!(epochs, vec![1, 2, 3, 4]);
    }

    fn forward_outputs(model: &KeypointNet<TestBackend>) -> Vec<f32> {
        let input = Tensor::<TestBackend, 4>::full([1, 8, 8, 1], 0.9, &Default::default());
        model.forward(input).into_data().iter::<f32>().collect()
    }

    fn load_outputs(path: &Path, config: &KeypointNetConfig) -> Vec<f32> {
        let model =
            resume_from_checkpoint::<TestBackend>(path, config, &Default::default()).unwrap();
        forward_outputs(&model)
    }

    #[test]
    fn test_resume_restores_best_of_its_own_history() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let model_config = tiny_model_config();
        let train_set = tiny_dataset(8);
        let config = config_in(tmp.path())
            .with_epochs(4)
            .with_checkpoint_interval(2);

        train(
            &config,
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &train_set,
            None,
            &device,
            None,
        )
        .unwrap();
        assert!(tmp.path().join("epoch_2/best_model.mpk").exists());

        // Branch off at epoch 2 and run one more epoch.
        let resumed = train(
            &config.clone().with_epochs(3),
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &train_set,
            None,
            &device,
            Some(2),
        )
        .unwrap();
        let best_epoch = resumed.best_epoch.unwrap();
        assert!(best_epoch <= 3, "best epoch {best_epoch} is not from this run");

        let returned = forward_outputs(&resumed.model.valid());
        if best_epoch <= 2 {
            assert_eq!(returned, load_outputs(&tmp.path().join("epoch_2/best_model"), &model_config));
        } else {
            assert_eq!(returned, load_outputs(&tmp.path().join("final/model"), &model_config));
        }

        // `best/` now describes the resumed run, not the abandoned one.
        let meta: BestMeta = serde_json::from_reader(
            std::fs::File::open(tmp.path().join("best/meta.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(meta.epoch, best_epoch);
        assert_eq!(returned, load_outputs(&tmp.path().join("best/model"), &model_config));
    }

    #[test]
    fn test_resume_at_or_past_epochs_fails_without_touching_final() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let model_config = tiny_model_config();
        let train_set = tiny_dataset(8);
        let config = config_in(tmp.path())
            .with_epochs(4)
            .with_checkpoint_interval(2);

        train(
            &config,
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &train_set,
            None,
            &device,
            None,
        )
        .unwrap();
        let final_before = load_outputs(&tmp.path().join("final/model"), &model_config);

        let result = train(
            &config.clone().with_epochs(2),
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &train_set,
            None,
            &device,
            Some(2),
        );
        assert!(result.is_err());

        let meta: CheckpointMeta = serde_json::from_reader(
            std::fs::File::open(tmp.path().join("final/meta.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(meta.epoch, 4);
        assert_eq!(
            final_before,
            load_outputs(&tmp.path().join("final/model"), &model_config)
        );
    }

    #[test]
    fn test_resume_missing_checkpoint_fails() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let model_config = tiny_model_config();
        let result = train(
            &config_in(tmp.path()),
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &tiny_dataset(4),
            None,
            &device,
            Some(2),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_early_stopping_halts() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let model_config = tiny_model_config();
        // lr = 0 keeps the loss constant, so patience runs out right away.
        let config = config_in(tmp.path())
            .with_lr(0.0)
            .with_epochs(20)
            .with_early_stopping_patience(2)
            .with_checkpoint_interval(0);

        let outcome = train(
            &config,
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &tiny_dataset(6),
            Some(&tiny_dataset(4)),
            &device,
            None,
        )
        .unwrap();

        assert!(outcome.stopped_early);
        assert_eq!(outcome.last_epoch, 3);
        assert_eq!(outcome.best_epoch, Some(1));
        assert!(!tmp.path().join("epoch_1").exists());
    }

    #[test]
    fn test_train_rejects_image_size_mismatch() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let model_config = tiny_model_config().with_image_size(16);
        let result = train(
            &config_in(tmp.path()),
            &model_config,
            model_config.init::<TestAutodiffBackend>(&device),
            &tiny_dataset(4),
            None,
            &device,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_resume_from_checkpoint_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let config = tiny_model_config();
        let model = config.init::<TestBackend>(&device);

        let path = tmp.path().join("model");
        model
            .clone()
            .save_file(&path, &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        let loaded = resume_from_checkpoint::<TestBackend>(&path, &config, &device).unwrap();
        let input = Tensor::<TestBackend, 4>::ones([1, 8, 8, 1], &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().iter::<f32>().collect();
        let b: Vec<f32> = loaded.forward(input).into_data().iter::<f32>().collect();
        assert_eq!(a, b);
    }
}
