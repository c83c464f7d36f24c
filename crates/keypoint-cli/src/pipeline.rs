//! Subcommand pipelines: training, dataset summary, prediction and export.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::config::Config;
use burn::module::AutodiffModule;
use indicatif::{ProgressBar, ProgressStyle};

use facedata::FaceCsvReader;
use keypoints::inference::name_keypoints;
use keypoints::{
    evaluate, export_model, load_prepared, resume_from_checkpoint, save_prepared, train, Keypoint,
    KeypointDataset, KeypointNetConfig, KeypointPredictor,
};

use crate::config::{build_model_config, build_training_config, load_train_toml, TrainCliOverrides, TrainToml};

/// CPU inference backend.
type CpuBackend = NdArray<f32>;
/// CPU training backend.
type TrainBackend = Autodiff<CpuBackend>;

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    /// Keypoints CSV. Required unless `cache` is given.
    pub csv: Option<PathBuf>,
    /// Optional training config TOML file.
    pub config: Option<PathBuf>,
    /// Directory for checkpoints and model config.
    pub output_dir: PathBuf,
    /// CLI overrides applied on top of the TOML.
    pub overrides: TrainCliOverrides,
    /// Resume from `{output_dir}/epoch_{n}`.
    pub resume_from: Option<usize>,
    /// Load prepared samples from this Parquet cache instead of the CSV.
    pub cache: Option<PathBuf>,
    /// Save prepared samples to this Parquet file for reuse.
    pub save_cache: Option<PathBuf>,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    pub csv: PathBuf,
    /// Print JSON instead of text.
    pub json: bool,
}

/// Arguments for the `predict` subcommand.
#[derive(Debug)]
pub struct PredictArgs {
    /// Export or training checkpoint directory.
    pub model_dir: PathBuf,
    /// CSV with an `Image` column; label columns are ignored.
    pub csv: PathBuf,
    /// Output JSON file.
    pub output: PathBuf,
}

/// Arguments for the `export` subcommand.
#[derive(Debug)]
pub struct ExportArgs {
    /// Training output directory (holds `model_config.json`).
    pub checkpoint: PathBuf,
    /// Export `epoch_{n}` instead of the best (or final) weights.
    pub epoch: Option<usize>,
    /// Destination directory.
    pub output: PathBuf,
}

/// One row of `predict` output.
#[derive(Debug, serde::Serialize)]
pub struct PredictionRow {
    /// 1-based CSV data row.
    pub row: usize,
    pub keypoints: Vec<Keypoint>,
}

/// Prepare data, split it, train, and report validation metrics.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Load config
    let toml = match &args.config {
        Some(path) => load_train_toml(path)?,
        None => TrainToml::default(),
    };
    let model_config = build_model_config(&toml.model);
    let config = build_training_config(&toml.training, &args.overrides, &args.output_dir);

    // 2. Load or prepare samples
    let dataset = match (&args.cache, &args.csv) {
        (Some(cache), _) => load_prepared(cache)?,
        (None, Some(csv)) => KeypointDataset::from_csv(csv)?,
        (None, None) => anyhow::bail!("Either --csv or --cache is required"),
    };
    if let Some(path) = &args.save_cache {
        save_prepared(&dataset, path)?;
    }

    // 3. Split
    let (train_set, val_set) = dataset.split(config.val_fraction, config.seed)?;

    // 4. Train
    let device = NdArrayDevice::default();
    let model = model_config.init_seeded::<TrainBackend>(config.seed, &device);
    tracing::info!(
        params = burn::module::Module::num_params(&model),
        output_dir = %args.output_dir.display(),
        "Initialized KeypointNet"
    );
    let outcome = train(
        &config,
        &model_config,
        model,
        &train_set,
        Some(&val_set),
        &device,
        args.resume_from,
    )?;

    // 5. Report
    let elapsed = start.elapsed();
    println!("\n--- Training Summary ---");
    println!("Epochs run: {}", outcome.last_epoch);
    if outcome.stopped_early {
        println!("Stopped early: yes");
    }
    match outcome.best_epoch {
        Some(epoch) => println!("Best epoch: {epoch}"),
        None => println!("Best epoch: none"),
    }
    if !val_set.is_empty() {
        let metrics = evaluate(&outcome.model.valid(), &val_set, config.batch_size, &device)?;
        println!("Validation: {metrics}");
    }
    println!("Output: {}", args.output_dir.display());
    println!("Elapsed: {:.1}s", elapsed.as_secs_f64());

    Ok(())
}

/// Print statistics from a keypoints CSV.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let summary = FaceCsvReader::read_summary(&args.csv)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("--- Dataset Summary ---");
    println!("File: {}", args.csv.display());
    println!("Rows: {}", summary.total_rows);
    println!("Dropped rows: {}", summary.dropped_rows);
    println!("Fully labelled rows: {}", summary.fully_labelled_rows);
    println!("Unlabelled rows: {}", summary.unlabelled_rows);
    println!("Label coverage: {:.1}%", summary.coverage() * 100.0);
    println!("Present per column:");
    for (name, count) in summary.columns.iter().zip(&summary.present_per_column) {
        println!("  {name:<28} {count}");
    }

    Ok(())
}

/// Predict named keypoints for every image in a CSV and write them as JSON.
pub fn run_predict(args: PredictArgs) -> anyhow::Result<()> {
    let predictor = KeypointPredictor::<CpuBackend>::load(&args.model_dir, NdArrayDevice::default())?;
    let records = FaceCsvReader::read_all(&args.csv)?;
    let image_size = predictor.config().image_size;
    if image_size != facedata::IMAGE_SIZE {
        anyhow::bail!(
            "Model expects {image_size}x{image_size} images, CSV holds {0}x{0}",
            facedata::IMAGE_SIZE
        );
    }

    let pb = ProgressBar::new(records.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) Predicting")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut rows = Vec::with_capacity(records.len());
    for chunk in records.chunks(256) {
        let images: Vec<Vec<f32>> = chunk.iter().map(|r| r.normalized_image()).collect();
        let coords = predictor.predict(&images)?;
        for (record, coords) in chunk.iter().zip(coords) {
            rows.push(PredictionRow {
                row: record.row,
                keypoints: name_keypoints(&coords),
            });
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    write_json(&args.output, &rows)?;
    tracing::info!(rows = rows.len(), output = %args.output.display(), "Wrote predictions");
    println!("Predicted {} images -> {}", rows.len(), args.output.display());
    Ok(())
}

/// Export trained weights plus a manifest.
pub fn run_export(args: ExportArgs) -> anyhow::Result<()> {
    let config_path = args.checkpoint.join("model_config.json");
    let model_config = KeypointNetConfig::load(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", config_path.display()))?;

    let weights = select_weights(&args.checkpoint, args.epoch)?;
    let device = NdArrayDevice::default();
    let model = resume_from_checkpoint::<CpuBackend>(&weights, &model_config, &device)?;

    let manifest = export_model(model, &model_config, &args.output)?;
    println!(
        "Exported {} -> {} (input {:?}, output {:?})",
        weights.display(),
        args.output.display(),
        manifest.input_shape,
        manifest.output_shape
    );
    Ok(())
}

/// Weights stem to export: `epoch_{n}` when given, else `best`, else `final`.
fn select_weights(checkpoint: &Path, epoch: Option<usize>) -> anyhow::Result<PathBuf> {
    let candidates: Vec<PathBuf> = match epoch {
        Some(n) => vec![checkpoint.join(format!("epoch_{n}"))],
        None => vec![checkpoint.join("best"), checkpoint.join("final")],
    };
    candidates
        .iter()
        .map(|dir| dir.join("model"))
        .find(|stem| stem.with_extension("mpk").exists())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No weights found in {} (looked in {:?})",
                checkpoint.display(),
                candidates
            )
        })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)
        .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_select_weights_prefers_best() {
        let tmp = TempDir::new().unwrap();
        for sub in ["best", "final", "epoch_3"] {
            std::fs::create_dir_all(tmp.path().join(sub)).unwrap();
            std::fs::write(tmp.path().join(sub).join("model.mpk"), b"").unwrap();
        }

        let stem = select_weights(tmp.path(), None).unwrap();
        assert_eq!(stem, tmp.path().join("best").join("model"));

        let stem = select_weights(tmp.path(), Some(3)).unwrap();
        assert_eq!(stem, tmp.path().join("epoch_3").join("model"));

        assert!(select_weights(tmp.path(), Some(4)).is_err());
    }

    #[test]
    fn test_select_weights_falls_back_to_final() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("final")).unwrap();
        std::fs::write(tmp.path().join("final").join("model.mpk"), b"").unwrap();

        let stem = select_weights(tmp.path(), None).unwrap();
        assert_eq!(stem, tmp.path().join("final").join("model"));
    }

    #[test]
    fn test_train_requires_data_source() {
        let tmp = TempDir::new().unwrap();
        let result = run_train(TrainArgs {
            csv: None,
            config: None,
            output_dir: tmp.path().to_path_buf(),
            overrides: TrainCliOverrides::default(),
            resume_from: None,
            cache: None,
            save_cache: None,
        });
        assert!(result.is_err());
    }
}
