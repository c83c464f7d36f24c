mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::TrainCliOverrides;
use pipeline::{ExportArgs, PredictArgs, SummaryArgs, TrainArgs};

/// fkd: facial keypoint detection with a masked-label objective.
#[derive(Parser)]
#[command(name = "fkd", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for training, dataset inspection, prediction, and export.
#[derive(Subcommand)]
enum Command {
    /// Train the keypoint regressor on a keypoints CSV.
    Train {
        /// Path to the keypoints CSV (30 label columns + `Image`).
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Path to training config TOML file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for saving checkpoints.
        #[arg(long, default_value = "checkpoints/keypoints")]
        output_dir: PathBuf,
        /// Override the number of epochs.
        #[arg(long)]
        epochs: Option<usize>,
        /// Override the initial learning rate.
        #[arg(long)]
        lr: Option<f64>,
        /// Override the batch size.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Override the seed for split, shuffling and initialization.
        #[arg(long)]
        seed: Option<u64>,
        /// Resume training from `{output_dir}/epoch_{N}`.
        #[arg(long)]
        resume_from: Option<usize>,
        /// Path to a prepared-sample cache (Parquet). Replaces --csv.
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Save prepared samples to this path for reuse.
        #[arg(long)]
        save_cache: Option<PathBuf>,
    },
    /// Print label statistics from a keypoints CSV.
    Summary {
        /// Path to the keypoints CSV.
        #[arg(long)]
        csv: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
    /// Predict keypoints for every image in a CSV.
    Predict {
        /// Export directory or training checkpoint directory.
        #[arg(long)]
        model_dir: PathBuf,
        /// CSV with an `Image` column.
        #[arg(long)]
        csv: PathBuf,
        /// Path for the output JSON file.
        #[arg(long)]
        output: PathBuf,
    },
    /// Export trained weights and a shape manifest.
    Export {
        /// Training output directory.
        #[arg(long)]
        checkpoint: PathBuf,
        /// Export a specific epoch checkpoint instead of the best weights.
        #[arg(long)]
        epoch: Option<usize>,
        /// Destination directory.
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            csv,
            config,
            output_dir,
            epochs,
            lr,
            batch_size,
            seed,
            resume_from,
            cache,
            save_cache,
        } => pipeline::run_train(TrainArgs {
            csv,
            config,
            output_dir,
            overrides: TrainCliOverrides {
                epochs,
                lr,
                batch_size,
                seed,
            },
            resume_from,
            cache,
            save_cache,
        }),
        Command::Summary { csv, json } => pipeline::run_summary(SummaryArgs { csv, json }),
        Command::Predict {
            model_dir,
            csv,
            output,
        } => pipeline::run_predict(PredictArgs {
            model_dir,
            csv,
            output,
        }),
        Command::Export {
            checkpoint,
            epoch,
            output,
        } => pipeline::run_export(ExportArgs {
            checkpoint,
            epoch,
            output,
        }),
    }
}
