//! TOML config loading for the training CLI.
//!
//! Deserializes `configs/train.toml`, which has optional `[model]` and
//! `[training]` sections, then merges with CLI overrides.

use std::path::Path;

use keypoints::{KeypointNetConfig, KeypointTrainingConfig};
use serde::Deserialize;

/// Top-level structure matching `configs/train.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct TrainToml {
    /// Architecture overrides.
    #[serde(default)]
    pub model: ModelOverrides,
    /// Training hyperparameter overrides.
    #[serde(default)]
    pub training: TrainingOverrides,
}

/// Optional overrides for `KeypointNetConfig` fields.
///
/// The image size and output width are fixed by the dataset and cannot be
/// overridden here.
#[derive(Debug, Default, Deserialize)]
pub struct ModelOverrides {
    pub c1: Option<usize>,
    pub c2: Option<usize>,
    pub c3: Option<usize>,
    pub d_hidden: Option<usize>,
    pub dropout1: Option<f64>,
    pub dropout2: Option<f64>,
    pub dropout3: Option<f64>,
    pub head_dropout: Option<f64>,
}

/// Optional overrides for `KeypointTrainingConfig` fields.
#[derive(Debug, Default, Deserialize)]
pub struct TrainingOverrides {
    pub lr: Option<f64>,
    pub batch_size: Option<usize>,
    pub epochs: Option<usize>,
    pub val_fraction: Option<f64>,
    pub seed: Option<u64>,
    pub max_grad_norm: Option<f64>,
    pub weight_decay: Option<f64>,
    pub plateau_factor: Option<f64>,
    pub plateau_patience: Option<usize>,
    pub min_lr: Option<f64>,
    pub early_stopping_patience: Option<usize>,
    pub restore_best: Option<bool>,
    pub checkpoint_interval: Option<usize>,
}

/// Training flags that can be given on the command line.
#[derive(Debug, Default, Clone)]
pub struct TrainCliOverrides {
    pub epochs: Option<usize>,
    pub lr: Option<f64>,
    pub batch_size: Option<usize>,
    pub seed: Option<u64>,
}

/// Load and deserialize a `TrainToml` from a TOML file.
pub fn load_train_toml(path: &Path) -> anyhow::Result<TrainToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let config: TrainToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded training config");
    Ok(config)
}

/// Build a `KeypointNetConfig` from defaults and TOML overrides.
pub fn build_model_config(overrides: &ModelOverrides) -> KeypointNetConfig {
    let mut config = KeypointNetConfig::new();
    if let Some(v) = overrides.c1 {
        config.c1 = v;
    }
    if let Some(v) = overrides.c2 {
        config.c2 = v;
    }
    if let Some(v) = overrides.c3 {
        config.c3 = v;
    }
    if let Some(v) = overrides.d_hidden {
        config.d_hidden = v;
    }
    if let Some(v) = overrides.dropout1 {
        config.dropout1 = v;
    }
    if let Some(v) = overrides.dropout2 {
        config.dropout2 = v;
    }
    if let Some(v) = overrides.dropout3 {
        config.dropout3 = v;
    }
    if let Some(v) = overrides.head_dropout {
        config.head_dropout = v;
    }
    config
}

/// Build a `KeypointTrainingConfig`.
///
/// Priority chain: `KeypointTrainingConfig::new()` defaults < TOML values < CLI flags.
pub fn build_training_config(
    overrides: &TrainingOverrides,
    cli: &TrainCliOverrides,
    checkpoint_dir: &Path,
) -> KeypointTrainingConfig {
    let mut config = KeypointTrainingConfig::new()
        .with_checkpoint_dir(checkpoint_dir.to_string_lossy().into_owned());

    // Apply TOML overrides
    if let Some(v) = overrides.lr {
        config.lr = v;
    }
    if let Some(v) = overrides.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = overrides.epochs {
        config.epochs = v;
    }
    if let Some(v) = overrides.val_fraction {
        config.val_fraction = v;
    }
    if let Some(v) = overrides.seed {
        config.seed = v;
    }
    if let Some(v) = overrides.max_grad_norm {
        config.max_grad_norm = v;
    }
    if let Some(v) = overrides.weight_decay {
        config.weight_decay = v;
    }
    if let Some(v) = overrides.plateau_factor {
        config.plateau_factor = v;
    }
    if let Some(v) = overrides.plateau_patience {
        config.plateau_patience = v;
    }
    if let Some(v) = overrides.min_lr {
        config.min_lr = v;
    }
    if let Some(v) = overrides.early_stopping_patience {
        config.early_stopping_patience = v;
    }
    if let Some(v) = overrides.restore_best {
        config.restore_best = v;
    }
    if let Some(v) = overrides.checkpoint_interval {
        config.checkpoint_interval = v;
    }

    // CLI flags take highest priority
    if let Some(v) = cli.epochs {
        config.epochs = v;
    }
    if let Some(v) = cli.lr {
        config.lr = v;
    }
    if let Some(v) = cli.batch_size {
        config.batch_size = v;
    }
    if let Some(v) = cli.seed {
        config.seed = v;
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_deserialize_full_train_toml() {
        let toml_str = r#"
[model]
c1 = 16
c2 = 32
c3 = 64
d_hidden = 128
dropout1 = 0.05
head_dropout = 0.5

[training]
lr = 0.0005
batch_size = 32
epochs = 40
val_fraction = 0.2
seed = 7
plateau_factor = 0.25
plateau_patience = 3
early_stopping_patience = 8
restore_best = false
checkpoint_interval = 2
"#;
        let config: TrainToml = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.c1, Some(16));
        assert_eq!(config.model.d_hidden, Some(128));
        assert_eq!(config.model.dropout2, None);
        assert_eq!(config.training.batch_size, Some(32));
        assert_eq!(config.training.seed, Some(7));
        assert_eq!(config.training.restore_best, Some(false));

        let model = build_model_config(&config.model);
        assert_eq!(model.c3, 64);
        assert_eq!(model.dropout1, 0.05);
        assert_eq!(model.dropout2, 0.2); // default kept
        assert_eq!(model.image_size, 96);

        let training = build_training_config(
            &config.training,
            &TrainCliOverrides::default(),
            &PathBuf::from("out"),
        );
        assert_eq!(training.lr, 0.0005);
        assert_eq!(training.epochs, 40);
        assert_eq!(training.plateau_patience, 3);
        assert!(!training.restore_best);
        assert_eq!(training.checkpoint_dir, "out");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: TrainToml = toml::from_str("").unwrap();
        let model = build_model_config(&config.model);
        assert_eq!(model.c1, 32);
        assert_eq!(model.d_hidden, 256);

        let training = build_training_config(
            &config.training,
            &TrainCliOverrides::default(),
            &PathBuf::from("checkpoints"),
        );
        assert_eq!(training.lr, 1e-3);
        assert_eq!(training.batch_size, 64);
        assert_eq!(training.epochs, 60);
        assert_eq!(training.early_stopping_patience, 10);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let config: TrainToml = toml::from_str("[training]\nepochs = 40\nlr = 0.01\nseed = 1").unwrap();
        let cli = TrainCliOverrides {
            epochs: Some(3),
            lr: None,
            batch_size: Some(8),
            seed: Some(99),
        };
        let training = build_training_config(&config.training, &cli, &PathBuf::from("x"));
        assert_eq!(training.epochs, 3); // CLI wins
        assert_eq!(training.lr, 0.01); // TOML kept
        assert_eq!(training.batch_size, 8);
        assert_eq!(training.seed, 99);
    }

    #[test]
    fn test_repo_train_toml_parses() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../configs/train.toml");
        let config = load_train_toml(&path).unwrap();
        let training = build_training_config(
            &config.training,
            &TrainCliOverrides::default(),
            &PathBuf::from("c"),
        );
        assert_eq!(training.batch_size, 64);
        assert_eq!(training.val_fraction, 0.15);
    }

    #[test]
    fn test_bad_toml_is_error() {
        assert!(toml::from_str::<TrainToml>("[training]\nepochs = \"many\"").is_err());
    }
}
