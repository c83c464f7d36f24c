//! Portable model export: weights plus a JSON manifest describing the
//! fixed input/output contract.
//!
//! ```text
//! {out_dir}/model.mpk      burn named MessagePack record, full precision
//! {out_dir}/manifest.json  ExportManifest
//! ```

use std::path::Path;

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use facedata::{coordinate_names, KEYPOINT_NAMES};

use crate::model::cnn::{KeypointNet, KeypointNetConfig};

/// Manifest format written by this version.
pub const FORMAT_VERSION: u32 = 1;

/// Name of the manifest file inside an export directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Stem of the weights file inside an export directory.
pub const WEIGHTS_STEM: &str = "model";

/// Description of an exported model. Dimensions given as `None` are free
/// (the batch axis).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportManifest {
    pub format_version: u32,
    pub framework: String,
    pub weights_file: String,
    /// Image layout of `input_shape`.
    pub layout: String,
    pub input_shape: Vec<Option<usize>>,
    pub output_shape: Vec<Option<usize>>,
    /// Keypoint names, one per (x, y) output pair.
    pub keypoint_names: Vec<String>,
    /// Output column names, in output order.
    pub output_names: Vec<String>,
    pub model: KeypointNetConfig,
}

impl ExportManifest {
    pub fn new(config: &KeypointNetConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            framework: "burn".to_string(),
            weights_file: format!("{WEIGHTS_STEM}.mpk"),
            layout: "NHWC".to_string(),
            input_shape: vec![None, Some(config.image_size), Some(config.image_size), Some(1)],
            output_shape: vec![None, Some(config.n_outputs)],
            keypoint_names: KEYPOINT_NAMES.iter().map(|s| s.to_string()).collect(),
            output_names: coordinate_names(),
            model: config.clone(),
        }
    }

    /// Check that the declared shapes agree with the embedded model config.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.format_version != FORMAT_VERSION {
            anyhow::bail!(
                "Unsupported manifest format version {} (expected {FORMAT_VERSION})",
                self.format_version
            );
        }
        let size = Some(self.model.image_size);
        if self.input_shape != vec![None, size, size, Some(1)] {
            anyhow::bail!(
                "Manifest input shape {:?} does not match model image size {}",
                self.input_shape,
                self.model.image_size
            );
        }
        if self.output_shape != vec![None, Some(self.model.n_outputs)] {
            anyhow::bail!(
                "Manifest output shape {:?} does not match model outputs {}",
                self.output_shape,
                self.model.n_outputs
            );
        }
        if self.output_names.len() != self.model.n_outputs {
            anyhow::bail!(
                "Manifest lists {} output names for {} outputs",
                self.output_names.len(),
                self.model.n_outputs
            );
        }
        Ok(())
    }
}

/// Write `model` and its manifest to `out_dir`.
pub fn export_model<B: Backend>(
    model: KeypointNet<B>,
    config: &KeypointNetConfig,
    out_dir: &Path,
) -> anyhow::Result<ExportManifest> {
    std::fs::create_dir_all(out_dir)?;

    model
        .save_file(
            out_dir.join(WEIGHTS_STEM),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to save weights to {}: {e}", out_dir.display()))?;

    let manifest = ExportManifest::new(config);
    serde_json::to_writer_pretty(
        std::fs::File::create(out_dir.join(MANIFEST_FILE))?,
        &manifest,
    )?;

    tracing::info!(
        dir = %out_dir.display(),
        input = ?manifest.input_shape,
        output = ?manifest.output_shape,
        "Exported keypoint model"
    );
    Ok(manifest)
}

/// Read a manifest and load the weights it describes.
pub fn load_exported<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> anyhow::Result<(KeypointNet<B>, ExportManifest)> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest: ExportManifest = serde_json::from_reader(
        std::fs::File::open(&manifest_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", manifest_path.display()))?,
    )
    .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", manifest_path.display()))?;
    manifest.validate()?;

    let model = manifest
        .model
        .init::<B>(device)
        .load_file(
            dir.join(WEIGHTS_STEM),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load weights from {}: {e}", dir.display()))?;

    Ok((model, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use facedata::{IMAGE_SIZE, NUM_COORDS};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn small_config() -> KeypointNetConfig {
        KeypointNetConfig::new()
            .with_image_size(16)
            .with_c1(2)
            .with_c2(2)
            .with_c3(2)
            .with_d_hidden(4)
    }

    #[test]
    fn test_default_manifest_shapes() {
        let manifest = ExportManifest::new(&KeypointNetConfig::new());
        assert_eq!(
            manifest.input_shape,
            vec![None, Some(IMAGE_SIZE), Some(IMAGE_SIZE), Some(1)]
        );
        assert_eq!(manifest.output_shape, vec![None, Some(NUM_COORDS)]);
        assert_eq!(manifest.keypoint_names.len(), 15);
        assert_eq!(manifest.output_names[0], "left_eye_center_x");
        assert_eq!(manifest.output_names[29], "mouth_center_bottom_lip_y");
        manifest.validate().unwrap();
    }

    #[test]
    fn test_export_roundtrip_preserves_outputs() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config();
        let model = config.init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([2, 16, 16, 1], &device);
        let before: Vec<f32> = model.forward(input.clone()).into_data().iter::<f32>().collect();

        let written = export_model(model, &config, tmp.path()).unwrap();
        assert!(tmp.path().join("model.mpk").exists());
        assert!(tmp.path().join(MANIFEST_FILE).exists());

        let (loaded, manifest) = load_exported::<TestBackend>(tmp.path(), &device).unwrap();
        assert_eq!(manifest.output_names, written.output_names);
        assert_eq!(manifest.model.c1, 2);
        assert_eq!(manifest.input_shape, vec![None, Some(16), Some(16), Some(1)]);

        let output = loaded.forward(input);
        assert_eq!(output.dims(), [2, NUM_COORDS]);
        let after: Vec<f32> = output.into_data().iter::<f32>().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_validate_rejects_tampered_shapes() {
        let mut manifest = ExportManifest::new(&small_config());
        manifest.input_shape = vec![None, Some(96), Some(96), Some(1)];
        assert!(manifest.validate().is_err());

        let mut manifest = ExportManifest::new(&small_config());
        manifest.format_version = 99;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_load_missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let device = Default::default();
        assert!(load_exported::<TestBackend>(tmp.path(), &device).is_err());
    }
}
