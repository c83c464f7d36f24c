//! Batch keypoint prediction.
//!
//! `KeypointPredictor<B>` wraps a trained `KeypointNet` and turns flattened
//! `[0, 1]` images into coordinate vectors or named keypoints. It loads either
//! an export directory (`manifest.json`) or a training checkpoint directory
//! (`model_config.json` plus `best/` or `final/` weights).

use std::path::Path;

use burn::prelude::*;

use facedata::KEYPOINT_NAMES;

use crate::export::{load_exported, MANIFEST_FILE};
use crate::model::bridge::{images_to_tensor, tensor_to_rows};
use crate::model::cnn::{KeypointNet, KeypointNetConfig};
use crate::training::trainer::resume_from_checkpoint;

/// Images per forward pass.
const PREDICT_CHUNK: usize = 64;

/// One predicted facial keypoint, in pixels.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Keypoint {
    pub name: String,
    pub x: f32,
    pub y: f32,
}

/// Generic keypoint predictor parameterized by burn backend.
pub struct KeypointPredictor<B: Backend> {
    model: KeypointNet<B>,
    config: KeypointNetConfig,
    device: B::Device,
}

impl<B: Backend> KeypointPredictor<B> {
    pub fn new(model: KeypointNet<B>, config: KeypointNetConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }

    /// Load from an export or checkpoint directory.
    pub fn load(dir: &Path, device: B::Device) -> anyhow::Result<Self> {
        if dir.join(MANIFEST_FILE).exists() {
            let (model, manifest) = load_exported::<B>(dir, &device)?;
            return Ok(Self::new(model, manifest.model, device));
        }

        let config_path = dir.join("model_config.json");
        let config = KeypointNetConfig::load(&config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", config_path.display()))?;

        let weights = ["best", "final"]
            .iter()
            .map(|sub| dir.join(sub).join("model"))
            .find(|stem| stem.with_extension("mpk").exists())
            .ok_or_else(|| {
                anyhow::anyhow!("No best/ or final/ weights found in {}", dir.display())
            })?;
        tracing::info!(weights = %weights.display(), "Loading keypoint model");

        let model = resume_from_checkpoint::<B>(&weights, &config, &device)?;
        Ok(Self::new(model, config, device))
    }

    /// Architecture of the wrapped model.
    pub fn config(&self) -> &KeypointNetConfig {
        &self.config
    }

    /// Predict coordinates for flattened images.
    ///
    /// Each image must hold `image_size²` pixels in `[0, 1]`. Returns one
    /// `n_outputs`-wide row per image, in input order.
    pub fn predict(&self, images: &[Vec<f32>]) -> anyhow::Result<Vec<Vec<f32>>> {
        let pixels = self.config.image_size * self.config.image_size;
        if let Some((i, bad)) = images.iter().enumerate().find(|(_, im)| im.len() != pixels) {
            anyhow::bail!("Image {i} has {} pixels, expected {pixels}", bad.len());
        }

        let mut rows = Vec::with_capacity(images.len());
        for chunk in images.chunks(PREDICT_CHUNK) {
            let refs: Vec<&[f32]> = chunk.iter().map(|v| v.as_slice()).collect();
            let input = images_to_tensor::<B>(&refs, self.config.image_size, &self.device);
            rows.extend(tensor_to_rows(self.model.forward(input)));
        }
        Ok(rows)
    }

    /// Predict named keypoints for one image.
    pub fn predict_keypoints(&self, image: &[f32]) -> anyhow::Result<Vec<Keypoint>> {
        let rows = self.predict(&[image.to_vec()])?;
        let coords = rows
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Model returned no output"))?;
        Ok(name_keypoints(&coords))
    }
}

/// Pair a flat `[x0, y0, x1, y1, ...]` vector with the keypoint names.
pub fn name_keypoints(coords: &[f32]) -> Vec<Keypoint> {
    KEYPOINT_NAMES
        .iter()
        .zip(coords.chunks_exact(2))
        .map(|(name, xy)| Keypoint {
            name: name.to_string(),
            x: xy[0],
            y: xy[1],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_model;
    use burn::backend::ndarray::NdArray;
    use facedata::NUM_COORDS;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn small_config() -> KeypointNetConfig {
        KeypointNetConfig::new()
            .with_image_size(8)
            .with_c1(2)
            .with_c2(2)
            .with_c3(2)
            .with_d_hidden(4)
    }

    fn predictor() -> KeypointPredictor<TestBackend> {
        let device: <TestBackend as Backend>::Device = Default::default();
        let config = small_config();
        KeypointPredictor::new(config.init(&device), config, device)
    }

    #[test]
    fn test_name_keypoints() {
        let coords: Vec<f32> = (0..NUM_COORDS).map(|i| i as f32).collect();
        let keypoints = name_keypoints(&coords);
        assert_eq!(keypoints.len(), 15);
        assert_eq!(keypoints[0].name, "left_eye_center");
        assert_eq!((keypoints[0].x, keypoints[0].y), (0.0, 1.0));
        assert_eq!(keypoints[14].name, "mouth_center_bottom_lip");
        assert_eq!((keypoints[14].x, keypoints[14].y), (28.0, 29.0));
    }

    #[test]
    fn test_predict_chunks_preserve_order() {
        let predictor = predictor();
        let images: Vec<Vec<f32>> = (0..PREDICT_CHUNK + 3)
            .map(|i| vec![(i % 7) as f32 / 7.0; 64])
            .collect();

        let rows = predictor.predict(&images).unwrap();
        assert_eq!(rows.len(), images.len());
        assert!(rows.iter().all(|r| r.len() == NUM_COORDS));

        // Same image → same prediction, regardless of chunk
        let single = predictor.predict(&images[PREDICT_CHUNK..PREDICT_CHUNK + 1]).unwrap();
        for (a, b) in rows[PREDICT_CHUNK].iter().zip(&single[0]) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_predict_rejects_wrong_size() {
        let predictor = predictor();
        assert!(predictor.predict(&[vec![0.0; 63]]).is_err());
        assert!(predictor.predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_predict_keypoints() {
        let keypoints = predictor().predict_keypoints(&[0.5; 64]).unwrap();
        assert_eq!(keypoints.len(), 15);
        assert!(keypoints.iter().all(|k| k.x.is_finite() && k.y.is_finite()));
    }

    #[test]
    fn test_load_from_export_dir() {
        let tmp = TempDir::new().unwrap();
        let device: <TestBackend as Backend>::Device = Default::default();
        let config = small_config();
        export_model(config.init::<TestBackend>(&device), &config, tmp.path()).unwrap();

        let predictor = KeypointPredictor::<TestBackend>::load(tmp.path(), device).unwrap();
        assert_eq!(predictor.config().image_size, 8);
        assert_eq!(predictor.predict(&[vec![0.1; 64]]).unwrap()[0].len(), NUM_COORDS);
    }

    #[test]
    fn test_load_from_empty_dir_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(KeypointPredictor::<TestBackend>::load(tmp.path(), Default::default()).is_err());
    }
}
