//! Dataset preparation for keypoint training.
//!
//! Turns raw `FaceRecord`s from the `facedata` crate into normalized images
//! plus packed targets, then provides a seeded train/validation split and
//! shuffled batching. Packing runs once here; the training loop only reads.

use std::path::Path;

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use facedata::{FaceCsvReader, FaceRecord, IMAGE_SIZE};

use crate::model::bridge::{images_to_tensor, packed_to_tensor};
use crate::training::packing::{pack_batch, PackedTarget};

/// One training example after packing.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSample {
    /// Source row in the CSV (1-based), kept for diagnostics.
    pub row: usize,
    /// Row-major pixels in `[0, 1]`, length `image_size²`.
    pub image: Vec<f32>,
    /// `[labels | mask]` target.
    pub target: PackedTarget,
}

/// Prepared samples sharing one square image size.
#[derive(Debug, Clone)]
pub struct KeypointDataset {
    samples: Vec<PreparedSample>,
    image_size: usize,
}

impl KeypointDataset {
    /// Build a dataset from already-prepared samples.
    ///
    /// # Errors
    /// Returns an error if any image does not have `image_size²` pixels.
    pub fn new(samples: Vec<PreparedSample>, image_size: usize) -> anyhow::Result<Self> {
        let pixels = image_size * image_size;
        if let Some(bad) = samples.iter().find(|s| s.image.len() != pixels) {
            anyhow::bail!(
                "Sample from row {} has {} pixels, expected {pixels}",
                bad.row,
                bad.image.len()
            );
        }
        Ok(Self {
            samples,
            image_size,
        })
    }

    /// Pack raw records. Samples whose labels fail to pack are skipped with
    /// a warning; the rest are kept in input order.
    ///
    /// # Errors
    /// Returns an error if no record survives preparation.
    pub fn prepare(records: &[FaceRecord]) -> anyhow::Result<Self> {
        let labels: Vec<&[f32]> = records.iter().map(|r| r.labels.as_slice()).collect();
        let targets = pack_batch(&labels);

        let prepared: Vec<Option<PreparedSample>> = records
            .par_iter()
            .zip(targets.into_par_iter())
            .map(|(record, target)| match target {
                Ok(target) => Some(PreparedSample {
                    row: record.row,
                    image: record.normalized_image(),
                    target,
                }),
                Err(e) => {
                    tracing::warn!(row = record.row, error = %e, "Rejected sample");
                    None
                }
            })
            .collect();

        let total = prepared.len();
        let samples: Vec<PreparedSample> = prepared.into_iter().flatten().collect();
        let rejected = total - samples.len();

        if samples.is_empty() {
            anyhow::bail!("No usable samples: all {total} records were rejected during packing");
        }

        let dataset = Self::new(samples, IMAGE_SIZE)?;
        tracing::info!(
            samples = dataset.len(),
            rejected,
            coverage = format!("{:.3}", dataset.label_coverage()),
            "Prepared keypoint dataset"
        );
        Ok(dataset)
    }

    /// Read a keypoints CSV and prepare it.
    pub fn from_csv(path: &Path) -> anyhow::Result<Self> {
        let records = FaceCsvReader::read_all(path)?;
        Self::prepare(&records)
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Image side length.
    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// All samples in order.
    pub fn samples(&self) -> &[PreparedSample] {
        &self.samples
    }

    /// Fraction of label coordinates present across the dataset.
    pub fn label_coverage(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let present: usize = self.samples.iter().map(|s| s.target.present_count()).sum();
        let width = self.samples[0].target.labels().len();
        present as f64 / (self.samples.len() * width) as f64
    }

    /// Shuffle with `seed` and split off `ceil(len * val_fraction)` samples
    /// for validation. Same seed → same split.
    ///
    /// # Errors
    /// Returns an error if `val_fraction` is outside `[0, 1)` or the split
    /// would leave the training set empty.
    pub fn split(self, val_fraction: f64, seed: u64) -> anyhow::Result<(Self, Self)> {
        if !(0.0..1.0).contains(&val_fraction) {
            anyhow::bail!("val_fraction must be in [0, 1), got {val_fraction}");
        }
        let n = self.samples.len();
        let n_val = (n as f64 * val_fraction).ceil() as usize;
        if n_val >= n {
            anyhow::bail!("Split of {n} samples with val_fraction {val_fraction} leaves no training data");
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut samples = self.samples;
        samples.shuffle(&mut rng);
        let train = samples.split_off(n_val);

        tracing::info!(train = train.len(), val = samples.len(), seed, "Split dataset");
        Ok((
            Self {
                samples: train,
                image_size: self.image_size,
            },
            Self {
                samples,
                image_size: self.image_size,
            },
        ))
    }

    /// Shuffled batches of sample indices covering every sample exactly once.
    /// The last batch may be smaller.
    pub fn shuffled_batches(&self, batch_size: usize, rng: &mut impl Rng) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.samples.len()).collect();
        indices.shuffle(rng);
        indices
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }

    /// In-order batches of sample indices.
    pub fn sequential_batches(&self, batch_size: usize) -> Vec<Vec<usize>> {
        (0..self.samples.len())
            .collect::<Vec<_>>()
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }

    /// Build `(images, packed)` tensors for the given sample indices.
    ///
    /// Shapes: images `(batch, H, W, 1)`, packed `(batch, 60)`.
    pub fn batch_tensors<B: Backend>(
        &self,
        indices: &[usize],
        device: &B::Device,
    ) -> (Tensor<B, 4>, Tensor<B, 2>) {
        let images: Vec<&[f32]> = indices
            .iter()
            .map(|&i| self.samples[i].image.as_slice())
            .collect();
        let targets: Vec<PackedTarget> = indices.iter().map(|&i| self.samples[i].target).collect();
        (
            images_to_tensor::<B>(&images, self.image_size, device),
            packed_to_tensor::<B>(&targets, device),
        )
    }
}
