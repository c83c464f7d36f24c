//! Label packing: `[labels (30) | presence mask (30)]` in one 60-wide target.
//!
//! Supervised pipelines only hand `(input, target)` to the loss, so the mask
//! travels as extra target columns. Missing labels (`NaN`) become `0.0` in the
//! label half and `0.0` in the mask half; the label value is then inert because
//! the objective multiplies every error term by the mask.
//!
//! Decoding must split at [`MASK_OFFSET`], the same offset used here.

use facedata::NUM_COORDS;
use rayon::prelude::*;

/// Number of label coordinates per sample.
pub const LABEL_WIDTH: usize = NUM_COORDS;

/// Column where the presence mask starts inside a packed target.
pub const MASK_OFFSET: usize = LABEL_WIDTH;

/// Width of a packed target: labels followed by mask.
pub const PACKED_WIDTH: usize = LABEL_WIDTH * 2;

/// Errors raised while preparing a packed target.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PackError {
    /// Raw label vector does not have `LABEL_WIDTH` entries.
    #[error("label vector has {0} values, expected {LABEL_WIDTH}")]
    WrongLength(usize),

    /// A label is infinite. Only finite values or `NaN` (missing) are accepted.
    #[error("label {index} is {value}; only finite values or NaN (missing) are accepted")]
    NonFinite { index: usize, value: f32 },

    /// Packed vector does not have `PACKED_WIDTH` entries.
    #[error("packed target has {0} values, expected {PACKED_WIDTH}")]
    PackedWidth(usize),

    /// Mask entry other than 0 or 1 found while decoding.
    #[error("mask entry {index} is {value}, expected 0 or 1")]
    InvalidMask { index: usize, value: f32 },
}

/// One packed training target: cleaned labels then presence mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackedTarget([f32; PACKED_WIDTH]);

impl PackedTarget {
    /// Rebuild a packed target from its 60 stored values (e.g. from the cache).
    ///
    /// Validates width and that the mask half is strictly binary.
    pub fn from_slice(values: &[f32]) -> Result<Self, PackError> {
        let values: [f32; PACKED_WIDTH] = values
            .try_into()
            .map_err(|_| PackError::PackedWidth(values.len()))?;
        for (index, &value) in values[MASK_OFFSET..].iter().enumerate() {
            if value != 0.0 && value != 1.0 {
                return Err(PackError::InvalidMask { index, value });
            }
        }
        Ok(Self(values))
    }

    /// All 60 values.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Cleaned labels (missing entries hold 0).
    pub fn labels(&self) -> &[f32] {
        &self.0[..MASK_OFFSET]
    }

    /// Presence mask (1 = annotated).
    pub fn mask(&self) -> &[f32] {
        &self.0[MASK_OFFSET..]
    }

    /// Number of annotated coordinates.
    pub fn present_count(&self) -> usize {
        self.mask().iter().filter(|&&m| m > 0.0).count()
    }
}

/// Pack a label vector of any width into `[cleaned | mask]`.
///
/// Width-agnostic building block of [`pack_labels`]; the output is twice the
/// input length and must be decoded at offset `labels.len()`.
pub fn pack_vector(labels: &[f32]) -> Result<Vec<f32>, PackError> {
    let width = labels.len();
    let mut packed = vec![0.0_f32; width * 2];
    for (index, &value) in labels.iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        if value.is_infinite() {
            return Err(PackError::NonFinite { index, value });
        }
        packed[index] = value;
        packed[width + index] = 1.0;
    }
    Ok(packed)
}

/// Pack one raw label vector (`NaN` = missing) into a [`PackedTarget`].
///
/// An all-missing vector is valid and yields an all-zero mask.
pub fn pack_labels(labels: &[f32]) -> Result<PackedTarget, PackError> {
    if labels.len() != LABEL_WIDTH {
        return Err(PackError::WrongLength(labels.len()));
    }
    let packed = pack_vector(labels)?;
    let mut values = [0.0_f32; PACKED_WIDTH];
    values.copy_from_slice(&packed);
    Ok(PackedTarget(values))
}

/// Pack many label vectors in parallel. Results keep input order and each
/// sample fails independently.
pub fn pack_batch<L: AsRef<[f32]> + Sync>(labels: &[L]) -> Vec<Result<PackedTarget, PackError>> {
    labels.par_iter().map(|l| pack_labels(l.as_ref())).collect()
}

/// Split a packed slice into `(labels, mask)` at [`MASK_OFFSET`].
pub fn unpack(packed: &[f32]) -> Result<(&[f32], &[f32]), PackError> {
    if packed.len() != PACKED_WIDTH {
        return Err(PackError::PackedWidth(packed.len()));
    }
    Ok(packed.split_at(MASK_OFFSET))
}
