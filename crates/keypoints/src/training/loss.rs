//! Masked regression objective and masked MAE metric.
//!
//! Both functions are generic over `B: Backend` and share one reduction:
//!
//! ```text
//! err[b, i]      = e(true[b, i] - pred[b, i]) * mask[b, i]     e = square | abs
//! per_sample[b]  = sum_i err[b, i] / (sum_i mask[b, i] + EPSILON)
//! value          = mean_b per_sample[b]
//! ```
//!
//! Every sample weighs the same in the batch mean regardless of how many of
//! its coordinates are annotated. An all-missing sample yields exactly 0.

use burn::prelude::*;

use crate::training::packing::{LABEL_WIDTH, MASK_OFFSET, PACKED_WIDTH};

/// Denominator floor for samples with no annotated coordinate.
pub const EPSILON: f32 = 1e-8;

/// Contract violations detected before any arithmetic is done.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectiveError {
    /// Packed targets are not `PACKED_WIDTH` wide.
    #[error("packed targets have width {actual}, expected {PACKED_WIDTH}")]
    PackedWidth { actual: usize },

    /// Predictions are not `LABEL_WIDTH` wide.
    #[error("predictions have width {actual}, expected {LABEL_WIDTH}")]
    PredictionWidth { actual: usize },

    /// Targets, mask and predictions disagree on shape.
    #[error("shape mismatch: targets {targets:?}, mask {mask:?}, predictions {predictions:?}")]
    Shape {
        targets: [usize; 2],
        mask: [usize; 2],
        predictions: [usize; 2],
    },

    /// Batch has no samples; the mean would be undefined.
    #[error("empty batch")]
    EmptyBatch,
}

/// Element-wise error applied before masking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementError {
    Squared,
    Absolute,
}

/// Split a `[B, 60]` packed batch into `([B, 30] targets, [B, 30] mask)`.
pub fn decode_packed<B: Backend>(
    packed: Tensor<B, 2>,
) -> Result<(Tensor<B, 2>, Tensor<B, 2>), ObjectiveError> {
    let [batch, width] = packed.dims();
    if width != PACKED_WIDTH {
        return Err(ObjectiveError::PackedWidth { actual: width });
    }
    let targets = packed.clone().slice([0..batch, 0..MASK_OFFSET]);
    let mask = packed.slice([0..batch, MASK_OFFSET..PACKED_WIDTH]);
    Ok((targets, mask))
}

/// Per-sample masked error, shape `(batch,)`.
///
/// Width-agnostic: `targets`, `mask` and `pred` must share one `[B, W]` shape.
pub fn masked_per_sample<B: Backend>(
    targets: Tensor<B, 2>,
    mask: Tensor<B, 2>,
    pred: Tensor<B, 2>,
    kind: ElementError,
) -> Result<Tensor<B, 1>, ObjectiveError> {
    let (t_dims, m_dims, p_dims) = (targets.dims(), mask.dims(), pred.dims());
    if t_dims != m_dims || t_dims != p_dims {
        return Err(ObjectiveError::Shape {
            targets: t_dims,
            mask: m_dims,
            predictions: p_dims,
        });
    }
    if t_dims[0] == 0 {
        return Err(ObjectiveError::EmptyBatch);
    }

    let diff = targets - pred;
    let err = match kind {
        ElementError::Squared => diff.powf_scalar(2.0),
        ElementError::Absolute => diff.abs(),
    };
    // Masked-out terms are zeroed here, so their gradient is zero too.
    let masked = err * mask.clone();

    let numerator = masked.sum_dim(1); // (batch, 1)
    let denominator = mask.sum_dim(1).add_scalar(EPSILON); // (batch, 1)
    Ok((numerator / denominator).squeeze::<1>(1))
}

/// Masked MSE with the mask passed explicitly.
///
/// # Arguments
/// - `targets`: shape `(batch, W)`, cleaned labels (missing entries arbitrary)
/// - `mask`: shape `(batch, W)`, 1 where the label is present, else 0
/// - `pred`: shape `(batch, W)`, predicted coordinates
///
/// # Returns
/// Scalar loss tensor of shape `(1,)`.
pub fn masked_mse_loss_with_mask<B: Backend>(
    targets: Tensor<B, 2>,
    mask: Tensor<B, 2>,
    pred: Tensor<B, 2>,
) -> Result<Tensor<B, 1>, ObjectiveError> {
    Ok(masked_per_sample(targets, mask, pred, ElementError::Squared)?.mean())
}

/// Masked MAE with the mask passed explicitly. Reporting only.
pub fn masked_mae_metric_with_mask<B: Backend>(
    targets: Tensor<B, 2>,
    mask: Tensor<B, 2>,
    pred: Tensor<B, 2>,
) -> Result<Tensor<B, 1>, ObjectiveError> {
    Ok(masked_per_sample(targets, mask, pred, ElementError::Absolute)?.mean())
}

/// Masked MSE training loss over packed targets.
///
/// # Arguments
/// - `packed`: shape `(batch, 60)` (`[labels | mask]` from the packer)
/// - `pred`: shape `(batch, 30)` (predicted coordinates)
///
/// # Returns
/// Scalar loss tensor of shape `(1,)`.
pub fn masked_mse_loss<B: Backend>(
    packed: Tensor<B, 2>,
    pred: Tensor<B, 2>,
) -> Result<Tensor<B, 1>, ObjectiveError> {
    check_prediction_width(&pred)?;
    let (targets, mask) = decode_packed(packed)?;
    masked_mse_loss_with_mask(targets, mask, pred)
}

/// Masked MAE metric over packed targets. Same shapes as [`masked_mse_loss`].
pub fn masked_mae_metric<B: Backend>(
    packed: Tensor<B, 2>,
    pred: Tensor<B, 2>,
) -> Result<Tensor<B, 1>, ObjectiveError> {
    check_prediction_width(&pred)?;
    let (targets, mask) = decode_packed(packed)?;
    masked_mae_metric_with_mask(targets, mask, pred)
}

fn check_prediction_width<B: Backend>(pred: &Tensor<B, 2>) -> Result<(), ObjectiveError> {
    let [_, width] = pred.dims();
    if width != LABEL_WIDTH {
        return Err(ObjectiveError::PredictionWidth { actual: width });
    }
    Ok(())
}
