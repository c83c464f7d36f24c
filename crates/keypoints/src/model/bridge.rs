//! Tensor bridge: host-side image and target buffers to burn tensors, and
//! model outputs back to rows.
//!
//! Images are stored NHWC (`[N, H, W, 1]`, values in `[0, 1]`), matching the
//! exported model's input contract; the CNN permutes to NCHW internally.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::training::packing::{PackedTarget, PACKED_WIDTH};

/// Convert a batch of flattened `image_size × image_size` images to a
/// `(batch, image_size, image_size, 1)` tensor.
///
/// # Panics
/// Panics if `images` is empty or any image has the wrong pixel count.
pub fn images_to_tensor<B: Backend>(
    images: &[&[f32]],
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    assert!(!images.is_empty(), "images must not be empty");
    let pixels = image_size * image_size;
    for (i, image) in images.iter().enumerate() {
        assert_eq!(
            image.len(),
            pixels,
            "image {i} has {} pixels, expected {pixels}",
            image.len()
        );
    }

    let batch = images.len();
    let flat: Vec<f32> = images.iter().flat_map(|v| v.iter().copied()).collect();
    Tensor::from_data(
        TensorData::new(flat, [batch, image_size, image_size, 1]),
        device,
    )
}

/// Convert packed targets to a `(batch, 60)` tensor.
///
/// # Panics
/// Panics if `targets` is empty.
pub fn packed_to_tensor<B: Backend>(targets: &[PackedTarget], device: &B::Device) -> Tensor<B, 2> {
    assert!(!targets.is_empty(), "targets must not be empty");
    let flat: Vec<f32> = targets
        .iter()
        .flat_map(|t| t.as_slice().iter().copied())
        .collect();
    Tensor::from_data(TensorData::new(flat, [targets.len(), PACKED_WIDTH]), device)
}

/// Extract the rows of a 2D tensor as `Vec<f32>`s.
pub fn tensor_to_rows<B: Backend>(tensor: Tensor<B, 2>) -> Vec<Vec<f32>> {
    let [_, width] = tensor.dims();
    let values: Vec<f32> = tensor.into_data().iter::<f32>().collect();
    if width == 0 {
        return Vec::new();
    }
    values.chunks(width).map(|row| row.to_vec()).collect()
}
