//! Predictor components: the KeypointNet CNN and the tensor bridge between
//! host-side `Vec<f32>` data and burn tensors.

pub mod bridge;
pub mod cnn;
