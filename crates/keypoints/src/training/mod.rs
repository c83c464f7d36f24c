//! Keypoint training pipeline: label packing, masked objective, dataset
//! preparation and caching, metrics, LR scheduling and the Adam training loop.

pub mod cache;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod packing;
pub mod schedule;
pub mod trainer;
