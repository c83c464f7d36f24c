//! Facial keypoint regressor trained with a masked-label objective.
//!
//! Each label vector (30 coordinates, any subset missing) is packed together
//! with its presence mask into one 60-wide target. The masked objective decodes
//! that target at loss time so missing coordinates contribute neither error nor
//! gradient, while every batch keeps a uniform shape.

pub mod export;
pub mod inference;
pub mod model;
pub mod training;

pub use export::{export_model, load_exported, ExportManifest};
pub use inference::{Keypoint, KeypointPredictor};
pub use model::cnn::{KeypointNet, KeypointNetConfig};
pub use training::cache::{load_prepared, save_prepared};
pub use training::data::{KeypointDataset, PreparedSample};
pub use training::loss::{masked_mae_metric, masked_mse_loss, masked_mse_loss_with_mask, ObjectiveError};
pub use training::packing::{pack_labels, unpack, PackError, PackedTarget, PACKED_WIDTH};
pub use training::metrics::{KeypointMetrics, MetricsHistory};
pub use training::trainer::{evaluate, resume_from_checkpoint, train, KeypointTrainingConfig, TrainOutcome};
