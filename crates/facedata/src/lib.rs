//! CSV I/O for the facial keypoints dataset.
//!
//! Reads the `training.csv` / `test.csv` layout: one column per keypoint
//! coordinate (empty when the landmark was not annotated) plus an `Image`
//! column holding 96×96 space-separated grayscale pixels.

pub mod reader;
pub mod types;

pub use reader::{summarize, FaceCsvReader, ReadOutcome};
pub use types::{
    coordinate_names, DatasetSummary, FaceRecord, IMAGE_COLUMN, IMAGE_PIXELS, IMAGE_SIZE, KEYPOINT_NAMES,
    NUM_COORDS, NUM_KEYPOINTS,
};
