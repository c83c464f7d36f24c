//! Data types for facial keypoint records and dataset summaries.

use serde::Serialize;

/// Side length of the square grayscale input images.
pub const IMAGE_SIZE: usize = 96;

/// Number of pixels per image (`IMAGE_SIZE * IMAGE_SIZE`, single channel).
pub const IMAGE_PIXELS: usize = IMAGE_SIZE * IMAGE_SIZE;

/// Number of facial landmarks per image.
pub const NUM_KEYPOINTS: usize = 15;

/// Number of scalar label coordinates per image (x and y per landmark).
pub const NUM_COORDS: usize = NUM_KEYPOINTS * 2;

/// Name of the CSV column holding the pixel string.
pub const IMAGE_COLUMN: &str = "Image";

/// Landmark names in dataset column order. Each expands to `<name>_x`, `<name>_y`.
pub const KEYPOINT_NAMES: [&str; NUM_KEYPOINTS] = [
    "left_eye_center",
    "right_eye_center",
    "left_eye_inner_corner",
    "left_eye_outer_corner",
    "right_eye_inner_corner",
    "right_eye_outer_corner",
    "left_eyebrow_inner_end",
    "left_eyebrow_outer_end",
    "right_eyebrow_inner_end",
    "right_eyebrow_outer_end",
    "nose_tip",
    "mouth_left_corner",
    "mouth_right_corner",
    "mouth_center_top_lip",
    "mouth_center_bottom_lip",
];

/// The 30 coordinate column names in canonical order (`left_eye_center_x`, ...).
pub fn coordinate_names() -> Vec<String> {
    KEYPOINT_NAMES
        .iter()
        .flat_map(|name| [format!("{name}_x"), format!("{name}_y")])
        .collect()
}

/// One row of the facial keypoints CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRecord {
    /// 1-based data row index in the source file (header excluded).
    pub row: usize,
    /// Label coordinates in header order. `NaN` marks a missing annotation.
    pub labels: Vec<f32>,
    /// Row-major grayscale pixels, length `IMAGE_PIXELS`.
    pub pixels: Vec<u8>,
}

impl FaceRecord {
    /// Pixels scaled to `[0, 1]`.
    pub fn normalized_image(&self) -> Vec<f32> {
        self.pixels.iter().map(|&p| p as f32 / 255.0).collect()
    }

    /// Number of annotated (non-NaN) coordinates.
    pub fn present_count(&self) -> usize {
        self.labels.iter().filter(|v| !v.is_nan()).count()
    }

    /// Whether every label coordinate is annotated.
    pub fn is_fully_labelled(&self) -> bool {
        !self.labels.is_empty() && self.present_count() == self.labels.len()
    }
}

/// Quick statistics over a keypoints CSV file.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    /// Rows kept after dropping empty or malformed images.
    pub total_rows: usize,
    /// Rows dropped because the image was missing or malformed.
    pub dropped_rows: usize,
    /// Label column names in header order.
    pub columns: Vec<String>,
    /// Number of rows with a value, per label column.
    pub present_per_column: Vec<usize>,
    /// Rows with every label present.
    pub fully_labelled_rows: usize,
    /// Rows with no label present.
    pub unlabelled_rows: usize,
}

impl DatasetSummary {
    /// Fraction of label cells that are present, over all kept rows.
    pub fn coverage(&self) -> f64 {
        let cells = self.total_rows * self.columns.len();
        if cells == 0 {
            return 0.0;
        }
        self.present_per_column.iter().sum::<usize>() as f64 / cells as f64
    }
}
