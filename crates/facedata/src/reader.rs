//! Reads FaceRecords from keypoint CSV files.

use std::io::Read;
use std::path::Path;

use rayon::prelude::*;

use crate::types::{coordinate_names, DatasetSummary, FaceRecord, IMAGE_COLUMN, IMAGE_PIXELS};

/// Raw string fields of one CSV row, before parsing.
struct RawRow {
    row: usize,
    labels: Vec<String>,
    image: String,
}

/// Records read from a CSV source plus bookkeeping about dropped rows.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// Label column names. The canonical keypoint coordinate order when the
    /// header has every coordinate column, otherwise header order without
    /// `Image`.
    pub columns: Vec<String>,
    /// Rows that parsed successfully.
    pub records: Vec<FaceRecord>,
    /// Rows dropped for an empty or malformed image, or unparseable labels.
    pub dropped: usize,
}

/// Static methods for reading the keypoints dataset from CSV.
pub struct FaceCsvReader;

impl FaceCsvReader {
    /// Read all usable records from a CSV file.
    pub fn read_all(path: &Path) -> anyhow::Result<Vec<FaceRecord>> {
        Ok(Self::read_outcome(path)?.records)
    }

    /// Read a CSV file, keeping column names and the dropped-row count.
    pub fn read_outcome(path: &Path) -> anyhow::Result<ReadOutcome> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
        let outcome = Self::from_reader(file)?;
        tracing::info!(
            rows = outcome.records.len(),
            dropped = outcome.dropped,
            label_columns = outcome.columns.len(),
            path = %path.display(),
            "Read keypoint CSV"
        );
        Ok(outcome)
    }

    /// Read records from any CSV byte source.
    ///
    /// Rows whose `Image` field is empty are dropped silently; rows whose image
    /// or labels fail to parse are dropped with a warning. Row order is kept.
    ///
    /// A header naming the keypoint coordinate columns may list them in any
    /// order; labels come out in [`coordinate_names`] order and extra columns
    /// are ignored. A header with only some of them is an error. Headers with
    /// none (such as an id column plus `Image`) keep every column as-is.
    pub fn from_reader<R: Read>(source: R) -> anyhow::Result<ReadOutcome> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(source);

        let headers = reader.headers()?.clone();
        let image_idx = headers
            .iter()
            .position(|h| h.trim() == IMAGE_COLUMN)
            .ok_or_else(|| anyhow::anyhow!("CSV has no `{IMAGE_COLUMN}` column"))?;
        let (columns, label_idx) = label_columns(&headers, image_idx)?;

        let mut raw_rows = Vec::new();
        let mut dropped = 0usize;
        for (i, result) in reader.records().enumerate() {
            let record = result?;
            let image = record.get(image_idx).unwrap_or("").trim();
            if image.is_empty() {
                dropped += 1;
                continue;
            }
            let labels = label_idx
                .iter()
                .map(|&j| record.get(j).unwrap_or("").to_string())
                .collect();
            raw_rows.push(RawRow {
                row: i + 1,
                labels,
                image: image.to_string(),
            });
        }

        // Pixel strings dominate the cost; parse rows in parallel.
        let parsed: Vec<Result<FaceRecord, String>> =
            raw_rows.into_par_iter().map(parse_row).collect();

        let mut records = Vec::with_capacity(parsed.len());
        for result in parsed {
            match result {
                Ok(record) => records.push(record),
                Err(reason) => {
                    dropped += 1;
                    tracing::warn!("{reason}");
                }
            }
        }

        Ok(ReadOutcome {
            columns,
            records,
            dropped,
        })
    }

    /// Compute summary statistics for a keypoints CSV file.
    pub fn read_summary(path: &Path) -> anyhow::Result<DatasetSummary> {
        let outcome = Self::read_outcome(path)?;
        Ok(summarize(&outcome))
    }
}

/// Build a `DatasetSummary` from an already-read outcome.
pub fn summarize(outcome: &ReadOutcome) -> DatasetSummary {
    let mut present_per_column = vec![0usize; outcome.columns.len()];
    let mut fully_labelled_rows = 0;
    let mut unlabelled_rows = 0;

    for record in &outcome.records {
        for (count, value) in present_per_column.iter_mut().zip(&record.labels) {
            if !value.is_nan() {
                *count += 1;
            }
        }
        if record.is_fully_labelled() {
            fully_labelled_rows += 1;
        }
        if record.present_count() == 0 {
            unlabelled_rows += 1;
        }
    }

    DatasetSummary {
        total_rows: outcome.records.len(),
        dropped_rows: outcome.dropped,
        columns: outcome.columns.clone(),
        present_per_column,
        fully_labelled_rows,
        unlabelled_rows,
    }
}

/// Resolve label columns to `(names, header indices)`.
fn label_columns(
    headers: &csv::StringRecord,
    image_idx: usize,
) -> anyhow::Result<(Vec<String>, Vec<usize>)> {
    let canonical = coordinate_names();
    let found: Vec<Option<usize>> = canonical
        .iter()
        .map(|name| headers.iter().position(|h| h.trim() == name))
        .collect();

    if found.iter().all(Option::is_some) {
        return Ok((canonical, found.into_iter().flatten().collect()));
    }
    if found.iter().any(Option::is_some) {
        let missing: Vec<&str> = canonical
            .iter()
            .zip(&found)
            .filter(|(_, idx)| idx.is_none())
            .map(|(name, _)| name.as_str())
            .collect();
        anyhow::bail!("CSV is missing keypoint columns: {}", missing.join(", "));
    }

    Ok(headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != image_idx)
        .map(|(i, h)| (h.trim().to_string(), i))
        .unzip())
}

fn parse_row(raw: RawRow) -> Result<FaceRecord, String> {
    let pixels = parse_pixels(&raw.image).map_err(|e| format!("row {}: {e}", raw.row))?;
    let labels = raw
        .labels
        .iter()
        .map(|v| parse_label(v))
        .collect::<Result<Vec<f32>, String>>()
        .map_err(|e| format!("row {}: {e}", raw.row))?;
    Ok(FaceRecord {
        row: raw.row,
        labels,
        pixels,
    })
}

/// Empty cells mean "not annotated" and become `NaN`.
fn parse_label(value: &str) -> Result<f32, String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(f32::NAN);
    }
    value
        .parse::<f32>()
        .map_err(|_| format!("label `{value}` is not a number"))
}

/// Parse a space-separated pixel string into exactly `IMAGE_PIXELS` bytes.
pub fn parse_pixels(image: &str) -> Result<Vec<u8>, String> {
    let mut pixels = Vec::with_capacity(IMAGE_PIXELS);
    for token in image.split_ascii_whitespace() {
        let value: f32 = token
            .parse()
            .map_err(|_| format!("pixel `{token}` is not a number"))?;
        if !(0.0..=255.0).contains(&value) {
            return Err(format!("pixel {value} outside 0..=255"));
        }
        pixels.push(value.round() as u8);
    }
    if pixels.len() != IMAGE_PIXELS {
        return Err(format!(
            "image has {} pixels, expected {IMAGE_PIXELS}",
            pixels.len()
        ));
    }
    Ok(pixels)
}
