//! Parquet cache of prepared samples.
//!
//! Parsing 9216 pixels per CSV row dominates preparation time, so a prepared
//! dataset can be persisted once and reloaded on later runs. Values round-trip
//! bit-exactly; the cache holds nothing the CSV does not.

use std::path::Path;
use std::sync::Arc;

use arrow::array::*;
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use indicatif::{ProgressBar, ProgressStyle};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use super::data::{KeypointDataset, PreparedSample};
use super::packing::PackedTarget;

/// Save a prepared dataset to a Parquet file.
///
/// Schema: `row: UInt64`, `image: List<Float32>`, `target: List<Float32>`.
pub fn save_prepared(dataset: &KeypointDataset, path: &Path) -> anyhow::Result<()> {
    let schema = Arc::new(prepared_cache_schema());
    let samples = dataset.samples();

    let rows: UInt64Array = samples.iter().map(|s| Some(s.row as u64)).collect();
    let images = float_list(samples.iter().map(|s| s.image.as_slice()));
    let targets = float_list(samples.iter().map(|s| s.target.as_slice()));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(rows), Arc::new(images), Arc::new(targets)],
    )?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    tracing::info!(
        samples = samples.len(),
        image_size = dataset.image_size(),
        path = %path.display(),
        "Saved prepared dataset to Parquet"
    );
    Ok(())
}

/// Load a prepared dataset from a Parquet file written by [`save_prepared`].
///
/// Validates that all images share one square size and every target is a
/// well-formed packed vector.
pub fn load_prepared(path: &Path) -> anyhow::Result<KeypointDataset> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open cache {}: {e}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let total = builder.metadata().file_metadata().num_rows().max(0) as u64;
    let reader = builder.build()?;

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} Loading cache")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut samples = Vec::new();
    let mut pixels: Option<usize> = None;

    for batch_result in reader {
        let batch = batch_result?;

        let rows = batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| anyhow::anyhow!("Column 0 is not UInt64Array"))?;
        let images = batch
            .column(1)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| anyhow::anyhow!("Column 1 is not ListArray"))?;
        let targets = batch
            .column(2)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| anyhow::anyhow!("Column 2 is not ListArray"))?;

        for i in 0..batch.num_rows() {
            let row = rows.value(i) as usize;
            let image = list_values(images, i)?;
            let target = list_values(targets, i)?;

            match pixels {
                None => pixels = Some(image.len()),
                Some(p) if p != image.len() => anyhow::bail!(
                    "Image size mismatch in cache: expected {p} pixels, got {} for row {row}",
                    image.len()
                ),
                Some(_) => {}
            }

            let target = PackedTarget::from_slice(&target)
                .map_err(|e| anyhow::anyhow!("Bad target for row {row} in cache: {e}"))?;
            samples.push(PreparedSample { row, image, target });
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    let pixels = pixels.ok_or_else(|| anyhow::anyhow!("Cache {} is empty", path.display()))?;
    let image_size = (pixels as f64).sqrt().round() as usize;
    if image_size * image_size != pixels {
        anyhow::bail!("Cached images have {pixels} pixels, which is not a square");
    }

    let dataset = KeypointDataset::new(samples, image_size)?;
    tracing::info!(
        samples = dataset.len(),
        image_size,
        path = %path.display(),
        "Loaded prepared dataset from Parquet"
    );
    Ok(dataset)
}

fn float_list<'a>(values: impl Iterator<Item = &'a [f32]>) -> ListArray {
    let mut all_values = Vec::new();
    let mut offsets = vec![0i32];
    for v in values {
        all_values.extend_from_slice(v);
        offsets.push(all_values.len() as i32);
    }
    ListArray::new(
        Arc::new(Field::new("item", DataType::Float32, false)),
        OffsetBuffer::new(offsets.into()),
        Arc::new(Float32Array::from(all_values)),
        None,
    )
}

fn list_values(list: &ListArray, i: usize) -> anyhow::Result<Vec<f32>> {
    let values = list.value(i);
    let floats = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| anyhow::anyhow!("List values are not Float32Array"))?;
    Ok(floats.values().to_vec())
}

/// Arrow schema for prepared-dataset Parquet files.
fn prepared_cache_schema() -> Schema {
    let list = || DataType::List(Arc::new(Field::new("item", DataType::Float32, false)));
    Schema::new(vec![
        Field::new("row", DataType::UInt64, false),
        Field::new("image", list(), false),
        Field::new("target", list(), false),
    ])
}
