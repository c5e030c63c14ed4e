use anyhow::{anyhow, Result};
use arrow_array::{Array, Float32Array, Int32Array, RecordBatch, StringArray};
use futures::TryStreamExt;
use lancedb::arrow::SendableRecordBatchStream;

use docindex_core::types::{Meta, Metric, RecordMetadata, ScoredRecord};

use crate::schema::DISTANCE_COLUMN;

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow!("column '{name}' missing or of unexpected type"))
}

/// Higher is better for every metric.
pub fn score_from_distance(metric: Metric, distance: f32) -> f32 {
    match metric {
        Metric::Cosine | Metric::Dot => 1.0 - distance,
        Metric::L2 => -distance,
    }
}

fn to_usize(v: i32) -> usize {
    usize::try_from(v).unwrap_or(0)
}

pub fn batch_to_scored(batch: &RecordBatch, metric: Metric) -> Result<Vec<ScoredRecord>> {
    let ids = column::<StringArray>(batch, "id")?;
    let document_ids = column::<StringArray>(batch, "document_id")?;
    let chunk_indices = column::<Int32Array>(batch, "chunk_index")?;
    let texts = column::<StringArray>(batch, "text")?;
    let totals = column::<Int32Array>(batch, "total_chunks")?;
    let extras = column::<StringArray>(batch, "extra")?;
    let distances = column::<Float32Array>(batch, DISTANCE_COLUMN)?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let extra: Meta =
            if extras.is_null(i) { Meta::new() } else { serde_json::from_str(extras.value(i))? };
        out.push(ScoredRecord {
            id: ids.value(i).to_string(),
            score: score_from_distance(metric, distances.value(i)),
            metadata: RecordMetadata {
                document_id: document_ids.value(i).to_string(),
                chunk_index: to_usize(chunk_indices.value(i)),
                text: texts.value(i).to_string(),
                total_chunks: to_usize(totals.value(i)),
                extra,
            },
        });
    }
    Ok(out)
}

pub async fn collect_scored(
    mut stream: SendableRecordBatchStream,
    metric: Metric,
) -> Result<Vec<ScoredRecord>> {
    let mut hits = Vec::new();
    while let Some(batch) = stream.try_next().await? {
        hits.extend(batch_to_scored(&batch, metric)?);
    }
    Ok(hits)
}

pub async fn collect_ids(mut stream: SendableRecordBatchStream) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    while let Some(batch) = stream.try_next().await? {
        let col = column::<StringArray>(&batch, "id")?;
        ids.extend((0..batch.num_rows()).map(|i| col.value(i).to_string()));
    }
    Ok(ids)
}
