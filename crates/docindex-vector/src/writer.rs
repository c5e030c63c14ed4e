use anyhow::{anyhow, Result};
use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::SchemaRef;
use lancedb::Table;
use std::sync::Arc;

use docindex_core::types::VectorRecord;

/// Converts records to one Arrow batch laid out per `schema`.
pub fn records_to_batch(
    records: &[VectorRecord],
    schema: SchemaRef,
    dimension: i32,
) -> Result<RecordBatch> {
    let mut ids = Vec::with_capacity(records.len());
    let mut document_ids = Vec::with_capacity(records.len());
    let mut chunk_indices = Vec::with_capacity(records.len());
    let mut texts = Vec::with_capacity(records.len());
    let mut totals = Vec::with_capacity(records.len());
    let mut extras: Vec<Option<String>> = Vec::with_capacity(records.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(records.len());

    for r in records {
        let m = &r.metadata;
        ids.push(r.id.clone());
        document_ids.push(m.document_id.clone());
        chunk_indices.push(
            i32::try_from(m.chunk_index)
                .map_err(|_| anyhow!("chunk_index {} out of range", m.chunk_index))?,
        );
        texts.push(m.text.clone());
        totals.push(
            i32::try_from(m.total_chunks)
                .map_err(|_| anyhow!("total_chunks {} out of range", m.total_chunks))?,
        );
        extras.push(if m.extra.is_empty() { None } else { Some(serde_json::to_string(&m.extra)?) });
        vectors.push(Some(r.values.iter().map(|&x| Some(x)).collect()));
    }

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(document_ids)),
            Arc::new(Int32Array::from(chunk_indices)),
            Arc::new(StringArray::from(texts)),
            Arc::new(Int32Array::from(totals)),
            Arc::new(StringArray::from(extras)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                vectors, dimension,
            )),
        ],
    )?;
    Ok(batch)
}

/// Insert-or-overwrite keyed on `id`.
pub async fn merge_records(table: &Table, records: &[VectorRecord], dimension: i32) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let schema = table.schema().await?;
    let batch = records_to_batch(records, schema.clone(), dimension)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    let mut mi = table.merge_insert(&["id"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    let _ = mi.execute(reader).await?;
    Ok(())
}
