//! `VectorIndex`: the dimension-checked front of a [`VectorStore`].

use std::slice::Chunks;
use std::sync::Arc;

use tracing::{debug, error, info};

use docindex_core::traits::VectorStore;
use docindex_core::types::{
    Chunk, DeleteSummary, Embedding, IndexSpec, MetadataFilter, RetrievalHit, UpsertSummary,
    VectorRecord,
};
use docindex_core::{Error, Result};

pub const DEFAULT_UPSERT_BATCH: usize = 100;

#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    spec: IndexSpec,
    batch_size: usize,
}

impl VectorIndex {
    /// Creates the index if missing, otherwise connects to it. An existing
    /// index with another dimension or metric is refused.
    pub async fn ensure(store: Arc<dyn VectorStore>, spec: IndexSpec) -> Result<Self> {
        let desc = store.create_if_absent(spec.dimension, spec.metric).await?;

        if desc.dimension != spec.dimension {
            error!(
                index = %spec.name,
                existing = desc.dimension,
                configured = spec.dimension,
                "vector index dimension mismatch"
            );
            return Err(Error::Configuration(format!(
                "index '{}' stores {}-dimensional vectors but {} was configured",
                spec.name, desc.dimension, spec.dimension
            )));
        }
        if desc.metric != spec.metric {
            error!(
                index = %spec.name,
                existing = %desc.metric,
                configured = %spec.metric,
                "vector index metric mismatch"
            );
            return Err(Error::Configuration(format!(
                "index '{}' uses metric {} but {} was configured",
                spec.name, desc.metric, spec.metric
            )));
        }

        if desc.created {
            info!(
                index = %spec.name,
                dimension = spec.dimension,
                metric = %spec.metric,
                "created vector index"
            );
        } else {
            debug!(index = %spec.name, "connected to existing vector index");
        }
        Ok(Self { store, spec, batch_size: DEFAULT_UPSERT_BATCH })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn dimension(&self) -> usize {
        self.spec.dimension
    }

    fn check_dimension(&self, v: &[f32]) -> Result<()> {
        if v.len() == self.spec.dimension {
            Ok(())
        } else {
            Err(Error::DimensionMismatch { expected: self.spec.dimension, actual: v.len() })
        }
    }

    /// Every vector is checked before the first write. Batches are written
    /// in chunk order; a failure leaves the earlier batches stored.
    pub async fn upsert(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Embedding],
    ) -> Result<UpsertSummary> {
        let records = self.prepare_upsert(document_id, chunks, vectors)?;
        for batch in self.batches(&records) {
            self.write_batch(document_id, batch).await?;
        }
        Ok(UpsertSummary { stored: records.len() })
    }

    /// Validates counts and dimensions and builds the records. Writes nothing.
    pub fn prepare_upsert(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Embedding],
    ) -> Result<Vec<VectorRecord>> {
        if chunks.len() != vectors.len() {
            return Err(Error::Alignment {
                stage: "upsert",
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }
        for v in vectors {
            self.check_dimension(v)?;
        }
        Ok(chunks
            .iter()
            .zip(vectors)
            .map(|(c, v)| VectorRecord::from_chunk(document_id, c, v.clone()))
            .collect())
    }

    /// Write batches of at most `batch_size` records, in order.
    pub fn batches<'a>(&self, records: &'a [VectorRecord]) -> Chunks<'a, VectorRecord> {
        records.chunks(self.batch_size)
    }

    /// Writes one batch. Batches are independent, so a caller may repeat a
    /// failed one without resending the others.
    pub async fn write_batch(&self, document_id: &str, batch: &[VectorRecord]) -> Result<()> {
        self.store.upsert(batch).await?;
        debug!(document_id, records = batch.len(), "upserted batch");
        Ok(())
    }

    /// Hits ordered by non-increasing similarity.
    pub async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalHit>> {
        self.check_dimension(embedding)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut hits = self.store.query(embedding, top_k, filter).await?;
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits.into_iter().map(RetrievalHit::from).collect())
    }

    /// Uses the store's filtered delete when it has one, otherwise looks up
    /// matching ids and deletes those.
    pub async fn delete_document(&self, document_id: &str) -> Result<DeleteSummary> {
        let filter = MetadataFilter::document(document_id);
        if let Some(deleted) = self.store.delete_matching(&filter).await? {
            debug!(document_id, deleted, "filtered delete");
            return Ok(DeleteSummary { deleted });
        }
        let ids = self.store.matching_ids(&filter).await?;
        if ids.is_empty() {
            return Ok(DeleteSummary { deleted: 0 });
        }
        let deleted = self.store.delete(&ids).await?;
        debug!(document_id, matched = ids.len(), deleted, "deleted by id");
        Ok(DeleteSummary { deleted })
    }

    pub async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize> {
        self.store.count(filter).await
    }
}
