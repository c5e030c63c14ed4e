use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::{
    ChunkId, EmbedMode, Embedding, GenerationParams, IndexDescription, Metric, MetadataFilter,
    ScoredRecord, VectorRecord,
};

/// Lazily produced answer fragments. Dropping the stream cancels the request.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// A remote or local model that turns text into vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Length of every vector this backend returns.
    fn dimension(&self) -> usize;

    /// Whether one call may carry more than one input.
    fn supports_batch(&self) -> bool {
        true
    }

    /// One vector per input is expected but not guaranteed; callers check.
    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Embedding>>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    async fn create_if_absent(&self, dimension: usize, metric: Metric) -> Result<IndexDescription>;

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>>;

    /// Returns how many of `ids` existed.
    async fn delete(&self, ids: &[ChunkId]) -> Result<usize>;

    async fn matching_ids(&self, filter: &MetadataFilter) -> Result<Vec<ChunkId>>;

    /// Native filtered delete. `Ok(None)` means unsupported.
    async fn delete_matching(&self, _filter: &MetadataFilter) -> Result<Option<usize>> {
        Ok(None)
    }

    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    async fn generate_stream(&self, prompt: &str, params: &GenerationParams)
        -> Result<TokenStream>;
}
