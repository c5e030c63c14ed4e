//! Domain types shared by the chunker, embedding backends, vector stores and
//! the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;
pub type Meta = serde_json::Map<String, serde_json::Value>;
pub type Embedding = Vec<f32>;

/// Deterministic record id for one chunk of a document.
///
/// Re-ingesting a document with the same chunking parameters produces the
/// same ids, so a second upsert overwrites instead of duplicating.
pub fn chunk_id(document_id: &str, index: usize) -> ChunkId {
    format!("{document_id}_chunk_{index}")
}

/// A bounded span of one document's text, ready to be embedded.
///
/// - `document_id`: stable identity of the parent document
/// - `index`: 0-based position within the parent document
/// - `total_chunks`: number of chunks produced by the same chunking pass
/// - `metadata`: caller-supplied extras copied onto every chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub index: usize,
    pub text: String,
    pub total_chunks: usize,
    #[serde(default)]
    pub metadata: Meta,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        chunk_id(&self.document_id, self.index)
    }
}

/// Unit used to measure chunk size and overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    #[default]
    Tokens,
    Characters,
}

impl FromStr for ChunkUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tokens" | "token" => Ok(Self::Tokens),
            "characters" | "chars" | "character" => Ok(Self::Characters),
            other => Err(Error::Configuration(format!("unknown chunk unit '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap: usize,
    pub unit: ChunkUnit,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self { chunk_size: 500, overlap: 50, unit: ChunkUnit::Tokens }
    }
}

/// Metadata persisted next to every stored vector. `text` is duplicated here
/// so search results are readable without a second lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub total_chunks: usize,
    #[serde(default)]
    pub extra: Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: ChunkId,
    pub values: Embedding,
    pub metadata: RecordMetadata,
}

impl VectorRecord {
    pub fn from_chunk(document_id: &str, chunk: &Chunk, values: Embedding) -> Self {
        Self {
            id: chunk_id(document_id, chunk.index),
            values,
            metadata: RecordMetadata {
                document_id: document_id.to_string(),
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                total_chunks: chunk.total_chunks,
                extra: chunk.metadata.clone(),
            },
        }
    }
}

/// Raw match returned by a vector store. Higher `score` is always better.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: ChunkId,
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// Read-only projection returned by `VectorIndex::search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub id: ChunkId,
    pub score: f32,
    pub text: String,
    pub chunk_index: usize,
    pub document_id: String,
}

impl From<ScoredRecord> for RetrievalHit {
    fn from(r: ScoredRecord) -> Self {
        Self {
            id: r.id,
            score: r.score,
            text: r.metadata.text,
            chunk_index: r.metadata.chunk_index,
            document_id: r.metadata.document_id,
        }
    }
}

/// Restricts a search or deletion to one document's chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub document_id: Option<String>,
}

impl MetadataFilter {
    pub fn document(document_id: impl Into<String>) -> Self {
        Self { document_id: Some(document_id.into()) }
    }

    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        self.document_id.as_deref().map_or(true, |d| d == metadata.document_id)
    }

    /// SQL predicate for stores that accept one (`None` = match everything).
    pub fn to_sql(&self) -> Option<String> {
        self.document_id
            .as_ref()
            .map(|d| format!("document_id = '{}'", d.replace('\'', "''")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
    Dot,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
            Self::Dot => "dot",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "l2" | "euclidean" => Ok(Self::L2),
            "dot" | "dotproduct" => Ok(Self::Dot),
            other => Err(Error::Configuration(format!("unknown metric '{other}'"))),
        }
    }
}

/// Requested shape of a vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
}

/// What a store reports back from `create_if_absent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescription {
    pub dimension: usize,
    pub metric: Metric,
    pub created: bool,
}

/// Embedding mode tag. Some backends embed asymmetrically, optimizing stored
/// passages and search queries differently within one vector space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedMode {
    Document,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: 2048, top_p: 0.95, top_k: 40 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub stored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub deleted: usize,
}
