//! Ingest and question answering over the chunker, embedding service,
//! vector index and text generator.
//!
//! Ingest errors are returned to the caller. Query failures never escape as
//! errors: they become an [`Answer`] variant or a terminal [`StreamEvent`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use docindex_core::chunker::Chunker;
use docindex_core::retry::{retry_with_backoff, RetryPolicy};
use docindex_core::traits::TextGenerator;
use docindex_core::types::{
    ChunkParams, DeleteSummary, GenerationParams, Meta, MetadataFilter, RetrievalHit,
};
use docindex_core::{Error, ErrorKind, Result};
use docindex_embed::EmbeddingService;
use docindex_vector::VectorIndex;

use crate::prompt::build_prompt;

pub const NO_MATCH_RESPONSE: &str =
    "I couldn't find any relevant information in the documents to answer your question.";

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Overrides the orchestrator's chunking sizes for this call.
    pub chunk_params: Option<ChunkParams>,
    /// Copied onto every chunk and stored with each record.
    pub metadata: Meta,
    /// Remove the document's existing records before writing.
    pub replace_existing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Indexed { chunks_created: usize, vectors_stored: usize },
    Disabled { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerMode {
    #[default]
    Stream,
    Sync,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub document_id: Option<String>,
    /// Falls back to the orchestrator default.
    pub top_k: Option<usize>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub mode: AnswerMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Generated { text: String, sources: Vec<RetrievalHit> },
    NoMatch,
    Unavailable { reason: String },
    Failed { kind: ErrorKind, message: String },
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generated { text, .. } => f.write_str(text),
            Self::NoMatch => f.write_str(NO_MATCH_RESPONSE),
            Self::Unavailable { reason } => write!(f, "Retrieval unavailable: {reason}"),
            Self::Failed { message, .. } => {
                write!(f, "[ERROR] Failed to process RAG query: {message}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Passages the answer will be grounded in; sent before any token.
    Sources(Vec<RetrievalHit>),
    Token(String),
    NoMatch,
    Unavailable(String),
    /// Terminal. Nothing follows it.
    Error { kind: ErrorKind, message: String },
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sources(_) => Ok(()),
            Self::Token(t) => f.write_str(t),
            Self::NoMatch => f.write_str(NO_MATCH_RESPONSE),
            Self::Unavailable(reason) => write!(f, "Retrieval unavailable: {reason}"),
            Self::Error { message, .. } => {
                write!(f, "[ERROR] Failed to process RAG query: {message}")
            }
        }
    }
}

pub type AnswerStream = BoxStream<'static, StreamEvent>;

pub enum QueryResponse {
    Stream(AnswerStream),
    Complete(Answer),
}

/// Embeds a query and searches the index.
#[derive(Clone)]
struct Retriever {
    embedder: Option<Arc<EmbeddingService>>,
    index: Option<VectorIndex>,
    retry: RetryPolicy,
}

impl Retriever {
    fn parts(&self) -> Result<(&EmbeddingService, &VectorIndex)> {
        match (&self.embedder, &self.index) {
            (Some(e), Some(i)) => Ok((e.as_ref(), i)),
            (None, _) => Err(Error::NotConfigured("no embedding provider configured".into())),
            (_, None) => Err(Error::NotConfigured("no vector index configured".into())),
        }
    }

    async fn retrieve(
        &self,
        query: &str,
        document_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let (embedder, index) = self.parts()?;
        let vector =
            retry_with_backoff(&self.retry, "embed_query", || embedder.embed_query(query)).await?;
        let filter = document_id.map(MetadataFilter::document);
        retry_with_backoff(&self.retry, "search", || {
            index.search(&vector, top_k, filter.as_ref())
        })
        .await
    }
}

/// Per-document async locks. An entry lives while some call holds or waits
/// for it.
#[derive(Default)]
struct DocumentLocks {
    map: StdMutex<HashMap<String, DocumentLock>>,
}

#[derive(Default)]
struct DocumentLock {
    lock: Arc<Mutex<()>>,
    users: usize,
}

impl DocumentLocks {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, DocumentLock>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self, document_id: &str) -> DocumentGuard<'_> {
        let lock = {
            let mut entries = self.entries();
            let entry = entries.entry(document_id.to_string()).or_default();
            entry.users += 1;
            Arc::clone(&entry.lock)
        };
        let mut guard = DocumentGuard {
            locks: self,
            document_id: document_id.to_string(),
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    fn release(&self, document_id: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(document_id) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                entries.remove(document_id);
            }
        }
    }
}

/// Releases the document lock on drop, including when the owning future is
/// cancelled while holding or waiting for it.
struct DocumentGuard<'a> {
    locks: &'a DocumentLocks,
    document_id: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.locks.release(&self.document_id);
    }
}

fn failure(e: &Error) -> (ErrorKind, String) {
    error!(error = %e, "RAG query failed");
    (e.kind(), e.to_string())
}

pub struct RagOrchestrator {
    chunker: Chunker,
    retriever: Retriever,
    generator: Option<Arc<dyn TextGenerator>>,
    generation: GenerationParams,
    default_top_k: usize,
    locks: DocumentLocks,
}

impl RagOrchestrator {
    pub fn new(chunker: Chunker) -> Self {
        Self {
            chunker,
            retriever: Retriever { embedder: None, index: None, retry: RetryPolicy::default() },
            generator: None,
            generation: GenerationParams::default(),
            default_top_k: 5,
            locks: DocumentLocks::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<EmbeddingService>) -> Self {
        self.retriever.embedder = Some(embedder);
        self
    }

    pub fn with_index(mut self, index: VectorIndex) -> Self {
        self.retriever.index = Some(index);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retriever.retry = retry;
        self
    }

    pub fn with_generation_params(mut self, params: GenerationParams) -> Self {
        self.generation = params;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k.max(1);
        self
    }

    /// Whether both an embedding provider and a vector index are present.
    pub fn retrieval_enabled(&self) -> bool {
        self.retriever.parts().is_ok()
    }

    pub fn index(&self) -> Option<&VectorIndex> {
        self.retriever.index.as_ref()
    }

    /// Documents with an ingest or delete holding or awaiting their lock.
    pub fn documents_in_flight(&self) -> usize {
        self.locks.entries().len()
    }

    /// Chunk, embed, upsert. Reports `Disabled` instead of failing when
    /// retrieval is not configured.
    pub async fn ingest_document(
        &self,
        document_id: &str,
        text: &str,
        options: IngestOptions,
    ) -> Result<IngestOutcome> {
        let (embedder, index) = match self.retriever.parts() {
            Ok(parts) => parts,
            Err(e) => {
                warn!(document_id, reason = %e, "RAG disabled, document not indexed");
                return Ok(IngestOutcome::Disabled { reason: e.to_string() });
            }
        };

        let _guard = self.locks.acquire(document_id).await;
        self.ingest_locked(embedder, index, document_id, text, &options).await
    }

    async fn ingest_locked(
        &self,
        embedder: &EmbeddingService,
        index: &VectorIndex,
        document_id: &str,
        text: &str,
        options: &IngestOptions,
    ) -> Result<IngestOutcome> {
        let retry = &self.retriever.retry;
        let chunker = match options.chunk_params {
            Some(params) => self.chunker.with_params(params),
            None => self.chunker.clone(),
        };
        let chunks = chunker.chunk_document(document_id, text, &options.metadata);

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            retry_with_backoff(retry, "embed_document_batch", || {
                embedder.embed_document_batch(&texts)
            })
            .await?
        };
        if vectors.len() != chunks.len() {
            return Err(Error::Alignment {
                stage: "ingest",
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }
        let records = index.prepare_upsert(document_id, &chunks, &vectors)?;

        if options.replace_existing {
            let removed =
                retry_with_backoff(retry, "delete_document", || index.delete_document(document_id))
                    .await?;
            info!(document_id, removed = removed.deleted, "cleared previous chunks");
        }

        for batch in index.batches(&records) {
            retry_with_backoff(retry, "upsert_batch", || index.write_batch(document_id, batch))
                .await?;
        }
        info!(document_id, chunks = chunks.len(), stored = records.len(), "document indexed");
        Ok(IngestOutcome::Indexed { chunks_created: chunks.len(), vectors_stored: records.len() })
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<DeleteSummary> {
        let (_, index) = self.retriever.parts()?;
        let _guard = self.locks.acquire(document_id).await;
        let summary = retry_with_backoff(&self.retriever.retry, "delete_document", || {
            index.delete_document(document_id)
        })
        .await?;
        info!(document_id, deleted = summary.deleted, "document removed from index");
        Ok(summary)
    }

    /// Stored chunk count, optionally for one document.
    pub async fn indexed_chunks(&self, document_id: Option<&str>) -> Result<usize> {
        let (_, index) = self.retriever.parts()?;
        let filter = document_id.map(MetadataFilter::document);
        index.count(filter.as_ref()).await
    }

    /// Retrieval only, no generation.
    pub async fn search(
        &self,
        query: &str,
        document_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>> {
        self.retriever.retrieve(query, document_id, top_k).await
    }

    fn params_for(&self, options: &QueryOptions) -> GenerationParams {
        GenerationParams {
            temperature: options.temperature.unwrap_or(self.generation.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.generation.max_tokens),
            ..self.generation
        }
    }

    pub async fn answer_query(&self, query: &str, options: QueryOptions) -> QueryResponse {
        match options.mode {
            AnswerMode::Stream => QueryResponse::Stream(self.answer_stream(query, options)),
            AnswerMode::Sync => QueryResponse::Complete(self.answer(query, options).await),
        }
    }

    pub async fn answer(&self, query: &str, options: QueryOptions) -> Answer {
        let top_k = options.top_k.unwrap_or(self.default_top_k);
        let document_id = options.document_id.as_deref();
        let hits = match self.retriever.retrieve(query, document_id, top_k).await {
            Ok(hits) => hits,
            Err(e) if e.kind() == ErrorKind::NotConfigured => {
                return Answer::Unavailable { reason: e.to_string() };
            }
            Err(e) => {
                let (kind, message) = failure(&e);
                return Answer::Failed { kind, message };
            }
        };
        if hits.is_empty() {
            return Answer::NoMatch;
        }
        let Some(generator) = &self.generator else {
            return Answer::Unavailable { reason: "no text generator configured".into() };
        };

        let prompt = build_prompt(query, &hits);
        let params = self.params_for(&options);
        let generated = retry_with_backoff(&self.retriever.retry, "generate", || {
            generator.generate(&prompt, &params)
        })
        .await;
        match generated {
            Ok(text) => Answer::Generated { text, sources: hits },
            Err(e) => {
                let (kind, message) = failure(&e);
                Answer::Failed { kind, message }
            }
        }
    }

    /// Nothing runs until the stream is polled. Dropping it cancels any
    /// request in flight.
    pub fn answer_stream(&self, query: &str, options: QueryOptions) -> AnswerStream {
        let retriever = self.retriever.clone();
        let generator = self.generator.clone();
        let params = self.params_for(&options);
        let top_k = options.top_k.unwrap_or(self.default_top_k);
        let document_id = options.document_id;
        let query = query.to_string();

        let events = async_stream::stream! {
            let hits = match retriever.retrieve(&query, document_id.as_deref(), top_k).await {
                Ok(hits) => hits,
                Err(e) if e.kind() == ErrorKind::NotConfigured => {
                    yield StreamEvent::Unavailable(e.to_string());
                    return;
                }
                Err(e) => {
                    let (kind, message) = failure(&e);
                    yield StreamEvent::Error { kind, message };
                    return;
                }
            };
            if hits.is_empty() {
                yield StreamEvent::NoMatch;
                return;
            }
            let Some(generator) = generator else {
                yield StreamEvent::Unavailable("no text generator configured".into());
                return;
            };

            let prompt = build_prompt(&query, &hits);
            yield StreamEvent::Sources(hits);
            let opened = retry_with_backoff(&retriever.retry, "generate_stream", || {
                generator.generate_stream(&prompt, &params)
            })
            .await;
            let mut tokens = match opened {
                Ok(tokens) => tokens,
                Err(e) => {
                    let (kind, message) = failure(&e);
                    yield StreamEvent::Error { kind, message };
                    return;
                }
            };
            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) => yield StreamEvent::Token(token),
                    Err(e) => {
                        let (kind, message) = failure(&e);
                        yield StreamEvent::Error { kind, message };
                        return;
                    }
                }
            }
        };
        events.boxed()
    }
}
