use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use docindex_core::chunker::Chunker;
use docindex_core::retry::RetryPolicy;
use docindex_core::traits::{EmbeddingBackend, TextGenerator, TokenStream, VectorStore};
use docindex_core::types::{
    ChunkId, ChunkParams, ChunkUnit, EmbedMode, Embedding, GenerationParams, IndexDescription,
    IndexSpec, MetadataFilter, Metric, ScoredRecord, VectorRecord,
};
use docindex_core::{Error, ErrorKind, Result};
use docindex_embed::{EmbeddingService, FakeEmbedder};
use docindex_rag::{
    Answer, AnswerMode, IngestOptions, IngestOutcome, QueryOptions, QueryResponse, RagOrchestrator,
    StreamEvent, NO_MATCH_RESPONSE,
};
use docindex_vector::{InMemoryStore, VectorIndex};

const DIM: usize = 32;

#[derive(Default)]
struct ScriptedGenerator {
    prompts: Mutex<Vec<String>>,
    fail_mid_stream: bool,
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("grounded answer".into())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<TokenStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut items: Vec<Result<String>> = vec![Ok("grounded ".into()), Ok("answer".into())];
        if self.fail_mid_stream {
            items[1] = Err(Error::provider("scripted", "connection reset"));
            items.push(Ok("never seen".into()));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

/// Returns one vector fewer than requested, whatever the request size.
struct ShortBackend;

#[async_trait]
impl EmbeddingBackend for ShortBackend {
    fn name(&self) -> &str {
        "short"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Embedding>> {
        Ok(vec![vec![0.1; DIM]; texts.len().saturating_sub(1)])
    }
}

/// Always fails with a permanent error.
struct BrokenBackend;

#[async_trait]
impl EmbeddingBackend for BrokenBackend {
    fn name(&self) -> &str {
        "broken"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, _texts: &[String], _mode: EmbedMode) -> Result<Vec<Embedding>> {
        Err(Error::provider("broken", "quota exhausted"))
    }
}

/// Never answers; lets a test cancel an ingest while it holds the lock.
struct StalledBackend;

#[async_trait]
impl EmbeddingBackend for StalledBackend {
    fn name(&self) -> &str {
        "stalled"
    }

    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, _texts: &[String], _mode: EmbedMode) -> Result<Vec<Embedding>> {
        std::future::pending().await
    }
}

/// Fails the `fail_on`-th upsert call (1-based) once with a transient error.
struct FlakyStore {
    inner: Arc<InMemoryStore>,
    attempts: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn create_if_absent(&self, dimension: usize, metric: Metric) -> Result<IndexDescription> {
        self.inner.create_if_absent(dimension, metric).await
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(Error::transient("flaky", "connection reset"));
        }
        self.inner.upsert(records).await
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        self.inner.query(vector, top_k, filter).await
    }

    async fn delete(&self, ids: &[ChunkId]) -> Result<usize> {
        self.inner.delete(ids).await
    }

    async fn matching_ids(&self, filter: &MetadataFilter) -> Result<Vec<ChunkId>> {
        self.inner.matching_ids(filter).await
    }

    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize> {
        self.inner.count(filter).await
    }
}

fn small_chunks() -> Chunker {
    Chunker::new(ChunkParams { chunk_size: 40, overlap: 5, unit: ChunkUnit::Characters })
}

async fn index(store: Arc<InMemoryStore>) -> VectorIndex {
    let spec = IndexSpec { name: "docs".into(), dimension: DIM, metric: Metric::Cosine };
    VectorIndex::ensure(store, spec).await.unwrap()
}

async fn orchestrator_with(
    backend: Arc<dyn EmbeddingBackend>,
    store: Arc<InMemoryStore>,
    generator: Arc<ScriptedGenerator>,
) -> RagOrchestrator {
    let service = EmbeddingService::new(backend, DIM).unwrap();
    RagOrchestrator::new(small_chunks())
        .with_embedder(Arc::new(service))
        .with_index(index(store).await)
        .with_generator(generator)
        .with_retry(RetryPolicy::none())
}

async fn fake_orchestrator(
    store: Arc<InMemoryStore>,
    generator: Arc<ScriptedGenerator>,
) -> RagOrchestrator {
    orchestrator_with(Arc::new(FakeEmbedder::new(DIM)), store, generator).await
}

const ARTICLE: &str = "Rust guarantees memory safety without a garbage collector. \
Ownership rules are checked at compile time. \
Borrowing lets code use values without taking ownership. \
Lifetimes describe how long references stay valid.";

#[tokio::test]
async fn ingest_then_answer_is_grounded() {
    let store = Arc::new(InMemoryStore::new());
    let generator = Arc::new(ScriptedGenerator::default());
    let rag = fake_orchestrator(store.clone(), generator.clone()).await;

    let outcome = rag.ingest_document("rust", ARTICLE, IngestOptions::default()).await.unwrap();
    let IngestOutcome::Indexed { chunks_created, vectors_stored } = outcome else {
        panic!("expected indexed, got {outcome:?}");
    };
    assert!(chunks_created >= 2);
    assert_eq!(chunks_created, vectors_stored);

    let answer = rag.answer("How is memory safety guaranteed?", QueryOptions::default()).await;
    let Answer::Generated { text, sources } = answer else {
        panic!("expected generated answer, got {answer:?}");
    };
    assert_eq!(text, "grounded answer");
    assert!(!sources.is_empty());
    assert!(sources.windows(2).all(|w| w[0].score >= w[1].score));

    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts[0].contains("[Chunk 1]"));
    assert!(prompts[0].contains("How is memory safety guaranteed?"));
}

#[tokio::test]
async fn empty_index_gives_no_match_without_generation() {
    let generator = Arc::new(ScriptedGenerator::default());
    let rag = fake_orchestrator(Arc::new(InMemoryStore::new()), generator.clone()).await;

    let answer = rag.answer("anything?", QueryOptions::default()).await;
    assert_eq!(answer, Answer::NoMatch);
    assert_eq!(answer.to_string(), NO_MATCH_RESPONSE);

    let events: Vec<_> = rag.answer_stream("anything?", QueryOptions::default()).collect().await;
    assert_eq!(events, vec![StreamEvent::NoMatch]);
    assert!(generator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_components_disable_ingest_and_queries() {
    let rag = RagOrchestrator::new(small_chunks());
    assert!(!rag.retrieval_enabled());

    let outcome = rag.ingest_document("doc", ARTICLE, IngestOptions::default()).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Disabled { .. }));

    let answer = rag.answer("q", QueryOptions::default()).await;
    assert!(matches!(answer, Answer::Unavailable { .. }));

    let events: Vec<_> = rag.answer_stream("q", QueryOptions::default()).collect().await;
    assert!(matches!(events.as_slice(), [StreamEvent::Unavailable(_)]));
    assert_eq!(rag.delete_document("doc").await.unwrap_err().kind(), ErrorKind::NotConfigured);
}

#[tokio::test]
async fn wrong_embedding_count_is_an_alignment_error() {
    let store = Arc::new(InMemoryStore::new());
    let rag = orchestrator_with(Arc::new(ShortBackend), store.clone(), Arc::default()).await;

    let err = rag.ingest_document("doc", ARTICLE, IngestOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Alignment);
    let chunk_count = small_chunks().split(ARTICLE).len();
    let msg = err.to_string();
    assert!(msg.contains(&chunk_count.to_string()), "{msg}");
    assert!(msg.contains(&(chunk_count - 1).to_string()), "{msg}");
    assert_eq!(store.upsert_calls(), 0);
}

#[tokio::test]
async fn delete_then_filtered_search_is_empty() {
    let store = Arc::new(InMemoryStore::new());
    let rag = fake_orchestrator(store, Arc::default()).await;

    rag.ingest_document("doc1", "A.\nB.\nC.", IngestOptions::default()).await.unwrap();
    assert!(rag.indexed_chunks(Some("doc1")).await.unwrap() > 0);

    let deleted = rag.delete_document("doc1").await.unwrap();
    assert!(deleted.deleted > 0);
    let hits = rag.search("A.", Some("doc1"), 5).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn reingest_keeps_the_same_record_ids() {
    let store = Arc::new(InMemoryStore::new());
    let rag = fake_orchestrator(store.clone(), Arc::default()).await;

    rag.ingest_document("doc", ARTICLE, IngestOptions::default()).await.unwrap();
    let first = store.ids().await;
    rag.ingest_document("doc", ARTICLE, IngestOptions::default()).await.unwrap();
    assert_eq!(store.ids().await, first);
}

#[tokio::test]
async fn replace_existing_drops_stale_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let rag = fake_orchestrator(store, Arc::default()).await;

    rag.ingest_document("doc", ARTICLE, IngestOptions::default()).await.unwrap();
    let before = rag.indexed_chunks(Some("doc")).await.unwrap();
    assert!(before > 1);

    let options = IngestOptions { replace_existing: true, ..IngestOptions::default() };
    rag.ingest_document("doc", "Short now.", options).await.unwrap();
    assert_eq!(rag.indexed_chunks(Some("doc")).await.unwrap(), 1);
}

#[tokio::test]
async fn empty_document_indexes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let rag = fake_orchestrator(store.clone(), Arc::default()).await;
    let outcome = rag.ingest_document("empty", "   ", IngestOptions::default()).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Indexed { chunks_created: 0, vectors_stored: 0 });
    assert_eq!(store.upsert_calls(), 0);
}

#[tokio::test]
async fn stream_yields_sources_then_tokens() {
    let rag = fake_orchestrator(Arc::new(InMemoryStore::new()), Arc::default()).await;
    rag.ingest_document("rust", ARTICLE, IngestOptions::default()).await.unwrap();

    let options = QueryOptions {
        document_id: Some("rust".into()),
        top_k: Some(2),
        ..QueryOptions::default()
    };
    let QueryResponse::Stream(stream) = rag.answer_query("ownership", options).await else {
        panic!("stream mode is the default");
    };
    let events: Vec<_> = stream.collect().await;
    let StreamEvent::Sources(sources) = &events[0] else {
        panic!("sources come first: {events:?}");
    };
    assert_eq!(sources.len(), 2);
    let text: String = events[1..].iter().map(ToString::to_string).collect();
    assert_eq!(text, "grounded answer");
}

#[tokio::test]
async fn generation_failure_ends_stream_with_error_item() {
    let generator =
        Arc::new(ScriptedGenerator { fail_mid_stream: true, ..ScriptedGenerator::default() });
    let rag = fake_orchestrator(Arc::new(InMemoryStore::new()), generator).await;
    rag.ingest_document("rust", ARTICLE, IngestOptions::default()).await.unwrap();

    let events: Vec<_> = rag.answer_stream("ownership", QueryOptions::default()).collect().await;
    assert!(matches!(events.last(), Some(StreamEvent::Error { .. })));
    assert!(events.iter().all(|e| e != &StreamEvent::Token("never seen".into())));
    let last = events.last().map(ToString::to_string).unwrap_or_default();
    assert!(last.starts_with("[ERROR] Failed to process RAG query"), "{last}");
}

#[tokio::test]
async fn embedding_failure_becomes_failed_answer() {
    let store = Arc::new(InMemoryStore::new());
    let rag = orchestrator_with(Arc::new(BrokenBackend), store, Arc::default()).await;

    let options = QueryOptions { mode: AnswerMode::Sync, ..QueryOptions::default() };
    let QueryResponse::Complete(answer) = rag.answer_query("q", options).await else {
        panic!("sync mode returns a complete answer");
    };
    let Answer::Failed { kind, message } = answer else {
        panic!("expected failure, got {answer:?}");
    };
    assert_eq!(kind, ErrorKind::Provider);
    assert!(message.contains("quota exhausted"));

    let events: Vec<_> = rag.answer_stream("q", QueryOptions::default()).collect().await;
    assert!(matches!(events.as_slice(), [StreamEvent::Error { .. }]));
}

#[tokio::test]
async fn concurrent_ingests_of_one_document_serialize() {
    let store = Arc::new(InMemoryStore::new());
    let rag = Arc::new(fake_orchestrator(store.clone(), Arc::default()).await);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let rag = Arc::clone(&rag);
            tokio::spawn(async move {
                rag.ingest_document("doc", ARTICLE, IngestOptions::default()).await
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }
    let expected = small_chunks().split(ARTICLE).len();
    assert_eq!(store.ids().await.len(), expected);
}

#[tokio::test]
async fn transient_batch_failure_retries_only_that_batch() {
    let inner = Arc::new(InMemoryStore::new());
    let flaky =
        Arc::new(FlakyStore { inner: inner.clone(), attempts: AtomicUsize::new(0), fail_on: 2 });
    let spec = IndexSpec { name: "docs".into(), dimension: DIM, metric: Metric::Cosine };
    let index = VectorIndex::ensure(flaky.clone(), spec).await.unwrap().with_batch_size(1);
    let retry = RetryPolicy { max_retries: 2, initial_backoff_ms: 1, max_backoff_ms: 1 };
    let rag = RagOrchestrator::new(small_chunks())
        .with_embedder(Arc::new(
            EmbeddingService::new(Arc::new(FakeEmbedder::new(DIM)), DIM).unwrap(),
        ))
        .with_index(index)
        .with_retry(retry);

    let outcome = rag.ingest_document("rust", ARTICLE, IngestOptions::default()).await.unwrap();
    let chunks = small_chunks().split(ARTICLE).len();
    assert!(chunks >= 3);
    assert_eq!(outcome, IngestOutcome::Indexed { chunks_created: chunks, vectors_stored: chunks });
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), chunks + 1);
    assert_eq!(inner.upsert_calls(), chunks);
}

#[tokio::test]
async fn cancelled_calls_release_document_locks() {
    let store = Arc::new(InMemoryStore::new());
    let rag = orchestrator_with(Arc::new(StalledBackend), store, Arc::default()).await;
    // The ingest holds the lock while stalled; the delete gives up waiting
    // behind it first.
    let (ingest, delete) = tokio::join!(
        tokio::time::timeout(
            Duration::from_millis(80),
            rag.ingest_document("doc", ARTICLE, IngestOptions::default())
        ),
        tokio::time::timeout(Duration::from_millis(20), rag.delete_document("doc")),
    );
    assert!(ingest.is_err() && delete.is_err());
    assert_eq!(rag.documents_in_flight(), 0);

    let deleted = tokio::time::timeout(Duration::from_secs(1), rag.delete_document("doc"))
        .await
        .expect("lock was released")
        .unwrap();
    assert_eq!(deleted.deleted, 0);
    assert_eq!(rag.documents_in_flight(), 0);
}
