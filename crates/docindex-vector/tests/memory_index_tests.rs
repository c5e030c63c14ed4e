use std::sync::Arc;

use docindex_core::types::{Chunk, IndexSpec, Meta, MetadataFilter, Metric};
use docindex_core::{Error, ErrorKind};
use docindex_vector::{InMemoryStore, VectorIndex};

const DIM: usize = 4;

fn spec() -> IndexSpec {
    IndexSpec { name: "test".into(), dimension: DIM, metric: Metric::Cosine }
}

fn chunks(doc: &str, n: usize) -> Vec<Chunk> {
    (0..n)
        .map(|index| Chunk {
            document_id: doc.into(),
            index,
            text: format!("{doc} passage {index}"),
            total_chunks: n,
            metadata: Meta::new(),
        })
        .collect()
}

fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i % DIM] = 1.0;
    v
}

async fn index_with(store: Arc<InMemoryStore>) -> VectorIndex {
    VectorIndex::ensure(store, spec()).await.unwrap()
}

#[tokio::test]
async fn wrong_dimension_performs_zero_writes() {
    let store = Arc::new(InMemoryStore::new());
    let index = index_with(store.clone()).await;
    let mut vectors: Vec<_> = (0..3).map(axis).collect();
    vectors[2] = vec![1.0; DIM + 1];

    let err = index.upsert("doc", &chunks("doc", 3), &vectors).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 5 }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(store.upsert_calls(), 0);
    assert_eq!(index.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn unequal_lengths_are_an_alignment_error() {
    let index = index_with(Arc::new(InMemoryStore::new())).await;
    let err = index.upsert("doc", &chunks("doc", 3), &[axis(0), axis(1)]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Alignment);
    let msg = err.to_string();
    assert!(msg.contains('3') && msg.contains('2'), "{msg}");
}

#[tokio::test]
async fn writes_in_fixed_size_batches() {
    let store = Arc::new(InMemoryStore::new());
    let index = index_with(store.clone()).await;
    let n = 250;
    let vectors: Vec<_> = (0..n).map(axis).collect();
    let summary = index.upsert("big", &chunks("big", n), &vectors).await.unwrap();
    assert_eq!(summary.stored, n);
    assert_eq!(store.upsert_calls(), 3);
    assert_eq!(index.count(None).await.unwrap(), n);
}

#[tokio::test]
async fn batches_can_be_written_one_at_a_time() {
    let store = Arc::new(InMemoryStore::new());
    let index = index_with(store.clone()).await.with_batch_size(2);
    let vectors: Vec<_> = (0..5).map(axis).collect();

    let records = index.prepare_upsert("doc", &chunks("doc", 5), &vectors).unwrap();
    assert_eq!(store.upsert_calls(), 0);
    let sizes: Vec<usize> = index.batches(&records).map(<[_]>::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);

    let last = index.batches(&records).last().unwrap();
    index.write_batch("doc", last).await.unwrap();
    assert_eq!(store.ids().await, vec!["doc_chunk_4"]);
}

#[tokio::test]
async fn reingest_overwrites_same_ids() {
    let store = Arc::new(InMemoryStore::new());
    let index = index_with(store.clone()).await;
    let vectors: Vec<_> = (0..3).map(axis).collect();
    index.upsert("doc", &chunks("doc", 3), &vectors).await.unwrap();
    let first = store.ids().await;
    index.upsert("doc", &chunks("doc", 3), &vectors).await.unwrap();
    assert_eq!(store.ids().await, first);
    assert_eq!(first, vec!["doc_chunk_0", "doc_chunk_1", "doc_chunk_2"]);
}

#[tokio::test]
async fn search_orders_by_similarity_and_respects_filter() {
    let index = index_with(Arc::new(InMemoryStore::new())).await;
    let a = vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.7, 0.7, 0.0, 0.0], vec![0.0, 0.0, 1.0, 0.0]];
    index.upsert("a", &chunks("a", 3), &a).await.unwrap();
    index.upsert("b", &chunks("b", 1), &[vec![0.9, 0.1, 0.0, 0.0]]).await.unwrap();

    let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 10, None).await.unwrap();
    assert_eq!(hits.len(), 4);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(hits[0].id, "a_chunk_0");

    let filter = MetadataFilter::document("a");
    let only_a = index.search(&[1.0, 0.0, 0.0, 0.0], 2, Some(&filter)).await.unwrap();
    assert_eq!(only_a.len(), 2);
    assert!(only_a.iter().all(|h| h.document_id == "a"));
    assert_eq!(only_a[1].text, "a passage 1");
}

#[tokio::test]
async fn query_vector_of_wrong_length_is_rejected() {
    let index = index_with(Arc::new(InMemoryStore::new())).await;
    let err = index.search(&[1.0, 0.0], 5, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn delete_document_by_id_lookup() {
    let index = index_with(Arc::new(InMemoryStore::new())).await;
    index.upsert("doc1", &chunks("doc1", 3), &[axis(0), axis(1), axis(2)]).await.unwrap();
    index.upsert("doc2", &chunks("doc2", 1), &[axis(0)]).await.unwrap();

    let summary = index.delete_document("doc1").await.unwrap();
    assert_eq!(summary.deleted, 3);
    let filter = MetadataFilter::document("doc1");
    assert!(index.search(&axis(0), 5, Some(&filter)).await.unwrap().is_empty());
    assert_eq!(index.count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn delete_document_with_native_filter() {
    let index = index_with(Arc::new(InMemoryStore::new().with_filtered_delete())).await;
    index.upsert("doc1", &chunks("doc1", 2), &[axis(0), axis(1)]).await.unwrap();
    assert_eq!(index.delete_document("doc1").await.unwrap().deleted, 2);
    assert_eq!(index.delete_document("doc1").await.unwrap().deleted, 0);
}

#[tokio::test]
async fn existing_index_with_other_dimension_is_refused() {
    let store = Arc::new(InMemoryStore::new());
    index_with(store.clone()).await;
    let wider = IndexSpec { dimension: 8, ..spec() };
    let err = VectorIndex::ensure(store, wider).await.err().expect("must refuse");
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn existing_index_with_other_metric_is_refused() {
    let store = Arc::new(InMemoryStore::new());
    index_with(store.clone()).await;
    let dot = IndexSpec { metric: Metric::Dot, ..spec() };
    assert!(VectorIndex::ensure(store, dot).await.is_err());
}
