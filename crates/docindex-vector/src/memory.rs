//! Brute-force in-process store. Used by tests and by runs without a
//! configured LanceDB directory that still want retrieval.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use docindex_core::traits::VectorStore;
use docindex_core::types::{
    ChunkId, IndexDescription, MetadataFilter, Metric, ScoredRecord, VectorRecord,
};
use docindex_core::{Error, Result};

#[derive(Default)]
struct State {
    shape: Option<(usize, Metric)>,
    records: BTreeMap<ChunkId, VectorRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    upsert_calls: AtomicUsize,
    filtered_delete: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise native filtered delete instead of query-then-delete.
    pub fn with_filtered_delete(mut self) -> Self {
        self.filtered_delete = true;
        self
    }

    /// Number of `upsert` calls received so far.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub async fn ids(&self) -> Vec<ChunkId> {
        self.state.read().await.records.keys().cloned().collect()
    }
}

fn similarity(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match metric {
        Metric::Dot => dot,
        Metric::Cosine => {
            let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if na == 0.0 || nb == 0.0 {
                0.0
            } else {
                dot / (na * nb)
            }
        }
        Metric::L2 => -a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>(),
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_if_absent(&self, dimension: usize, metric: Metric) -> Result<IndexDescription> {
        let mut state = self.state.write().await;
        match state.shape {
            Some((dimension, metric)) => Ok(IndexDescription { dimension, metric, created: false }),
            None => {
                state.shape = Some((dimension, metric));
                Ok(IndexDescription { dimension, metric, created: true })
            }
        }
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if state.shape.is_none() {
            return Err(Error::Store("index has not been created".into()));
        }
        for r in records {
            state.records.insert(r.id.clone(), r.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        let state = self.state.read().await;
        let metric = state.shape.map_or(Metric::Cosine, |(_, m)| m);
        let mut hits: Vec<ScoredRecord> = state
            .records
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| ScoredRecord {
                id: r.id.clone(),
                score: similarity(metric, vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, ids: &[ChunkId]) -> Result<usize> {
        let mut state = self.state.write().await;
        Ok(ids.iter().filter(|id| state.records.remove(*id).is_some()).count())
    }

    async fn matching_ids(&self, filter: &MetadataFilter) -> Result<Vec<ChunkId>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| r.id.clone())
            .collect())
    }

    async fn delete_matching(&self, filter: &MetadataFilter) -> Result<Option<usize>> {
        if !self.filtered_delete {
            return Ok(None);
        }
        let mut state = self.state.write().await;
        let before = state.records.len();
        state.records.retain(|_, r| !filter.matches(&r.metadata));
        Ok(Some(before - state.records.len()))
    }

    async fn count(&self, filter: Option<&MetadataFilter>) -> Result<usize> {
        let state = self.state.read().await;
        let matches = |r: &&VectorRecord| filter.map_or(true, |f| f.matches(&r.metadata));
        Ok(state.records.values().filter(matches).count())
    }
}
