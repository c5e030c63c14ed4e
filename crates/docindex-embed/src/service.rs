//! Embedding service: one primary backend, an optional alternate of the same
//! dimension, and an ordered list of batching strategies.
//!
//! For a multi-text call the attempts run in this order:
//! primary/batch, primary/per-item, alternate/batch, alternate/per-item.
//! The first success wins. A malformed or unsupported batch response moves on
//! to per-item calls; any other failure skips to the next provider.
//! Configuration errors (rejected credentials, a vector of the wrong length)
//! stop the cascade at once.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use docindex_core::traits::EmbeddingBackend;
use docindex_core::types::{EmbedMode, Embedding};
use docindex_core::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStrategy {
    /// All texts in one request.
    Batch,
    /// One request per text.
    PerItem,
}

/// One attempt in the fallback plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pathway {
    pub backend: String,
    pub strategy: BatchStrategy,
}

impl fmt::Display for Pathway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.backend, self.strategy)
    }
}

pub struct EmbeddingService {
    backends: Vec<Arc<dyn EmbeddingBackend>>,
    strategies: Vec<BatchStrategy>,
    dimension: usize,
}

impl EmbeddingService {
    /// Fails when the backend's dimension differs from the index's.
    pub fn new(primary: Arc<dyn EmbeddingBackend>, index_dimension: usize) -> Result<Self> {
        if primary.dimension() != index_dimension {
            return Err(Error::Configuration(format!(
                "embedding provider '{}' produces {}-dimensional vectors but the index expects {}",
                primary.name(),
                primary.dimension(),
                index_dimension
            )));
        }
        Ok(Self {
            backends: vec![primary],
            strategies: vec![BatchStrategy::Batch, BatchStrategy::PerItem],
            dimension: index_dimension,
        })
    }

    /// Registers a second backend. One with a different dimension could
    /// never serve this index, so it is dropped.
    pub fn with_alternate(mut self, alternate: Arc<dyn EmbeddingBackend>) -> Self {
        if alternate.dimension() == self.dimension {
            self.backends.truncate(1);
            self.backends.push(alternate);
        } else {
            warn!(
                alternate = alternate.name(),
                alternate_dim = alternate.dimension(),
                index_dim = self.dimension,
                "alternate embedding provider ignored: dimension differs"
            );
        }
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<BatchStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn primary_name(&self) -> &str {
        self.backends.first().map_or("", |b| b.name())
    }

    /// The attempts a multi-text call would make, in order.
    pub fn plan(&self) -> Vec<Pathway> {
        self.backends
            .iter()
            .flat_map(|b| {
                self.strategies
                    .iter()
                    .filter(|s| **s != BatchStrategy::Batch || b.supports_batch())
                    .map(|s| Pathway { backend: b.name().to_string(), strategy: *s })
            })
            .collect()
    }

    pub async fn embed_document(&self, text: &str) -> Result<Embedding> {
        self.embed_single(text, EmbedMode::Document).await
    }

    pub async fn embed_query(&self, text: &str) -> Result<Embedding> {
        self.embed_single(text, EmbedMode::Query).await
    }

    /// Exactly one vector per input, in input order.
    pub async fn embed_document_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts, EmbedMode::Document).await
    }

    async fn embed_single(&self, text: &str, mode: EmbedMode) -> Result<Embedding> {
        let texts = [text.to_string()];
        let mut out = self.run(&texts, mode).await?;
        out.pop().ok_or(Error::Alignment { stage: "embedding", expected: 1, actual: 0 })
    }

    async fn run(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Embedding>> {
        let mut first_error: Option<Error> = None;

        for backend in &self.backends {
            for strategy in self.strategies_for(backend.as_ref(), texts.len()) {
                let e = match self.attempt(backend.as_ref(), strategy, texts, mode).await {
                    Ok(vectors) => return Ok(vectors),
                    Err(e) => e,
                };
                if e.kind() == ErrorKind::Configuration {
                    return Err(e);
                }
                // Malformed or unsupported response: another strategy may work.
                let same_backend = matches!(e.kind(), ErrorKind::Alignment | ErrorKind::Provider);
                warn!(
                    provider = backend.name(),
                    strategy = ?strategy,
                    error = %e,
                    next = if same_backend { "next strategy" } else { "next provider" },
                    "embedding attempt failed"
                );
                first_error.get_or_insert(e);
                if !same_backend {
                    break;
                }
            }
        }

        Err(first_error.unwrap_or_else(|| {
            Error::NotConfigured("no embedding strategy applies to this request".into())
        }))
    }

    fn strategies_for(&self, backend: &dyn EmbeddingBackend, n: usize) -> Vec<BatchStrategy> {
        // A single text is the same request under either strategy.
        if n == 1 {
            if self.strategies.is_empty() {
                return Vec::new();
            }
            return vec![BatchStrategy::PerItem];
        }
        self.strategies
            .iter()
            .copied()
            .filter(|s| *s != BatchStrategy::Batch || backend.supports_batch())
            .collect()
    }

    async fn attempt(
        &self,
        backend: &dyn EmbeddingBackend,
        strategy: BatchStrategy,
        texts: &[String],
        mode: EmbedMode,
    ) -> Result<Vec<Embedding>> {
        let vectors = match strategy {
            BatchStrategy::Batch => {
                let vectors = backend.embed(texts, mode).await?;
                if vectors.len() != texts.len() {
                    return Err(Error::Alignment {
                        stage: "embedding batch",
                        expected: texts.len(),
                        actual: vectors.len(),
                    });
                }
                vectors
            }
            BatchStrategy::PerItem => {
                let mut vectors = Vec::with_capacity(texts.len());
                for text in texts {
                    let mut one = backend.embed(std::slice::from_ref(text), mode).await?;
                    if one.len() != 1 {
                        return Err(Error::Alignment {
                            stage: "embedding",
                            expected: 1,
                            actual: one.len(),
                        });
                    }
                    vectors.append(&mut one);
                }
                vectors
            }
        };

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::DimensionMismatch { expected: self.dimension, actual: bad.len() });
        }
        debug!(provider = backend.name(), strategy = ?strategy, count = vectors.len(), "embedded");
        Ok(vectors)
    }
}
