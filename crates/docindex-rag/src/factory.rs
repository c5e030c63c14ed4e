//! Builds a [`RagOrchestrator`] from [`Settings`].
//!
//! Missing credentials or a missing index location leave that component
//! out and the orchestrator degrades. A dimension disagreement between the
//! embedding provider and the index is fatal.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use docindex_core::chunker::Chunker;
use docindex_core::config::{resolve_with_base, Settings};
use docindex_core::tokenize::HfTokenCounter;
use docindex_core::types::{ChunkUnit, IndexSpec};
use docindex_core::{ErrorKind, Result};
use docindex_embed::service_from_settings;
use docindex_generate::generator_from_settings;
use docindex_vector::open_lance_index;

use crate::orchestrator::RagOrchestrator;

pub fn chunker_from_settings(settings: &Settings, base_dir: &Path) -> Result<Chunker> {
    let params = settings.chunking.params();
    match (&settings.chunking.tokenizer_path, params.unit) {
        (Some(path), ChunkUnit::Tokens) => {
            let path = resolve_with_base(base_dir, path);
            let counter = HfTokenCounter::from_file(&path)?;
            info!(tokenizer = %path.display(), "exact token counting enabled");
            Ok(Chunker::with_counter(params, Arc::new(counter)))
        }
        _ => Ok(Chunker::new(params)),
    }
}

/// `base_dir` anchors relative paths such as `index.uri`.
pub async fn orchestrator_from_settings(
    settings: &Settings,
    base_dir: &Path,
) -> Result<RagOrchestrator> {
    let mut orchestrator = RagOrchestrator::new(chunker_from_settings(settings, base_dir)?)
        .with_retry(settings.retry)
        .with_generation_params(settings.generator.params())
        .with_top_k(settings.retrieval.top_k);

    match service_from_settings(&settings.embedding, settings.index.dimension) {
        Ok(service) => orchestrator = orchestrator.with_embedder(Arc::new(service)),
        Err(e) if e.kind() == ErrorKind::NotConfigured => {
            warn!(reason = %e, "embedding provider unavailable, RAG disabled");
        }
        Err(e) => return Err(e),
    }

    match settings.index.resolved_uri(base_dir) {
        Some(uri) => {
            let spec = IndexSpec {
                name: settings.index.name.clone(),
                dimension: settings.index.dimension,
                metric: settings.index.metric,
            };
            let uri = uri.to_string_lossy().to_string();
            let index = open_lance_index(&uri, spec, settings.index.upsert_batch_size).await?;
            orchestrator = orchestrator.with_index(index);
        }
        None => warn!("index.uri not set, RAG disabled"),
    }

    match generator_from_settings(&settings.generator) {
        Ok(Some(generator)) => orchestrator = orchestrator.with_generator(generator),
        Ok(None) => info!("text generation disabled"),
        Err(e) if e.kind() == ErrorKind::NotConfigured => {
            warn!(reason = %e, "text generator unavailable");
        }
        Err(e) => return Err(e),
    }

    Ok(orchestrator)
}
