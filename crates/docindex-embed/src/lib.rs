//! Embedding backends and the fallback service that fronts them.
//!
//! Providers are picked once from [`EmbeddingSettings`]. Set
//! `embedding.provider = "fake"` (or `APP_EMBEDDING__PROVIDER=fake`) for
//! fast, deterministic vectors in tests and offline runs.

use std::sync::Arc;

use tracing::info;

use docindex_core::config::{EmbeddingProviderKind, EmbeddingSettings};
use docindex_core::traits::EmbeddingBackend;
use docindex_core::{Error, Result};

pub mod fake;
pub mod gemini;
mod http;
pub mod pinecone;
pub mod service;

pub use fake::FakeEmbedder;
pub use gemini::GeminiEmbedder;
pub use pinecone::PineconeEmbedder;
pub use service::{BatchStrategy, EmbeddingService, Pathway};

/// Builds one backend. Missing credentials yield `Error::NotConfigured`.
pub fn backend_from_settings(
    settings: &EmbeddingSettings,
    index_dimension: usize,
) -> Result<Arc<dyn EmbeddingBackend>> {
    let dimension = settings.dimension(index_dimension);
    let model = settings.model();
    let key = || {
        settings.api_key().ok_or_else(|| {
            Error::NotConfigured(format!(
                "no API key for {:?} embeddings (set embedding.api_key or {})",
                settings.provider,
                settings
                    .api_key_env
                    .as_deref()
                    .or(settings.provider.default_api_key_env())
                    .unwrap_or("an API key variable")
            ))
        })
    };

    let backend: Arc<dyn EmbeddingBackend> = match settings.provider {
        EmbeddingProviderKind::Fake => Arc::new(FakeEmbedder::new(dimension)),
        EmbeddingProviderKind::Gemini => {
            let mut g = GeminiEmbedder::new(key()?, model, dimension);
            if let Some(url) = &settings.base_url {
                g = g.with_base_url(url);
            }
            if settings.dimension.is_some() {
                g = g.with_output_dimensionality();
            }
            Arc::new(g)
        }
        EmbeddingProviderKind::Pinecone => {
            let mut p = PineconeEmbedder::new(key()?, model, dimension);
            if let Some(url) = &settings.base_url {
                p = p.with_base_url(url);
            }
            if settings.dimension.is_some() {
                p = p.with_output_dimension();
            }
            Arc::new(p)
        }
    };
    Ok(backend)
}

/// Builds the primary backend and, when configured and usable, the
/// alternate. An alternate that cannot be built is skipped with a warning.
pub fn service_from_settings(
    settings: &EmbeddingSettings,
    index_dimension: usize,
) -> Result<EmbeddingService> {
    let primary = backend_from_settings(settings, index_dimension)?;
    let mut service = EmbeddingService::new(primary, index_dimension)?;

    if let Some(alt) = settings.alternate.as_deref() {
        match backend_from_settings(alt, index_dimension) {
            Ok(backend) => service = service.with_alternate(backend),
            Err(e) => tracing::warn!(error = %e, "alternate embedding provider unavailable"),
        }
    }

    info!(
        provider = service.primary_name(),
        dimension = service.dimension(),
        plan = ?service.plan().iter().map(ToString::to_string).collect::<Vec<_>>(),
        "embedding service ready"
    );
    Ok(service)
}
