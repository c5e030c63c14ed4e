//! Text generation backends.

use std::sync::Arc;

use docindex_core::config::{GeneratorProviderKind, GeneratorSettings};
use docindex_core::traits::TextGenerator;
use docindex_core::{Error, Result};

pub mod gemini;
mod sse;

pub use gemini::GeminiGenerator;

/// `Ok(None)` when generation is switched off in settings.
pub fn generator_from_settings(
    settings: &GeneratorSettings,
) -> Result<Option<Arc<dyn TextGenerator>>> {
    match settings.provider {
        GeneratorProviderKind::None => Ok(None),
        GeneratorProviderKind::Gemini => {
            let key = settings.api_key().ok_or_else(|| {
                Error::NotConfigured(format!(
                    "no API key for generation (set generator.api_key or {})",
                    settings.api_key_env
                ))
            })?;
            let mut g = GeminiGenerator::new(key, &settings.model);
            if let Some(url) = &settings.base_url {
                g = g.with_base_url(url);
            }
            Ok(Some(Arc::new(g)))
        }
    }
}
