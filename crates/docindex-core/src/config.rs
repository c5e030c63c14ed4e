//! Typed settings loaded with Figment.
//!
//! Sources, lowest precedence first: built-in defaults, `config.toml`,
//! `config.<env>.toml` (env from `RUST_ENV`, default `dev`), then `APP_*`
//! environment variables with `__` as the nesting separator
//! (`APP_EMBEDDING__PROVIDER=pinecone`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::types::{ChunkParams, ChunkUnit, GenerationParams, Metric};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Gemini,
    Pinecone,
    Fake,
}

impl EmbeddingProviderKind {
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "text-embedding-004",
            Self::Pinecone => "llama-text-embed-v2",
            Self::Fake => "fake-hash",
        }
    }

    /// `None` for the fake provider, which adopts the index dimension.
    pub fn default_dimension(self) -> Option<usize> {
        match self {
            Self::Gemini => Some(768),
            Self::Pinecone => Some(1024),
            Self::Fake => None,
        }
    }

    pub fn default_api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Pinecone => Some("PINECONE_API_KEY"),
            Self::Fake => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub model: Option<String>,
    pub dimension: Option<usize>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    /// Second backend tried when the primary fails.
    pub alternate: Option<Box<EmbeddingSettings>>,
}

impl EmbeddingSettings {
    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| self.provider.default_model().to_string())
    }

    /// Falls back to `index_dimension` when neither the settings nor the
    /// provider name a dimension.
    pub fn dimension(&self, index_dimension: usize) -> usize {
        self.dimension.or(self.provider.default_dimension()).unwrap_or(index_dimension)
    }

    /// Inline key first, then the configured (or provider default) env var.
    pub fn api_key(&self) -> Option<String> {
        resolve_api_key(
            self.api_key.as_deref(),
            self.api_key_env.as_deref().or(self.provider.default_api_key_env()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// LanceDB directory. Unset means retrieval is disabled.
    pub uri: Option<String>,
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub upsert_batch_size: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            uri: None,
            name: "documents".to_string(),
            dimension: 768,
            metric: Metric::Cosine,
            upsert_batch_size: 100,
        }
    }
}

impl IndexSettings {
    pub fn resolved_uri(&self, base: &Path) -> Option<PathBuf> {
        self.uri.as_deref().map(|u| resolve_with_base(base, u))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorProviderKind {
    #[default]
    Gemini,
    /// No generator; queries report that answering is unavailable.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSettings {
    pub provider: GeneratorProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            provider: GeneratorProviderKind::Gemini,
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            top_k: params.top_k,
        }
    }
}

impl GeneratorSettings {
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            top_k: self.top_k,
        }
    }

    pub fn api_key(&self) -> Option<String> {
        resolve_api_key(self.api_key.as_deref(), Some(&self.api_key_env))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub overlap: usize,
    pub unit: ChunkUnit,
    /// `tokenizer.json` for exact token counts.
    pub tokenizer_path: Option<String>,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        let p = ChunkParams::default();
        Self { chunk_size: p.chunk_size, overlap: p.overlap, unit: p.unit, tokenizer_path: None }
    }
}

impl ChunkingSettings {
    pub fn params(&self) -> ChunkParams {
        ChunkParams { chunk_size: self.chunk_size, overlap: self.overlap, unit: self.unit }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub index: IndexSettings,
    pub generator: GeneratorSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub retry: RetryPolicy,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Loads from `config.toml` in the working directory.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment(Path::new("config.toml")))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// The layered provider chain rooted at `base_file`. The env-specific
    /// file is looked up next to it.
    pub fn figment(base_file: &Path) -> Figment {
        let env_name = match env::var("RUST_ENV").as_deref() {
            Ok("prod" | "production") => "prod",
            Ok("test" | "testing") => "test",
            Ok(other) if !other.is_empty() => other,
            _ => "dev",
        }
        .to_string();
        let env_file = base_file.with_file_name(format!("config.{env_name}.toml"));

        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(base_file))
            .merge(Toml::file(env_file))
            .merge(Env::prefixed("APP_").split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Settings =
            figment.extract().map_err(|e| Error::Configuration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(Error::Configuration("chunking.chunk_size must be positive".into()));
        }
        if c.overlap >= c.chunk_size {
            return Err(Error::Configuration(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                c.overlap, c.chunk_size
            )));
        }
        if self.index.dimension == 0 {
            return Err(Error::Configuration("index.dimension must be positive".into()));
        }
        if self.index.upsert_batch_size == 0 {
            return Err(Error::Configuration("index.upsert_batch_size must be positive".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::Configuration("retrieval.top_k must be positive".into()));
        }
        Ok(())
    }
}

fn resolve_api_key(inline: Option<&str>, env_var: Option<&str>) -> Option<String> {
    inline
        .map(str::to_string)
        .or_else(|| env_var.and_then(|name| env::var(name).ok()))
        .filter(|k| !k.trim().is_empty())
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against `base` after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}
