//! Gemini embeddings (`embedContent` / `batchEmbedContents`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docindex_core::traits::EmbeddingBackend;
use docindex_core::types::{EmbedMode, Embedding};
use docindex_core::{Error, Result};

use crate::http::send_json;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const PROVIDER: &str = "gemini";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Deserialize)]
struct Values {
    values: Embedding,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<Values>,
}

#[derive(Deserialize)]
struct BatchResponse {
    embeddings: Option<Vec<Values>>,
}

pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    model_path: String,
    base_url: String,
    dimension: usize,
    output_dimensionality: Option<usize>,
}

impl GeminiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        let model = model.into();
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model_path: format!("models/{model}"),
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            dimension,
            output_dimensionality: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Ask the API to truncate vectors to the configured dimension.
    pub fn with_output_dimensionality(mut self) -> Self {
        self.output_dimensionality = Some(self.dimension);
        self
    }

    fn task_type(mode: EmbedMode) -> &'static str {
        match mode {
            EmbedMode::Document => "RETRIEVAL_DOCUMENT",
            EmbedMode::Query => "RETRIEVAL_QUERY",
        }
    }

    fn request<'a>(&'a self, text: &'a str, mode: EmbedMode) -> EmbedRequest<'a> {
        EmbedRequest {
            model: &self.model_path,
            content: Content { parts: [Part { text }] },
            task_type: Self::task_type(mode),
            output_dimensionality: self.output_dimensionality,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{method}", self.base_url, self.model)
    }

    async fn embed_single(&self, text: &str, mode: EmbedMode) -> Result<Embedding> {
        let resp: EmbedResponse = send_json(
            PROVIDER,
            self.client
                .post(self.url("embedContent"))
                .header("x-goog-api-key", &self.api_key)
                .json(&self.request(text, mode)),
        )
        .await?;
        resp.embedding
            .map(|e| e.values)
            .ok_or_else(|| Error::provider(PROVIDER, "response has no embedding"))
    }

    async fn embed_many(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Embedding>> {
        let body = BatchRequest { requests: texts.iter().map(|t| self.request(t, mode)).collect() };
        let resp: BatchResponse = send_json(
            PROVIDER,
            self.client
                .post(self.url("batchEmbedContents"))
                .header("x-goog-api-key", &self.api_key)
                .json(&body),
        )
        .await?;
        let embeddings = resp
            .embeddings
            .ok_or_else(|| Error::provider(PROVIDER, "response has no embeddings"))?;
        debug!(requested = texts.len(), returned = embeddings.len(), "gemini batch embedded");
        Ok(embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbedder {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Embedding>> {
        match texts {
            [] => Ok(Vec::new()),
            [one] => Ok(vec![self.embed_single(one, mode).await?]),
            many => self.embed_many(many, mode).await,
        }
    }
}
