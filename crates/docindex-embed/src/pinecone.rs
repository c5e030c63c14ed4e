//! Pinecone Inference embeddings (`POST /embed`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docindex_core::traits::EmbeddingBackend;
use docindex_core::types::{EmbedMode, Embedding};
use docindex_core::{Error, Result};

use crate::http::send_json;

pub const DEFAULT_BASE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2025-04";
const PROVIDER: &str = "pinecone";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    parameters: Parameters,
    inputs: Vec<Input<'a>>,
}

#[derive(Serialize)]
struct Parameters {
    input_type: &'static str,
    truncate: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimension: Option<usize>,
}

#[derive(Serialize)]
struct Input<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Option<Vec<Item>>,
}

#[derive(Deserialize)]
struct Item {
    values: Option<Embedding>,
}

pub struct PineconeEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
    request_dimension: bool,
}

impl PineconeEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            dimension,
            request_dimension: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Ask the model for `dimension`-sized output. Only models with
    /// selectable output sizes accept this.
    pub fn with_output_dimension(mut self) -> Self {
        self.request_dimension = true;
        self
    }
}

#[async_trait]
impl EmbeddingBackend for PineconeEmbedder {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbedRequest {
            model: &self.model,
            parameters: Parameters {
                input_type: match mode {
                    EmbedMode::Document => "passage",
                    EmbedMode::Query => "query",
                },
                truncate: "END",
                dimension: self.request_dimension.then_some(self.dimension),
            },
            inputs: texts.iter().map(|t| Input { text: t }).collect(),
        };
        let resp: EmbedResponse = send_json(
            PROVIDER,
            self.client
                .post(format!("{}/embed", self.base_url))
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .json(&body),
        )
        .await?;

        resp.data
            .ok_or_else(|| Error::provider(PROVIDER, "response has no data"))?
            .into_iter()
            .map(|item| {
                item.values.ok_or_else(|| Error::provider(PROVIDER, "embedding item has no values"))
            })
            .collect()
    }
}
