//! Gemini `generateContent` and `streamGenerateContent?alt=sse`.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docindex_core::traits::{TextGenerator, TokenStream};
use docindex_core::types::GenerationParams;
use docindex_core::{Error, Result};

use crate::sse::SseBuffer;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const PROVIDER: &str = "gemini";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl GenerateResponse {
    /// Text of the first candidate, all parts joined. `None` when there is no text.
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        (!text.is_empty()).then_some(text)
    }

    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}

/// A candidate that ended without text, e.g. blocked by a safety filter.
fn no_text(finish_reason: Option<&str>) -> Error {
    let reason = finish_reason.unwrap_or("unspecified");
    Error::provider(PROVIDER, format!("candidate has no text (finish reason: {reason})"))
}

pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post(
        &self,
        method: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/v1beta/models/{}:{method}", self.base_url, self.model);
        let body = GenerateRequest {
            contents: [Content { role: "user", parts: [Part { text: prompt }] }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
                top_p: params.top_p,
                top_k: params.top_k,
            },
        };
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::transient(PROVIDER, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::from_status(PROVIDER, status.as_u16(), &text));
        }
        Ok(resp)
    }
}

fn parse_event(data: &str) -> Result<GenerateResponse> {
    let event: GenerateResponse = serde_json::from_str(data)
        .map_err(|e| Error::provider(PROVIDER, format!("malformed stream event: {e}")))?;
    match event.error {
        Some(err) => Err(Error::provider(PROVIDER, err.message)),
        None => Ok(event),
    }
}

fn ensure_text(fragments: usize, finish_reason: Option<&str>) -> Result<()> {
    match fragments {
        0 => Err(no_text(finish_reason)),
        _ => Ok(()),
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let resp = self.post("generateContent", prompt, params).await?;
        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("malformed response: {e}")))?;
        if let Some(err) = body.error {
            return Err(Error::provider(PROVIDER, err.message));
        }
        if body.candidates.is_empty() {
            return Err(Error::provider(PROVIDER, "response has no candidates"));
        }
        body.text().ok_or_else(|| no_text(body.finish_reason()))
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream> {
        let resp = self.post("streamGenerateContent?alt=sse", prompt, params).await?;
        let mut body = resp.bytes_stream();

        let stream = try_stream! {
            let mut buffer = SseBuffer::default();
            let mut fragments = 0usize;
            let mut finish_reason = None;
            while let Some(chunk) = body.next().await {
                let bytes = chunk.map_err(|e| Error::transient(PROVIDER, e.to_string()))?;
                for data in buffer.push(&bytes) {
                    let event = parse_event(&data)?;
                    finish_reason = event.finish_reason().map(str::to_string).or(finish_reason);
                    if let Some(text) = event.text() {
                        fragments += 1;
                        yield text;
                    }
                }
            }
            if let Some(data) = buffer.finish() {
                let event = parse_event(&data)?;
                finish_reason = event.finish_reason().map(str::to_string).or(finish_reason);
                if let Some(text) = event.text() {
                    fragments += 1;
                    yield text;
                }
            }
            ensure_text(fragments, finish_reason.as_deref())?;
            debug!(fragments, ?finish_reason, "gemini stream finished");
        };
        Ok(stream.boxed())
    }
}
