use docindex_core::traits::TextGenerator;
use docindex_core::types::GenerationParams;
use docindex_core::ErrorKind;
use docindex_generate::GeminiGenerator;
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "gemini-2.0-flash";

fn sse(events: &[serde_json::Value]) -> String {
    events.iter().map(|e| format!("data: {e}\r\n\r\n")).collect()
}

fn candidate(text: &str) -> serde_json::Value {
    json!({ "candidates": [ { "content": { "role": "model", "parts": [ { "text": text } ] } } ] })
}

#[tokio::test]
async fn generate_returns_first_candidate_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:generateContent")))
        .and(header("x-goog-api-key", "g-key"))
        .and(body_partial_json(json!({
            "generationConfig": { "maxOutputTokens": 2048, "topK": 40 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate("Rust is a language.")))
        .expect(1)
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("g-key", MODEL).with_base_url(server.uri());
    let out = g.generate("What is Rust?", &GenerationParams::default()).await.unwrap();
    assert_eq!(out, "Rust is a language.");
}

#[tokio::test]
async fn generate_stream_yields_fragments_in_order() {
    let server = MockServer::start().await;
    let body = sse(&[candidate("Hello"), candidate(", "), candidate("world")]);
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:streamGenerateContent")))
        .and(query_param("alt", "sse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("k", MODEL).with_base_url(server.uri());
    let stream = g.generate_stream("hi", &GenerationParams::default()).await.unwrap();
    let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
    assert_eq!(parts.concat(), "Hello, world");
}

#[tokio::test]
async fn error_event_terminates_stream_with_error() {
    let server = MockServer::start().await;
    let body = sse(&[
        candidate("partial"),
        json!({ "error": { "code": 500, "message": "backend exploded" } }),
    ]);
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:streamGenerateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("k", MODEL).with_base_url(server.uri());
    let stream = g.generate_stream("hi", &GenerationParams::default()).await.unwrap();
    let items: Vec<_> = stream.collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "partial");
    let err = items[1].as_ref().unwrap_err();
    assert!(err.to_string().contains("backend exploded"));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("k", MODEL).with_base_url(server.uri());
    let err = g.generate("hi", &GenerationParams::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderTransient);
    let err = g
        .generate_stream("hi", &GenerationParams::default())
        .await
        .err()
        .expect("stream open fails");
    assert_eq!(err.kind(), ErrorKind::ProviderTransient);
}

#[tokio::test]
async fn empty_candidates_are_a_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("k", MODEL).with_base_url(server.uri());
    let err = g.generate("hi", &GenerationParams::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
}

#[tokio::test]
async fn blocked_candidate_reports_finish_reason() {
    let server = MockServer::start().await;
    let blocked = json!({ "candidates": [ { "finishReason": "SAFETY" } ] });
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:generateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_json(blocked))
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("k", MODEL).with_base_url(server.uri());
    let err = g.generate("hi", &GenerationParams::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("SAFETY"), "{err}");
}

#[tokio::test]
async fn candidate_with_empty_parts_is_not_an_answer() {
    let server = MockServer::start().await;
    let empty = json!({ "candidates": [ {
        "content": { "role": "model", "parts": [] },
        "finishReason": "MAX_TOKENS"
    } ] });
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(empty))
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("k", MODEL).with_base_url(server.uri());
    let err = g.generate("hi", &GenerationParams::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("MAX_TOKENS"), "{err}");
}

#[tokio::test]
async fn stream_without_text_ends_with_finish_reason_error() {
    let server = MockServer::start().await;
    let body = sse(&[json!({ "candidates": [ { "finishReason": "SAFETY" } ] })]);
    Mock::given(method("POST"))
        .and(path(format!("/v1beta/models/{MODEL}:streamGenerateContent")))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("k", MODEL).with_base_url(server.uri());
    let stream = g.generate_stream("hi", &GenerationParams::default()).await.unwrap();
    let items: Vec<_> = stream.collect().await;
    assert_eq!(items.len(), 1);
    let err = items[0].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("SAFETY"), "{err}");
}

#[tokio::test]
async fn final_stop_event_without_text_is_skipped() {
    let server = MockServer::start().await;
    let body = sse(&[
        candidate("done"),
        json!({ "candidates": [ { "content": { "parts": [] }, "finishReason": "STOP" } ] }),
    ]);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let g = GeminiGenerator::new("k", MODEL).with_base_url(server.uri());
    let stream = g.generate_stream("hi", &GenerationParams::default()).await.unwrap();
    let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
    assert_eq!(parts, vec!["done"]);
}
