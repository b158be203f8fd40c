//! HTTP client tests against a mock OpenAI-compatible provider.

use aibot::config::{Credential, EmbeddingConfig, GenerationConfig};
use aibot::embedding::{Embedder, OpenAIEmbedder};
use aibot::error::ProviderError;
use aibot::generator::{AnswerGenerator, GenerateOptions};
use aibot::models::{ChatMessage, ModelRequest, StepEvent};
use aibot::provider::{ChatModel, OpenAIChatModel};
use aibot::tools::ToolRegistry;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_model(server: &MockServer, key: Option<&str>) -> OpenAIChatModel {
    let config = GenerationConfig {
        base_url: server.uri(),
        model: "test-model".to_string(),
        ..GenerationConfig::default()
    };
    OpenAIChatModel::new(&config)
        .unwrap()
        .with_credential(Credential::Static(key.map(str::to_string)))
}

fn embedder(server: &MockServer, max_retries: u32) -> OpenAIEmbedder {
    let config = EmbeddingConfig {
        base_url: server.uri(),
        max_retries,
        ..EmbeddingConfig::default()
    };
    OpenAIEmbedder::new(&config)
        .unwrap()
        .with_credential(Credential::Static(Some("test-key".to_string())))
}

fn user_request(text: &str) -> ModelRequest {
    ModelRequest {
        messages: vec![ChatMessage::user(text)],
        tools: vec![],
    }
}

fn sse(events: &[serde_json::Value]) -> ResponseTemplate {
    let mut body: String = events
        .iter()
        .map(|e| format!("data: {}\n\n", e))
        .collect();
    body.push_str("data: [DONE]\n\n");
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

// ─── Chat completions ───────────────────────────────────────────────

#[tokio::test]
async fn test_complete_returns_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({ "model": "test-model", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hi! How can I help?" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let completion = chat_model(&server, Some("test-key"))
        .complete(&user_request("hello"))
        .await
        .unwrap();
    assert_eq!(completion.text, "Hi! How can I help?");
    assert!(completion.tool_calls.is_empty());
}

#[tokio::test]
async fn test_complete_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let err = chat_model(&server, Some("bad-key"))
        .complete(&user_request("hello"))
        .await
        .unwrap_err();
    match err {
        ProviderError::Status { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "Unauthorized");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_missing_key_never_reaches_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let model = chat_model(&server, None);
    assert!(matches!(
        model.complete(&user_request("hello")).await,
        Err(ProviderError::MissingCredential(_))
    ));
    assert!(model.complete_stream(&user_request("hello")).await.is_err());
}

#[tokio::test]
async fn test_complete_non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let err = chat_model(&server, Some("test-key"))
        .complete(&user_request("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)), "got: {}", err);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_stream_text_deltas_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(sse(&[
            json!({ "choices": [{ "delta": { "role": "assistant", "content": "" } }] }),
            json!({ "choices": [{ "delta": { "content": "Once" } }] }),
            json!({ "choices": [{ "delta": { "content": " upon" } }] }),
            json!({ "choices": [{ "delta": { "content": " a time" }, "finish_reason": "stop" }] }),
        ]))
        .mount(&server)
        .await;

    let events: Vec<StepEvent> = chat_model(&server, Some("test-key"))
        .complete_stream(&user_request("story"))
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StepEvent::Text("Once".into()),
            StepEvent::Text(" upon".into()),
            StepEvent::Text(" a time".into()),
        ]
    );
}

#[tokio::test]
async fn test_stream_assembles_tool_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse(&[
            json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 0, "id": "c1", "type": "function", "function": { "name": "getWeather", "arguments": "" } }] } }] }),
            json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 0, "function": { "arguments": "{\"city\":\"Delhi\"," } }] } }] }),
            json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 0, "function": { "arguments": "\"unit\":\"C\"}" } }] }, "finish_reason": "tool_calls" }] }),
        ]))
        .mount(&server)
        .await;

    let events: Vec<StepEvent> = chat_model(&server, Some("test-key"))
        .complete_stream(&user_request("weather?"))
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        StepEvent::ToolCall(call) => {
            assert_eq!(call.id, "c1");
            assert_eq!(call.name, "getWeather");
            assert_eq!(call.arguments, r#"{"city":"Delhi","unit":"C"}"#);
        }
        other => panic!("expected tool call, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_malformed_chunk_is_an_error_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: {not json\n\n"),
        )
        .mount(&server)
        .await;

    let items: Vec<Result<StepEvent, ProviderError>> = chat_model(&server, Some("test-key"))
        .complete_stream(&user_request("hi"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(StepEvent::Text(t)) if t == "ok"));
    assert!(matches!(&items[1], Err(ProviderError::Malformed(_))));
}

#[tokio::test]
async fn test_generator_weather_round_trip_over_http() {
    let server = MockServer::start().await;

    // Second step: the request now carries the tool output.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{ "role": "user" }, { "role": "assistant" }, { "role": "tool", "tool_call_id": "c1" }]
        })))
        .respond_with(sse(&[json!({
            "choices": [{ "delta": { "content": "It is currently 35°C and Sunny in Delhi." } }]
        })]))
        .expect(1)
        .mount(&server)
        .await;

    // First step: ask for the tool.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse(&[json!({
            "choices": [{ "delta": { "tool_calls": [{ "index": 0, "id": "c1", "function": { "name": "getWeather", "arguments": "{\"city\":\"Delhi\",\"unit\":\"C\"}" } }] } }]
        })]))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let generator = AnswerGenerator::new(
        Arc::new(chat_model(&server, Some("test-key"))),
        Arc::new(ToolRegistry::with_builtins()),
    );
    let options = GenerateOptions {
        use_tools: true,
        ..GenerateOptions::default()
    };
    let fragments: Vec<String> = generator
        .stream("what's the weather in Delhi in C".into(), options)
        .map(|f| f.unwrap())
        .collect()
        .await;

    let answer = fragments.concat();
    assert!(answer.contains("Delhi"));
    assert!(answer.contains("35"));
}

// ─── Embeddings ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_embed_parses_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(json!({ "model": "text-embedding-3-small", "input": ["hello"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{ "object": "embedding", "index": 0, "embedding": [0.25, -0.5, 1.0] }]
        })))
        .mount(&server)
        .await;

    let vector = embedder(&server, 0).embed("hello").await.unwrap();
    assert_eq!(vector, vec![0.25, -0.5, 1.0]);
}

#[tokio::test]
async fn test_embed_malformed_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;

    let err = embedder(&server, 0).embed("hello").await.unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)));
}

#[tokio::test]
async fn test_embed_non_json_body_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let err = embedder(&server, 2).embed("hello").await.unwrap_err();
    assert!(matches!(err, ProviderError::Malformed(_)), "got: {}", err);
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
}

#[tokio::test]
async fn test_embed_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
        .expect(1)
        .mount(&server)
        .await;

    let err = embedder(&server, 3).embed("hello").await.unwrap_err();
    assert!(matches!(err, ProviderError::Status { status: 400, .. }));
}

#[tokio::test]
async fn test_embed_retries_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "embedding": [1.0, 0.0] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vector = embedder(&server, 1).embed("hello").await.unwrap();
    assert_eq!(vector, vec![1.0, 0.0]);
}
