//! Chat model client.
//!
//! [`ChatModel`] is one model call: send the conversation (and any tool
//! declarations), get back text and tool calls, either all at once or as a
//! stream of [`StepEvent`]s. The multi-step tool loop lives in
//! [`crate::generator`]; this module only speaks the wire protocol.
//!
//! [`OpenAIChatModel`] talks to any OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint (Mistral, OpenAI, and most
//! local servers). Streaming uses server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"It is"}}]}
//! data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"getWeather","arguments":"{\"ci"}}]}}]}
//! data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ty\":\"Delhi\"}"}}]}}]}
//! data: [DONE]
//! ```
//!
//! Text deltas are forwarded as soon as they are parsed. Tool-call deltas
//! are accumulated by index and emitted once the stream ends.

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{Credential, GenerationConfig};
use crate::error::ProviderError;
use crate::models::{ChatMessage, Completion, ModelRequest, Role, StepEvent, ToolCall};

/// Ordered events of one streamed model call.
pub type EventStream = BoxStream<'static, Result<StepEvent, ProviderError>>;

/// A single call to a chat model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model identifier (e.g. `"mistral-large-latest"`).
    fn model_name(&self) -> &str;

    /// Run one call and wait for the whole answer.
    async fn complete(&self, request: &ModelRequest) -> Result<Completion, ProviderError>;

    /// Run one call and stream its output.
    ///
    /// Errors establishing the call (missing key, non-2xx status) are
    /// returned directly; errors after that arrive as stream items.
    async fn complete_stream(&self, request: &ModelRequest) -> Result<EventStream, ProviderError>;
}

/// Chat model behind an OpenAI-compatible chat completions API.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    credential: Credential,
    temperature: Option<f32>,
}

impl OpenAIChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            credential: config.credential(),
            temperature: config.temperature,
        })
    }

    /// Replace where the API key is read from.
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    fn request_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(message_to_json).collect::<Vec<_>>(),
            "stream": stream,
        });

        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.credential.resolve().ok_or_else(|| {
            ProviderError::MissingCredential(self.credential.source_name().to_string())
        })?;

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ModelRequest) -> Result<Completion, ProviderError> {
        let body = self.request_body(request, false);
        let response = self.send(&body).await?;
        let body = response.text().await?;
        let json: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("response is not JSON: {}", e)))?;
        parse_completion(&json)
    }

    async fn complete_stream(&self, request: &ModelRequest) -> Result<EventStream, ProviderError> {
        let body = self.request_body(request, true);
        let response = self.send(&body).await?;
        let mut events = response.bytes_stream().eventsource();

        let stream = stream! {
            let mut calls = ToolCallAccumulator::default();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(ProviderError::Stream(e.to_string()));
                        return;
                    }
                };

                let data = event.data.trim();
                if data == "[DONE]" {
                    break;
                }
                if data.is_empty() {
                    continue;
                }

                let chunk: Value = match serde_json::from_str(data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::Malformed(format!("invalid stream chunk: {}", e)));
                        return;
                    }
                };

                if let Some(message) = chunk.get("error") {
                    yield Err(ProviderError::Stream(message.to_string()));
                    return;
                }

                match calls.apply_chunk(&chunk) {
                    Ok(Some(text)) => yield Ok(StepEvent::Text(text)),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            for call in calls.finish() {
                debug!(tool = %call.name, "model requested tool");
                yield Ok(StepEvent::ToolCall(call));
            }
        };

        Ok(Box::pin(stream))
    }
}

fn message_to_json(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut value = json!({ "role": role, "content": message.content });

    if !message.tool_calls.is_empty() {
        value["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": { "name": c.name, "arguments": c.arguments },
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        value["tool_call_id"] = json!(id);
    }
    value
}

/// Read content may be a string, null, or a list of `{type: "text", text}` parts.
fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect(),
        _ => String::new(),
    }
}

/// Parse a non-streamed chat completion.
fn parse_completion(json: &Value) -> Result<Completion, ProviderError> {
    let message = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::Malformed("missing choices[0].message".to_string()))?;

    let text = content_text(message.get("content"));

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for (i, call) in calls.iter().enumerate() {
            let function = call
                .get("function")
                .ok_or_else(|| ProviderError::Malformed("tool call without function".to_string()))?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ProviderError::Malformed("tool call without name".to_string()))?;
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", i)),
                name: name.to_string(),
                arguments: arguments_text(function.get("arguments")),
            });
        }
    }

    Ok(Completion { text, tool_calls })
}

/// Arguments normally arrive as a JSON string; some providers send an object.
fn arguments_text(arguments: Option<&Value>) -> String {
    match arguments {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    index: Option<u64>,
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles tool calls from streamed deltas.
///
/// Deltas are keyed by `index` when present, otherwise by `id`; a delta
/// with neither continues the most recent call. A delta whose `id` differs
/// from the open call at its `index` starts a new call; whole calls may all
/// arrive at index 0.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: Vec<PartialCall>,
}

impl ToolCallAccumulator {
    /// Fold one stream chunk in, returning its text delta if any.
    fn apply_chunk(&mut self, chunk: &Value) -> Result<Option<String>, ProviderError> {
        let Some(choice) = chunk
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
        else {
            // Usage-only and keep-alive chunks carry no choices.
            return Ok(None);
        };

        let Some(delta) = choice.get("delta") else {
            return Ok(None);
        };

        if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
            for part in tool_calls {
                self.apply_tool_delta(part)?;
            }
        }

        let text = content_text(delta.get("content"));
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    fn apply_tool_delta(&mut self, part: &Value) -> Result<(), ProviderError> {
        if !part.is_object() {
            return Err(ProviderError::Malformed(
                "tool call delta is not an object".to_string(),
            ));
        }

        let index = part.get("index").and_then(|i| i.as_u64());
        let id = part.get("id").and_then(|i| i.as_str()).filter(|i| !i.is_empty());

        let slot = self.slot(index, id);
        if let Some(id) = id {
            slot.id = id.to_string();
        }
        if let Some(function) = part.get("function") {
            if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                slot.name.push_str(name);
            }
            slot.arguments.push_str(&arguments_text(function.get("arguments")));
        }
        Ok(())
    }

    fn slot(&mut self, index: Option<u64>, id: Option<&str>) -> &mut PartialCall {
        let position = match (index, id) {
            (Some(i), _) => self.calls.iter().rposition(|c| {
                c.index == Some(i) && id.map_or(true, |id| c.id.is_empty() || c.id == id)
            }),
            (None, Some(id)) => self.calls.iter().position(|c| c.id == id),
            (None, None) => self.calls.len().checked_sub(1),
        };

        let position = position.unwrap_or_else(|| {
            self.calls.push(PartialCall {
                index,
                ..PartialCall::default()
            });
            self.calls.len() - 1
        });
        &mut self.calls[position]
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .enumerate()
            .filter_map(|(i, call)| {
                if call.name.is_empty() {
                    warn!(id = %call.id, "dropping streamed tool call without a name");
                    return None;
                }
                Some(ToolCall {
                    id: if call.id.is_empty() {
                        format!("call_{}", i)
                    } else {
                        call.id
                    },
                    name: call.name,
                    arguments: call.arguments,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolSpec;

    fn model() -> OpenAIChatModel {
        OpenAIChatModel::new(&GenerationConfig::default()).unwrap()
    }

    #[test]
    fn test_request_body_without_tools() {
        let request = ModelRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            tools: vec![],
        };
        let body = model().request_body(&request, true);
        assert_eq!(body["model"], "mistral-large-latest");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("tools").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_request_body_with_tools_and_history() {
        let call = ToolCall {
            id: "c1".into(),
            name: "getWeather".into(),
            arguments: r#"{"city":"Delhi","unit":"C"}"#.into(),
        };
        let request = ModelRequest {
            messages: vec![
                ChatMessage::user("weather?"),
                ChatMessage::assistant("", vec![call]),
                ChatMessage::tool("c1", "It is currently 35°C and Sunny in Delhi."),
            ],
            tools: vec![ToolSpec {
                name: "getWeather".into(),
                description: "Get the weather for a location".into(),
                parameters: json!({ "type": "object" }),
            }],
        };
        let body = model().request_body(&request, false);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "getWeather");
        assert_eq!(body["messages"][1]["tool_calls"][0]["id"], "c1");
        assert_eq!(
            body["messages"][1]["tool_calls"][0]["function"]["arguments"],
            r#"{"city":"Delhi","unit":"C"}"#
        );
        assert_eq!(body["messages"][2]["role"], "tool");
        assert_eq!(body["messages"][2]["tool_call_id"], "c1");
    }

    #[test]
    fn test_parse_completion_text() {
        let json = json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Hello!" }, "finish_reason": "stop" }]
        });
        let completion = parse_completion(&json).unwrap();
        assert_eq!(completion.text, "Hello!");
        assert!(completion.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_completion_tool_calls() {
        let json = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "abc123xyz",
                        "type": "function",
                        "function": { "name": "getWeather", "arguments": "{\"city\":\"Delhi\",\"unit\":\"C\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let completion = parse_completion(&json).unwrap();
        assert_eq!(completion.text, "");
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].id, "abc123xyz");
        assert_eq!(completion.tool_calls[0].name, "getWeather");
    }

    #[test]
    fn test_parse_completion_object_arguments() {
        let json = json!({
            "choices": [{ "message": { "tool_calls": [{
                "function": { "name": "getWeather", "arguments": { "city": "Pune", "unit": "F" } }
            }] } }]
        });
        let completion = parse_completion(&json).unwrap();
        assert_eq!(completion.tool_calls[0].id, "call_0");
        let args: Value = serde_json::from_str(&completion.tool_calls[0].arguments).unwrap();
        assert_eq!(args["city"], "Pune");
    }

    #[test]
    fn test_parse_completion_malformed() {
        assert!(matches!(
            parse_completion(&json!({ "choices": [] })),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_accumulator_text_deltas() {
        let mut acc = ToolCallAccumulator::default();
        let a = acc
            .apply_chunk(&json!({ "choices": [{ "delta": { "role": "assistant", "content": "" } }] }))
            .unwrap();
        let b = acc
            .apply_chunk(&json!({ "choices": [{ "delta": { "content": "Hel" } }] }))
            .unwrap();
        let c = acc.apply_chunk(&json!({ "usage": { "total_tokens": 3 } })).unwrap();
        assert_eq!(a, None);
        assert_eq!(b.as_deref(), Some("Hel"));
        assert_eq!(c, None);
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn test_accumulator_indexed_tool_deltas() {
        let mut acc = ToolCallAccumulator::default();
        for chunk in [
            json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 0, "id": "c1", "function": { "name": "getWeather", "arguments": "{\"city\":" } }] } }] }),
            json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 1, "id": "c2", "function": { "name": "getWeather", "arguments": "{\"city\":\"Mumbai\"," } }] } }] }),
            json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 0, "function": { "arguments": "\"Delhi\",\"unit\":\"C\"}" } }] } }] }),
            json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 1, "function": { "arguments": "\"unit\":\"F\"}" } }] } }] }),
        ] {
            acc.apply_chunk(&chunk).unwrap();
        }
        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].arguments, r#"{"city":"Delhi","unit":"C"}"#);
        assert_eq!(calls[1].id, "c2");
        assert_eq!(calls[1].arguments, r#"{"city":"Mumbai","unit":"F"}"#);
    }

    #[test]
    fn test_accumulator_whole_call_without_index() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply_chunk(&json!({ "choices": [{ "delta": { "content": "", "tool_calls": [
            { "id": "D681PevKs", "function": { "name": "getWeather", "arguments": "{\"city\": \"Delhi\", \"unit\": \"C\"}" } }
        ] } }] }))
        .unwrap();
        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "D681PevKs");
        assert_eq!(calls[0].name, "getWeather");
    }

    #[test]
    fn test_accumulator_whole_calls_sharing_index() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply_chunk(&json!({ "choices": [{ "delta": { "tool_calls": [
            { "index": 0, "id": "a1", "function": { "name": "getWeather", "arguments": "{\"city\":\"Delhi\",\"unit\":\"C\"}" } },
            { "index": 0, "id": "b2", "function": { "name": "getWeather", "arguments": "{\"city\":\"Mumbai\",\"unit\":\"C\"}" } }
        ] } }] }))
        .unwrap();
        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "a1");
        assert_eq!(calls[0].name, "getWeather");
        assert_eq!(calls[0].arguments, r#"{"city":"Delhi","unit":"C"}"#);
        assert_eq!(calls[1].id, "b2");
        assert_eq!(calls[1].name, "getWeather");
        assert_eq!(calls[1].arguments, r#"{"city":"Mumbai","unit":"C"}"#);
    }

    #[test]
    fn test_accumulator_drops_nameless_call() {
        let mut acc = ToolCallAccumulator::default();
        acc.apply_chunk(&json!({ "choices": [{ "delta": { "tool_calls": [{ "index": 0, "function": { "arguments": "{}" } }] } }] }))
            .unwrap();
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn test_accumulator_rejects_non_object_delta() {
        let mut acc = ToolCallAccumulator::default();
        let err = acc
            .apply_chunk(&json!({ "choices": [{ "delta": { "tool_calls": ["oops"] } }] }))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let config = GenerationConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..GenerationConfig::default()
        };
        let model = OpenAIChatModel::new(&config)
            .unwrap()
            .with_credential(Credential::Static(None));
        let request = ModelRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
        };
        assert!(matches!(
            model.complete(&request).await,
            Err(ProviderError::MissingCredential(_))
        ));
        assert!(matches!(
            model.complete_stream(&request).await,
            Err(ProviderError::MissingCredential(_))
        ));
    }
}
