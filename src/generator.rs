//! Answer generation with a bounded tool loop.
//!
//! [`AnswerGenerator`] drives a [`ChatModel`] through up to `max_steps`
//! calls. After each call that requests tools, the calls are executed via the
//! [`ToolRegistry`] in request order and their outputs are appended to the
//! conversation before the next call:
//!
//! ```text
//! step 1: [system, user]                         → tool_calls: getWeather(...)
//! step 2: [system, user, assistant+calls, tool]  → "It is currently 35°C ..."
//! ```
//!
//! A failing tool call never aborts generation: its error text is fed back to
//! the model as that call's output. If the last permitted step still asks for
//! tools, generation ends with the text produced so far.

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ProviderError, ToolError};
use crate::models::{ChatMessage, ModelRequest, StepEvent, ToolCall};
use crate::provider::ChatModel;
use crate::tools::ToolRegistry;

/// Lazy stream of answer fragments, consumed once.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// What the model is asked.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// Sent as a single user message.
    Text(String),
    /// Sent as-is, after the system prompt if one is set.
    Messages(Vec<ChatMessage>),
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub system: Option<String>,
    /// Attach the registry's tools to every step.
    pub use_tools: bool,
    /// Upper bound on model calls; values below 1 are treated as 1.
    pub max_steps: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            system: None,
            use_tools: false,
            max_steps: 3,
        }
    }
}

#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        Self { model, tools }
    }

    fn initial_request(&self, prompt: Prompt, options: &GenerateOptions) -> ModelRequest {
        let mut messages = Vec::new();
        if let Some(system) = &options.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        match prompt {
            Prompt::Text(text) => messages.push(ChatMessage::user(text)),
            Prompt::Messages(list) => messages.extend(list),
        }

        let tools = if options.use_tools {
            self.tools.specs()
        } else {
            Vec::new()
        };

        ModelRequest { messages, tools }
    }

    /// Run the step loop and return the concatenated text of every step.
    pub async fn generate(
        &self,
        prompt: Prompt,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        let max_steps = options.max_steps.max(1);
        let mut request = self.initial_request(prompt, options);
        let mut answer = String::new();

        for step in 1..=max_steps {
            let completion = self.model.complete(&request).await?;
            debug!(
                model = %self.model.model_name(),
                step,
                tool_calls = completion.tool_calls.len(),
                "model step finished"
            );
            answer.push_str(&completion.text);

            if completion.tool_calls.is_empty() {
                break;
            }
            if step == max_steps {
                warn!(max_steps, "step limit reached with tool calls pending");
                break;
            }
            self.run_tool_calls(&mut request, completion.text, completion.tool_calls)
                .await;
        }

        Ok(answer)
    }

    /// Like [`generate`](Self::generate), but yields text as it arrives.
    ///
    /// Nothing is sent upstream until the stream is first polled.
    pub fn stream(&self, prompt: Prompt, options: GenerateOptions) -> TextStream {
        let this = self.clone();
        let max_steps = options.max_steps.max(1);

        Box::pin(stream! {
            let mut request = this.initial_request(prompt, &options);

            for step in 1..=max_steps {
                let mut events = match this.model.complete_stream(&request).await {
                    Ok(events) => events,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let mut text = String::new();
                let mut calls = Vec::new();
                while let Some(event) = events.next().await {
                    match event {
                        Ok(StepEvent::Text(fragment)) => {
                            if fragment.is_empty() {
                                continue;
                            }
                            text.push_str(&fragment);
                            yield Ok(fragment);
                        }
                        Ok(StepEvent::ToolCall(call)) => calls.push(call),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
                debug!(
                    model = %this.model.model_name(),
                    step,
                    tool_calls = calls.len(),
                    "model step finished"
                );

                if calls.is_empty() {
                    break;
                }
                if step == max_steps {
                    warn!(max_steps, "step limit reached with tool calls pending");
                    break;
                }
                this.run_tool_calls(&mut request, text, calls).await;
            }
        })
    }

    /// Execute `calls` and append the assistant turn plus one tool message per call.
    async fn run_tool_calls(&self, request: &mut ModelRequest, text: String, calls: Vec<ToolCall>) {
        request
            .messages
            .push(ChatMessage::assistant(text, calls.clone()));

        for call in calls {
            let offered = request.tools.iter().any(|t| t.name == call.name);
            let result = if offered {
                self.tools.call(&call.name, &call.arguments).await
            } else {
                Err(ToolError::Unknown(call.name.clone()))
            };

            let output = match result {
                Ok(output) => {
                    debug!(tool = %call.name, "tool call succeeded");
                    output
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    format!("Error: {}", e)
                }
            };
            request.messages.push(ChatMessage::tool(call.id, output));
        }
    }
}
