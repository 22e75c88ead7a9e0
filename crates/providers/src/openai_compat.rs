//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, Fireworks AI,
//! and any endpoint exposing `/v1/chat/completions` with SSE streaming.
//!
//! Supports:
//! - Streaming chat completions with usage reporting
//! - Tool use / function calling (deltas accumulated by index)
//! - `reasoning_content` / `reasoning` deltas surfaced as reasoning events
//! - Model listing

use async_trait::async_trait;
use rivet_core::error::ProviderError;
use rivet_core::message::{CacheUsage, TokenUsage};
use rivet_core::provider::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::transport::{self, SseTranslator};

/// An OpenAI-compatible LLM provider.
///
/// This handles the vast majority of LLM providers since most expose
/// an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: transport::http_client()?,
        })
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert chat messages to OpenAI API format.
    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                };

                let has_files = m.content.iter().any(|p| matches!(p, ChatPart::File { .. }));
                let content = if has_files {
                    Some(Value::Array(m.content.iter().map(content_part).collect()))
                } else if m.content.is_empty() {
                    None
                } else {
                    Some(Value::String(m.text()))
                };

                let tool_calls = if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.input.to_string(),
                                },
                            })
                            .collect(),
                    )
                };

                ApiMessage {
                    role,
                    // Assistant turns that only call tools still need a content key
                    content: content.or_else(|| {
                        (m.role == ChatRole::Assistant).then(|| Value::String(String::new()))
                    }),
                    tool_calls,
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI function format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(t) = request.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(p) = request.top_p {
            body["top_p"] = serde_json::json!(p);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

fn content_part(part: &ChatPart) -> Value {
    match part {
        ChatPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ChatPart::File { mime, url, .. } if mime.starts_with("image/") => {
            serde_json::json!({"type": "image_url", "image_url": {"url": url}})
        }
        ChatPart::File { mime, url, filename } => serde_json::json!({
            "type": "text",
            "text": format!("[attached file: {} ({mime})]", filename.as_deref().unwrap_or(url)),
        }),
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<EventReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = send => response.map_err(transport::network_error)?,
        };
        let response = transport::check_status(&self.name, response).await?;

        Ok(transport::spawn_sse_pump(
            self.name.clone(),
            response,
            OpenAiStream::default(),
            cancel,
        ))
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(transport::network_error)?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}

// --- Streaming state machine ---

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

impl ToolCallAccumulator {
    fn into_event(self) -> StreamEvent {
        let input = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.arguments).unwrap_or(Value::String(self.arguments))
        };
        StreamEvent::ToolCall {
            id: self.id,
            name: self.name,
            input,
        }
    }
}

/// Translates chat-completions chunks into [`StreamEvent`]s.
#[derive(Default)]
pub(crate) struct OpenAiStream {
    text_open: bool,
    reasoning_open: bool,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
    done: bool,
}

pub(crate) fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        Some("error") => FinishReason::Error,
        Some(other) => FinishReason::Other(other.to_string()),
        None => FinishReason::Unknown,
    }
}

impl OpenAiStream {
    fn handle(&mut self, chunk: StreamResponse) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(error) = chunk.error {
            self.done = true;
            events.push(StreamEvent::Error(ProviderError::ApiError {
                status_code: error.code.as_ref().and_then(Value::as_u64).unwrap_or(500) as u16,
                message: error.message,
            }));
            return events;
        }

        for choice in chunk.choices {
            let delta = choice.delta;

            if let Some(reasoning) = delta
                .reasoning_content
                .or(delta.reasoning)
                .filter(|r| !r.is_empty())
            {
                if !self.reasoning_open {
                    self.reasoning_open = true;
                    events.push(StreamEvent::ReasoningStart);
                }
                events.push(StreamEvent::ReasoningDelta { text: reasoning });
            }

            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                if self.reasoning_open {
                    self.reasoning_open = false;
                    events.push(StreamEvent::ReasoningEnd);
                }
                if !self.text_open {
                    self.text_open = true;
                    events.push(StreamEvent::TextStart);
                }
                events.push(StreamEvent::TextDelta { text: content });
            }

            for tc in delta.tool_calls.unwrap_or_default() {
                let acc = self.tool_calls.entry(tc.index).or_default();
                if let Some(id) = tc.id {
                    acc.id = id;
                }
                if let Some(func) = tc.function {
                    if let Some(name) = func.name {
                        acc.name = name;
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
                if !acc.announced && !acc.id.is_empty() && !acc.name.is_empty() {
                    acc.announced = true;
                    events.push(StreamEvent::ToolInputStart {
                        id: acc.id.clone(),
                        name: acc.name.clone(),
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }

        if let Some(usage) = chunk.usage {
            let cached = usage
                .prompt_tokens_details
                .and_then(|d| d.cached_tokens)
                .unwrap_or(0);
            let reasoning = usage
                .completion_tokens_details
                .and_then(|d| d.reasoning_tokens)
                .unwrap_or(0);
            self.usage = Some(TokenUsage {
                input: usage.prompt_tokens.saturating_sub(cached),
                output: usage.completion_tokens.saturating_sub(reasoning),
                reasoning,
                cache: CacheUsage {
                    read: cached,
                    write: 0,
                },
            });
        }

        events
    }

    /// Close open blocks, emit accumulated tool calls and the step summary.
    fn complete(&mut self) -> Vec<StreamEvent> {
        self.done = true;
        let mut events = Vec::new();
        if self.reasoning_open {
            self.reasoning_open = false;
            events.push(StreamEvent::ReasoningEnd);
        }
        if self.text_open {
            self.text_open = false;
            events.push(StreamEvent::TextEnd);
        }
        for (_, acc) in std::mem::take(&mut self.tool_calls) {
            if !acc.announced {
                events.push(StreamEvent::ToolInputStart {
                    id: acc.id.clone(),
                    name: acc.name.clone(),
                });
            }
            events.push(acc.into_event());
        }
        events.push(StreamEvent::StepFinish {
            usage: self.usage.unwrap_or_default(),
            finish_reason: map_finish_reason(self.finish_reason.as_deref()),
        });
        events
    }
}

impl SseTranslator for OpenAiStream {
    fn on_data(&mut self, data: &str) -> Vec<StreamEvent> {
        if data == "[DONE]" {
            return self.complete();
        }
        match serde_json::from_str::<StreamResponse>(data) {
            Ok(chunk) => self.handle(chunk),
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                Vec::new()
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        // Some servers close without [DONE] after a final finish_reason
        if self.finish_reason.is_some() {
            return self.complete();
        }
        self.done = true;
        vec![StreamEvent::Error(ProviderError::StreamInterrupted(
            "stream ended before a finish reason".into(),
        ))]
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
