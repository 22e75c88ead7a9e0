//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with `content_block_*` events
//! - Extended thinking surfaced as reasoning events

use async_trait::async_trait;
use rivet_core::error::ProviderError;
use rivet_core::message::TokenUsage;
use rivet_core::provider::*;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::transport::{self, SseTranslator};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: transport::http_client()?,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Register under a different provider id.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut non_system: Vec<&ChatMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                ChatRole::System => system_parts.push(msg.text()),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic content blocks. Consecutive turns with
    /// the same role are merged, so parallel tool results land in one user
    /// message.
    fn to_api_messages(messages: &[&ChatMessage]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            let (role, blocks) = match msg.role {
                ChatRole::User => ("user", msg.content.iter().map(content_block).collect()),
                ChatRole::Assistant => {
                    let mut blocks: Vec<ContentBlock> =
                        msg.content.iter().map(content_block).collect();
                    blocks.extend(msg.tool_calls.iter().map(|tc| ContentBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input: tc.input.clone(),
                    }));
                    ("assistant", blocks)
                }
                ChatRole::Tool => (
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.text(),
                        is_error: msg.is_error,
                    }],
                ),
                ChatRole::System => continue,
            };

            match result.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => result.push(AnthropicMessage {
                    role,
                    content: blocks,
                }),
            }
        }

        result
    }

    fn build_body(request: &ProviderRequest) -> Value {
        let (system, messages) = Self::extract_system(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens,
            "stream": true,
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        match request.thinking_budget {
            // Extended thinking rejects sampling overrides.
            Some(budget) => {
                body["thinking"] = serde_json::json!({
                    "type": "enabled",
                    "budget_tokens": budget,
                });
            }
            None => {
                if let Some(t) = request.temperature {
                    body["temperature"] = serde_json::json!(t);
                }
                if let Some(p) = request.top_p {
                    body["top_p"] = serde_json::json!(p);
                }
            }
        }

        body
    }
}

fn content_block(part: &ChatPart) -> ContentBlock {
    match part {
        ChatPart::Text { text } => ContentBlock::Text { text: text.clone() },
        ChatPart::File {
            mime,
            url,
            filename,
        } if mime.starts_with("image/") => match url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
        {
            Some((media_type, data)) => ContentBlock::Image {
                source: ImageSource::Base64 {
                    media_type: media_type.to_string(),
                    data: data.to_string(),
                },
            },
            None if url.starts_with("http") => ContentBlock::Image {
                source: ImageSource::Url { url: url.clone() },
            },
            None => ContentBlock::Text {
                text: format!("[image: {}]", filename.as_deref().unwrap_or(url)),
            },
        },
        ChatPart::File { mime, url, filename } => ContentBlock::Text {
            text: format!(
                "[attached file: {} ({mime})]",
                filename.as_deref().unwrap_or(url)
            ),
        },
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<EventReceiver, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
            AnthropicStream::default(),
            cancel,
        ))
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        // No listing endpoint needed; the catalog knows the current models
        Ok(crate::models::ModelCatalog::builtin()
            .list(Some("anthropic"))
            .into_iter()
            .map(|m| m.id)
            .collect())
    }
}

// --- Streaming state machine ---

enum OpenBlock {
    Text,
    Thinking,
    Tool { id: String, name: String, json: String },
}

/// Translates Anthropic SSE payloads into [`StreamEvent`]s.
#[derive(Default)]
pub(crate) struct AnthropicStream {
    blocks: HashMap<u64, OpenBlock>,
    usage: TokenUsage,
    stop_reason: Option<String>,
    done: bool,
}

pub(crate) fn map_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        Some(other) => FinishReason::Other(other.to_string()),
        None => FinishReason::Unknown,
    }
}

impl AnthropicStream {
    fn close_block(&mut self, index: u64) -> Option<StreamEvent> {
        match self.blocks.remove(&index)? {
            OpenBlock::Text => Some(StreamEvent::TextEnd),
            OpenBlock::Thinking => Some(StreamEvent::ReasoningEnd),
            OpenBlock::Tool { id, name, json } => {
                let input = if json.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&json).unwrap_or(Value::String(json))
                };
                Some(StreamEvent::ToolCall { id, name, input })
            }
        }
    }

    fn close_all(&mut self) -> Vec<StreamEvent> {
        let mut indices: Vec<u64> = self.blocks.keys().copied().collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .filter_map(|i| self.close_block(i))
            .collect()
    }

    fn read_usage(&mut self, usage: &Value) {
        if let Some(n) = usage["input_tokens"].as_u64() {
            self.usage.input = n;
        }
        if let Some(n) = usage["output_tokens"].as_u64() {
            self.usage.output = n;
        }
        if let Some(n) = usage["cache_read_input_tokens"].as_u64() {
            self.usage.cache.read = n;
        }
        if let Some(n) = usage["cache_creation_input_tokens"].as_u64() {
            self.usage.cache.write = n;
        }
    }

    fn handle(&mut self, event: &Value) -> Vec<StreamEvent> {
        let index = event["index"].as_u64().unwrap_or(0);

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                self.read_usage(&event["message"]["usage"]);
                Vec::new()
            }
            "content_block_start" => {
                let block = &event["content_block"];
                match block["type"].as_str() {
                    Some("text") => {
                        self.blocks.insert(index, OpenBlock::Text);
                        let mut events = vec![StreamEvent::TextStart];
                        if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                            events.push(StreamEvent::TextDelta { text: text.into() });
                        }
                        events
                    }
                    Some("thinking") => {
                        self.blocks.insert(index, OpenBlock::Thinking);
                        vec![StreamEvent::ReasoningStart]
                    }
                    Some("tool_use") => {
                        let id = block["id"].as_str().unwrap_or("").to_string();
                        let name = block["name"].as_str().unwrap_or("").to_string();
                        self.blocks.insert(
                            index,
                            OpenBlock::Tool {
                                id: id.clone(),
                                name: name.clone(),
                                json: String::new(),
                            },
                        );
                        vec![StreamEvent::ToolInputStart { id, name }]
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => delta["text"]
                        .as_str()
                        .map(|t| vec![StreamEvent::TextDelta { text: t.into() }])
                        .unwrap_or_default(),
                    "thinking_delta" => delta["thinking"]
                        .as_str()
                        .map(|t| vec![StreamEvent::ReasoningDelta { text: t.into() }])
                        .unwrap_or_default(),
                    "input_json_delta" => {
                        if let (Some(OpenBlock::Tool { json, .. }), Some(partial)) =
                            (self.blocks.get_mut(&index), delta["partial_json"].as_str())
                        {
                            json.push_str(partial);
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => self.close_block(index).into_iter().collect(),
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                self.read_usage(&event["usage"]);
                Vec::new()
            }
            "message_stop" => {
                self.done = true;
                let mut events = self.close_all();
                events.push(StreamEvent::StepFinish {
                    usage: self.usage,
                    finish_reason: map_stop_reason(self.stop_reason.as_deref()),
                });
                events
            }
            "error" => {
                self.done = true;
                let error = &event["error"];
                let message = error["message"].as_str().unwrap_or("unknown error").to_string();
                let status_code = match error["type"].as_str() {
                    Some("overloaded_error") => 529,
                    Some("rate_limit_error") => 429,
                    Some("invalid_request_error") => 400,
                    _ => 500,
                };
                vec![StreamEvent::Error(ProviderError::ApiError {
                    status_code,
                    message,
                })]
            }
            other => {
                trace!(event = other, "Ignoring Anthropic event");
                Vec::new()
            }
        }
    }
}

impl SseTranslator for AnthropicStream {
    fn on_data(&mut self, data: &str) -> Vec<StreamEvent> {
        match serde_json::from_str::<Value>(data) {
            Ok(event) => self.handle(&event),
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
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
        self.done = true;
        let mut events = self.close_all();
        events.push(StreamEvent::Error(ProviderError::StreamInterrupted(
            "stream ended before message_stop".into(),
        )));
        events
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}
