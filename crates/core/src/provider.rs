//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider opens one streaming model call and yields an ordered sequence of
//! typed [`StreamEvent`]s. Everything vendor-specific (wire format, auth, SSE
//! framing) stays behind this trait.
//!
//! Implementations: Anthropic Messages API, OpenAI-compatible chat completions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::TokenUsage;
use crate::session::ModelRef;

// ── Chat history ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One content block of a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatPart {
    Text {
        text: String,
    },
    File {
        mime: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

/// A tool invocation issued by the model in an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A normalized, vendor-neutral chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ChatPart>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ChatToolCall>,

    /// For tool-result turns, the call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatMessage {
    fn with_role(role: ChatRole, content: Vec<ChatPart>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(ChatRole::System, vec![ChatPart::Text { text: text.into() }])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(ChatRole::User, vec![ChatPart::Text { text: text.into() }])
    }

    pub fn user_parts(content: Vec<ChatPart>) -> Self {
        Self::with_role(ChatRole::User, content)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        let text = text.into();
        let content = if text.is_empty() {
            Vec::new()
        } else {
            vec![ChatPart::Text { text }]
        };
        Self::with_role(ChatRole::Assistant, content)
    }

    pub fn with_tool_calls(mut self, calls: Vec<ChatToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            is_error,
            ..Self::with_role(ChatRole::Tool, vec![ChatPart::Text { text: output.into() }])
        }
    }

    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ChatPart::Text { text } => Some(text.as_str()),
                ChatPart::File { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

// ── Request ─────────────────────────────────────────────────────────────

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: Value,
}

/// A single streaming model invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Vendor model id, without the provider prefix.
    pub model: String,

    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Effective output ceiling, thinking budget included.
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

// ── Stream events ───────────────────────────────────────────────────────

/// Why the model stopped a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other(String),
    Unknown,
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool-calls",
            Self::ContentFilter => "content-filter",
            Self::Error => "error",
            Self::Other(s) => s,
            Self::Unknown => "unknown",
        }
    }
}

/// Ordered events of one streaming model call.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextStart,
    TextDelta { text: String },
    TextEnd,
    ReasoningStart,
    ReasoningDelta { text: String },
    ReasoningEnd,
    /// The model began emitting arguments for a tool call.
    ToolInputStart { id: String, name: String },
    /// A complete tool call with parsed arguments.
    ToolCall { id: String, name: String, input: Value },
    StepFinish {
        usage: TokenUsage,
        finish_reason: FinishReason,
    },
    /// Terminal: nothing follows an error.
    Error(ProviderError),
}

pub type EventReceiver = mpsc::Receiver<Result<StreamEvent, ProviderError>>;

/// The core Provider trait.
///
/// The agent loop never talks to a vendor directly; it calls `stream()` on
/// whichever provider the session's model resolves to.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openrouter").
    fn name(&self) -> &str;

    /// Open a streaming call. Events arrive in order; the channel closes when
    /// the call ends. Implementations stop producing once `cancel` fires.
    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<EventReceiver, ProviderError>;

    /// List models this provider serves, if it can tell.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

// ── Model descriptors ───────────────────────────────────────────────────

/// USD per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
}

impl ModelCost {
    /// Cost of one step. Reasoning tokens are billed at the output rate.
    pub fn compute(&self, usage: &TokenUsage) -> f64 {
        (usage.input as f64 * self.input
            + (usage.output + usage.reasoning) as f64 * self.output
            + usage.cache.read as f64 * self.cache_read
            + usage.cache.write as f64 * self.cache_write)
            / 1_000_000.0
    }
}

/// Static facts about a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider_id: String,
    pub id: String,
    /// "claude", "gpt", "gemini", … Drives prompt and schema quirks.
    pub family: String,
    pub context_limit: u32,
    pub output_limit: u32,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default)]
    pub cost: ModelCost,
}

impl ModelInfo {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(&self.provider_id, &self.id)
    }

    /// Descriptor for a model absent from the catalog.
    pub fn synthesized(model: &ModelRef) -> Self {
        Self {
            provider_id: model.provider_id.clone(),
            id: model.model_id.clone(),
            family: guess_family(&model.model_id).to_string(),
            context_limit: 128_000,
            output_limit: 32_000,
            reasoning: false,
            cost: ModelCost::default(),
        }
    }
}

/// Best-effort family from a model id.
pub fn guess_family(model_id: &str) -> &'static str {
    let id = model_id.to_ascii_lowercase();
    if id.contains("claude") {
        "claude"
    } else if id.contains("gemini") {
        "gemini"
    } else if id.contains("gpt") || id.starts_with("o1") || id.starts_with("o3") || id.starts_with("o4") {
        "gpt"
    } else {
        "other"
    }
}
