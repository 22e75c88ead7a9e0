//! Message and Part domain types.
//!
//! A message is one user or assistant turn. Its content lives in an ordered,
//! append-only list of parts (text, file, tool call, reasoning). Messages are
//! a tagged union by role; parts are a tagged union by kind; tool parts carry
//! their own `pending → running → completed | error` state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::id::{self, IdKind};
use crate::session::ModelRef;

/// The role of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

// ── Messages ────────────────────────────────────────────────────────────

/// Message header, discriminated by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageInfo {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl MessageInfo {
    pub fn id(&self) -> &str {
        match self {
            Self::User(m) => &m.id,
            Self::Assistant(m) => &m.id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::User(m) => &m.session_id,
            Self::Assistant(m) => &m.session_id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::User(_) => Role::User,
            Self::Assistant(_) => Role::Assistant,
        }
    }

    pub fn as_user(&self) -> Option<&UserMessage> {
        match self {
            Self::User(m) => Some(m),
            Self::Assistant(_) => None,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(m) => Some(m),
            Self::User(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTime {
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: String,
    pub session_id: String,
    pub time: UserTime,
    /// Agent profile the user addressed.
    pub agent: String,
    pub model: ModelRef,
    /// Caller-supplied system text appended to the agent's prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl UserMessage {
    pub fn new(session_id: impl Into<String>, agent: impl Into<String>, model: ModelRef) -> Self {
        Self {
            id: id::ascending(IdKind::Message),
            session_id: session_id.into(),
            time: UserTime { created: Utc::now() },
            agent: agent.into(),
            model,
            system: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantTime {
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheUsage {
    pub read: u64,
    pub write: u64,
}

/// Token usage of one model step or an accumulated message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache: CacheUsage,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.reasoning + self.cache.read + self.cache.write
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.output += rhs.output;
        self.reasoning += rhs.reasoning;
        self.cache.read += rhs.cache.read;
        self.cache.write += rhs.cache.write;
    }
}

/// Terminal error recorded on a settled assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum MessageError {
    OutputLength,
    Aborted {
        message: String,
    },
    ProviderAuth {
        provider_id: String,
        message: String,
    },
    Api {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        retryable: bool,
    },
    Unknown {
        message: String,
    },
}

impl MessageError {
    pub fn aborted() -> Self {
        Self::Aborted {
            message: "The operation was aborted.".into(),
        }
    }

    /// Classify a provider failure.
    pub fn from_provider(err: &ProviderError, provider_id: &str) -> Self {
        let retryable = err.is_retryable();
        match err {
            ProviderError::Cancelled => Self::aborted(),
            ProviderError::AuthenticationFailed(message) => Self::ProviderAuth {
                provider_id: provider_id.to_string(),
                message: message.clone(),
            },
            ProviderError::ApiError {
                status_code,
                message,
            } => Self::Api {
                message: message.clone(),
                status_code: Some(*status_code),
                retryable,
            },
            ProviderError::RateLimited { .. } => Self::Api {
                message: err.to_string(),
                status_code: Some(429),
                retryable,
            },
            ProviderError::Network(_)
            | ProviderError::Timeout(_)
            | ProviderError::StreamInterrupted(_) => Self::Api {
                message: err.to_string(),
                status_code: None,
                retryable,
            },
            ProviderError::ModelNotFound(_) | ProviderError::NotConfigured(_) => Self::Unknown {
                message: err.to_string(),
            },
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    pub fn message(&self) -> String {
        match self {
            Self::OutputLength => "Model output exceeded the maximum length".into(),
            Self::Aborted { message }
            | Self::ProviderAuth { message, .. }
            | Self::Api { message, .. }
            | Self::Unknown { message } => message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: String,
    pub session_id: String,
    /// The user message this turn answers.
    pub parent_id: String,
    pub provider_id: String,
    pub model_id: String,
    /// Agent profile that produced this turn.
    pub mode: String,
    pub time: AssistantTime,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary: bool,
}

impl AssistantMessage {
    pub fn new(
        session_id: impl Into<String>,
        parent_id: impl Into<String>,
        model: &ModelRef,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            id: id::ascending(IdKind::Message),
            session_id: session_id.into(),
            parent_id: parent_id.into(),
            provider_id: model.provider_id.clone(),
            model_id: model.model_id.clone(),
            mode: mode.into(),
            time: AssistantTime {
                created: Utc::now(),
                completed: None,
            },
            cost: 0.0,
            tokens: TokenUsage::default(),
            finish: None,
            error: None,
            summary: false,
        }
    }

    /// Settled once the completion time is set.
    pub fn is_settled(&self) -> bool {
        self.time.completed.is_some()
    }
}

/// Values used to settle an assistant message successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub cost: f64,
    pub tokens: TokenUsage,
    pub finish: Option<String>,
    pub summary: bool,
}

// ── Parts ───────────────────────────────────────────────────────────────

/// A fragment of message content, owned by exactly one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    #[serde(flatten)]
    pub kind: PartKind,
}

impl Part {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        kind: PartKind,
    ) -> Self {
        Self {
            id: id::ascending(IdKind::Part),
            session_id: session_id.into(),
            message_id: message_id.into(),
            kind,
        }
    }

    pub fn as_text(&self) -> Option<&TextPart> {
        match &self.kind {
            PartKind::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<&ToolPart> {
        match &self.kind {
            PartKind::Tool(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PartKind {
    Text(TextPart),
    File(FilePart),
    Tool(ToolPart),
    Reasoning(ReasoningPart),
}

impl PartKind {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextPart::new(text))
    }

    /// Text the model sees but the user did not type (reminders, injected context).
    pub fn synthetic_text(text: impl Into<String>) -> Self {
        Self::Text(TextPart {
            synthetic: true,
            ..TextPart::new(text)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartTime {
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl PartTime {
    pub fn started() -> Self {
        Self {
            start: Utc::now(),
            end: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
    /// Kept in storage but never shown to the model.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<PartTime>,
}

impl TextPart {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            synthetic: false,
            ignored: false,
            time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceText {
    pub value: String,
    pub start: u64,
    pub end: u64,
}

/// Where a file part came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileSource {
    File {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<SourceText>,
    },
    Symbol {
        path: String,
        name: String,
        kind: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<SourceText>,
    },
    Resource {
        client_name: String,
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<SourceText>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePart {
    pub mime: String,
    /// `file://`, `data:` or remote URL.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<FileSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPart {
    pub text: String,
    pub time: PartTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPart {
    /// Provider-assigned call id; correlation key for the tool result.
    pub call_id: String,
    pub tool: String,
    pub state: ToolState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStart {
    pub start: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolTime {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Tool execution state. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolState {
    Pending {
        #[serde(default)]
        input: Value,
    },
    Running {
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
        time: ToolStart,
    },
    Completed {
        input: Value,
        output: String,
        title: String,
        #[serde(default)]
        metadata: Map<String, Value>,
        time: ToolTime,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<FilePart>,
    },
    Error {
        input: Value,
        error: String,
        time: ToolTime,
    },
}

impl ToolState {
    /// Position in `pending → running → {completed | error}`.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending { .. } => 0,
            Self::Running { .. } => 1,
            Self::Completed { .. } | Self::Error { .. } => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Running { .. } => "running",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }

    pub fn input(&self) -> &Value {
        match self {
            Self::Pending { input }
            | Self::Running { input, .. }
            | Self::Completed { input, .. }
            | Self::Error { input, .. } => input,
        }
    }

    /// Whether moving from `self` to `next` keeps the state machine monotonic.
    /// `running → running` is allowed so tools can publish live metadata.
    pub fn can_transition_to(&self, next: &ToolState) -> bool {
        match (self, next) {
            (Self::Running { .. }, Self::Running { .. }) => true,
            _ if self.is_terminal() => self == next,
            _ => next.rank() > self.rank() || self == next,
        }
    }

    /// Start time once the tool began running.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Pending { .. } => None,
            Self::Running { time, .. } => Some(time.start),
            Self::Completed { time, .. } | Self::Error { time, .. } => Some(time.start),
        }
    }
}

/// A message header together with its parts in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWithParts {
    pub info: MessageInfo,
    pub parts: Vec<Part>,
}

impl MessageWithParts {
    /// Concatenated non-synthetic text, handy for display.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.as_text())
            .filter(|t| !t.synthetic)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}
