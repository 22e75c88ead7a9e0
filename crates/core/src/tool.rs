//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act on the workspace:
//! read and edit files, search, run commands.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentProfile;
use crate::error::ToolError;
use crate::message::FilePart;
use crate::permission::{AllowAll, PermissionDecision, PermissionGate, PermissionRequest};
use crate::provider::ToolDefinition;

/// Description and schema a tool presents for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInit {
    pub description: String,
    pub parameters: Value,
}

/// The result of a successful tool execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub title: String,
    pub output: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<FilePart>,
}

impl ToolOutput {
    pub fn new(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Receives live title/metadata updates from a running tool.
#[async_trait]
pub trait ToolMetadataSink: Send + Sync {
    async fn update(&self, title: Option<String>, metadata: Map<String, Value>);
}

struct DiscardMetadata;

#[async_trait]
impl ToolMetadataSink for DiscardMetadata {
    async fn update(&self, _title: Option<String>, _metadata: Map<String, Value>) {}
}

/// Everything a tool may touch while executing one call.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    pub agent: String,
    pub cancel: CancellationToken,
    permission: Arc<dyn PermissionGate>,
    metadata: Arc<dyn ToolMetadataSink>,
}

impl ToolContext {
    /// A context that allows everything and discards metadata updates.
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        call_id: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            call_id: call_id.into(),
            agent: agent.into(),
            cancel: CancellationToken::new(),
            permission: Arc::new(AllowAll),
            metadata: Arc::new(DiscardMetadata),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_permission(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.permission = gate;
        self
    }

    pub fn with_metadata_sink(mut self, sink: Arc<dyn ToolMetadataSink>) -> Self {
        self.metadata = sink;
        self
    }

    /// Ask the permission gate; `Err(PermissionDenied)` when refused.
    pub async fn ask(
        &self,
        tool: &str,
        title: impl Into<String>,
        metadata: Value,
    ) -> std::result::Result<(), ToolError> {
        let request = PermissionRequest {
            tool: tool.to_string(),
            session_id: self.session_id.clone(),
            call_id: self.call_id.clone(),
            title: title.into(),
            metadata,
        };
        match self.permission.ask(&request).await {
            PermissionDecision::Allow => Ok(()),
            PermissionDecision::Deny => Err(ToolError::PermissionDenied {
                tool_name: tool.to_string(),
                reason: format!("user rejected: {}", request.title),
            }),
        }
    }

    /// Publish a live title/metadata update for the running call.
    pub async fn update_metadata(&self, title: Option<String>, metadata: Map<String, Value>) {
        self.metadata.update(title, metadata).await;
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("message_id", &self.message_id)
            .field("call_id", &self.call_id)
            .field("agent", &self.agent)
            .finish()
    }
}

/// The core Tool trait.
///
/// Each tool (read, write, edit, grep, bash) implements this trait. Tools are
/// registered in the ToolRegistry and offered to the model per agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique id of this tool (e.g., "bash", "read").
    fn id(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Description and schema for `agent`. Tools may tailor either.
    async fn init(&self, _agent: &AgentProfile) -> ToolInit {
        ToolInit {
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        args: Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError>;
}

/// A registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same id.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    /// Registered tool ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Tools enabled for `agent`, sorted by id.
    pub fn enabled_for(&self, agent: &AgentProfile) -> Vec<Arc<dyn Tool>> {
        self.ids()
            .into_iter()
            .filter(|id| agent.tool_enabled(id))
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Definitions sent to the model for `agent`.
    pub async fn definitions_for(&self, agent: &AgentProfile) -> Vec<ToolDefinition> {
        let mut defs = Vec::new();
        for tool in self.enabled_for(agent) {
            let init = tool.init(agent).await;
            defs.push(ToolDefinition {
                name: tool.id().to_string(),
                description: init.description,
                parameters: init.parameters,
            });
        }
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
