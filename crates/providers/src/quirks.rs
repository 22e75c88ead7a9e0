//! Per-vendor message normalization.
//!
//! Some endpoints reject shapes that others accept: structured or repeated
//! system messages, empty text blocks, or tool-call history without a tool
//! list. These rewrites run on every request before it reaches the adapter.

use rivet_config::ProviderKind;
use rivet_core::provider::{ChatMessage, ChatPart, ChatRole, ToolDefinition};

/// Name of the placeholder tool injected for vendors that require one.
pub const PLACEHOLDER_TOOL: &str = "_noop";

/// Rewrites a vendor needs before it will accept a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VendorQuirks {
    /// Collapse all system messages into one leading plain-text message.
    pub merge_system: bool,
    /// Remove empty text blocks and messages left with nothing to say.
    pub drop_empty_content: bool,
    /// A non-empty tool list is mandatory once history contains tool calls.
    pub requires_tools_with_history: bool,
}

impl VendorQuirks {
    pub fn for_provider(kind: ProviderKind, provider_id: &str) -> Self {
        match kind {
            ProviderKind::Anthropic => Self {
                merge_system: true,
                drop_empty_content: true,
                requires_tools_with_history: true,
            },
            ProviderKind::OpenAi => Self {
                merge_system: true,
                drop_empty_content: false,
                requires_tools_with_history: provider_id.contains("litellm"),
            },
        }
    }

    /// Apply message-level rewrites.
    pub fn normalize_messages(&self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let mut messages = messages;

        if self.merge_system {
            let (system, rest): (Vec<ChatMessage>, Vec<ChatMessage>) = messages
                .into_iter()
                .partition(|m| m.role == ChatRole::System);
            let text = system
                .iter()
                .map(ChatMessage::text)
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n\n");

            messages = Vec::with_capacity(rest.len() + 1);
            if !text.is_empty() {
                messages.push(ChatMessage::system(text));
            }
            messages.extend(rest);
        }

        if self.drop_empty_content {
            messages = messages
                .into_iter()
                .filter_map(|mut m| {
                    m.content
                        .retain(|p| !matches!(p, ChatPart::Text { text } if text.trim().is_empty()));
                    let keep = !m.content.is_empty()
                        || !m.tool_calls.is_empty()
                        || m.role == ChatRole::Tool;
                    keep.then_some(m)
                })
                .collect();
        }

        messages
    }

    /// Add a placeholder tool when the vendor requires a tool list and the
    /// history references tool calls but no tools are offered this turn.
    pub fn normalize_tools(
        &self,
        messages: &[ChatMessage],
        mut tools: Vec<ToolDefinition>,
    ) -> Vec<ToolDefinition> {
        let has_tool_history = messages
            .iter()
            .any(|m| !m.tool_calls.is_empty() || m.role == ChatRole::Tool);

        if self.requires_tools_with_history && tools.is_empty() && has_tool_history {
            tools.push(ToolDefinition {
                name: PLACEHOLDER_TOOL.into(),
                description: "Placeholder. Never call this tool.".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            });
        }
        tools
    }
}
