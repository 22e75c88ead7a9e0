//! Permission gate: the approval seam between tools and the user.
//!
//! Tools call `ctx.ask(..)` before side effects. The gate answers allow or
//! deny; how it decides (static policy, interactive prompt) is up to the
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a tool wants to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub tool: String,
    pub session_id: String,
    pub call_id: String,
    /// Human-readable summary, e.g. "Run `cargo build`".
    pub title: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny,
}

/// Configured action for a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    #[default]
    Allow,
    Deny,
    Ask,
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn ask(&self, request: &PermissionRequest) -> PermissionDecision;
}

/// Approves everything.
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn ask(&self, _request: &PermissionRequest) -> PermissionDecision {
        PermissionDecision::Allow
    }
}

/// Rejects everything.
pub struct DenyAll;

#[async_trait]
impl PermissionGate for DenyAll {
    async fn ask(&self, _request: &PermissionRequest) -> PermissionDecision {
        PermissionDecision::Deny
    }
}

/// Per-tool allow/deny/ask rules with a fallback action.
///
/// `Ask` is delegated to the interactive gate if one is installed, and denied
/// otherwise.
pub struct PermissionPolicy {
    default: PermissionAction,
    rules: HashMap<String, PermissionAction>,
    interactive: Option<Arc<dyn PermissionGate>>,
}

impl PermissionPolicy {
    pub fn new(default: PermissionAction) -> Self {
        Self {
            default,
            rules: HashMap::new(),
            interactive: None,
        }
    }

    pub fn with_rule(mut self, tool: impl Into<String>, action: PermissionAction) -> Self {
        self.rules.insert(tool.into(), action);
        self
    }

    pub fn with_rules(mut self, rules: HashMap<String, PermissionAction>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_interactive(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.interactive = Some(gate);
        self
    }

    pub fn action_for(&self, tool: &str) -> PermissionAction {
        self.rules.get(tool).copied().unwrap_or(self.default)
    }
}

#[async_trait]
impl PermissionGate for PermissionPolicy {
    async fn ask(&self, request: &PermissionRequest) -> PermissionDecision {
        match self.action_for(&request.tool) {
            PermissionAction::Allow => PermissionDecision::Allow,
            PermissionAction::Deny => PermissionDecision::Deny,
            PermissionAction::Ask => match &self.interactive {
                Some(gate) => gate.ask(request).await,
                None => {
                    tracing::debug!(tool = %request.tool, "No interactive gate installed, denying");
                    PermissionDecision::Deny
                }
            },
        }
    }
}
