//! Agent profiles: named bundles of prompt, generation options and tool access.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::session::ModelRef;

pub const DEFAULT_AGENT: &str = "build";
pub const PLAN_AGENT: &str = "plan";

/// Step ceiling when a profile does not set one.
pub const DEFAULT_MAX_STEPS: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Planning agents get a "stay in planning mode" reminder every step.
    #[serde(default)]
    pub planning: bool,

    /// Replaces the model-family default system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,

    /// Tool id → enabled. Tools absent from the map are enabled.
    #[serde(default)]
    pub tools: HashMap<String, bool>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            planning: false,
            prompt: None,
            temperature: None,
            top_p: None,
            max_output_tokens: None,
            thinking_budget: None,
            max_steps: None,
            model: None,
            tools: HashMap::new(),
        }
    }

    /// The default agent: every tool enabled.
    pub fn build() -> Self {
        Self {
            description: "Default agent with full tool access".into(),
            ..Self::new(DEFAULT_AGENT)
        }
    }

    /// Read-only planning agent.
    pub fn plan() -> Self {
        Self {
            description: "Plans changes without modifying files".into(),
            planning: true,
            tools: [("write", false), ("edit", false), ("bash", false)]
                .into_iter()
                .map(|(id, on)| (id.to_string(), on))
                .collect(),
            ..Self::new(PLAN_AGENT)
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_model(mut self, model: ModelRef) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool_enabled(&self, tool_id: &str) -> bool {
        self.tools.get(tool_id).copied().unwrap_or(true)
    }

    /// Effective step ceiling, never below one.
    pub fn max_steps(&self) -> u32 {
        self.max_steps.unwrap_or(DEFAULT_MAX_STEPS).max(1)
    }
}

/// Named agent profiles available to the loop.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentProfile>,
}

impl AgentRegistry {
    /// Registry holding the built-in `build` and `plan` profiles.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(AgentProfile::build());
        registry.register(AgentProfile::plan());
        registry
    }

    pub fn empty() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register a profile. Replaces any existing profile with the same name.
    pub fn register(&mut self, profile: AgentProfile) {
        self.agents.insert(profile.name.clone(), profile);
    }

    pub fn get(&self, name: &str) -> Option<&AgentProfile> {
        self.agents.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AgentProfile> {
        self.agents.get_mut(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.agents.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
