//! Configuration loading, validation, and management for Rivet.
//!
//! Loads configuration from `~/.rivet/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use rivet_core::agent::{AgentProfile, AgentRegistry};
use rivet_core::permission::{PermissionAction, PermissionPolicy};
use rivet_core::provider::ModelCost;
use rivet_core::session::ModelRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.rivet/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model as `provider/model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Global ceiling on output tokens per model call
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Provider-specific configurations, keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Agent profile overrides and additions, keyed by agent name
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,

    #[serde(default)]
    pub permission: PermissionConfig,
}

fn default_max_output_tokens() -> u32 {
    32_000
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory (file backend) or database file (sqlite backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Storage location, defaulting under the config directory.
    pub fn resolved_path(&self, config_dir: &Path) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        match self.backend {
            StorageBackend::Sqlite => config_dir.join("rivet.db"),
            StorageBackend::File | StorageBackend::Memory => config_dir.join("storage"),
        }
    }
}

/// Wire protocol a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    /// OpenAI chat completions, also used by OpenRouter, Ollama, vLLM, …
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProviderKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Per-model catalog overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, ModelOverride>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("models", &self.models)
            .finish()
    }
}

impl ProviderConfig {
    /// Explicit kind, or inferred from the provider id.
    pub fn kind_for(&self, provider_id: &str) -> ProviderKind {
        self.kind.unwrap_or(match provider_id {
            "anthropic" => ProviderKind::Anthropic,
            _ => ProviderKind::OpenAi,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<ModelCost>,
}

/// Overrides for a named agent profile. Unknown names create new profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning: Option<bool>,
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
    /// `provider/model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tools: HashMap<String, bool>,
}

impl AgentConfig {
    fn apply_to(&self, profile: &mut AgentProfile) -> Result<(), ConfigError> {
        if let Some(description) = &self.description {
            profile.description = description.clone();
        }
        if let Some(planning) = self.planning {
            profile.planning = planning;
        }
        if self.prompt.is_some() {
            profile.prompt = self.prompt.clone();
        }
        if self.temperature.is_some() {
            profile.temperature = self.temperature;
        }
        if self.top_p.is_some() {
            profile.top_p = self.top_p;
        }
        if self.max_output_tokens.is_some() {
            profile.max_output_tokens = self.max_output_tokens;
        }
        if self.thinking_budget.is_some() {
            profile.thinking_budget = self.thinking_budget;
        }
        if self.max_steps.is_some() {
            profile.max_steps = self.max_steps;
        }
        if let Some(model) = &self.model {
            profile.model = Some(parse_model(model, &format!("agents.{}.model", profile.name))?);
        }
        profile
            .tools
            .extend(self.tools.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Action for tools without a specific rule
    #[serde(default)]
    pub default: PermissionAction,

    /// Tool id → action
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tools: HashMap<String, PermissionAction>,
}

impl PermissionConfig {
    pub fn policy(&self) -> PermissionPolicy {
        PermissionPolicy::new(self.default).with_rules(self.tools.clone())
    }
}

fn parse_model(value: &str, field: &str) -> Result<ModelRef, ConfigError> {
    ModelRef::parse(value).ok_or_else(|| {
        ConfigError::ValidationError(format!("{field} must look like provider/model, got '{value}'"))
    })
}

/// Environment variable holding the API key for well-known providers.
pub fn api_key_env(provider_id: &str) -> Option<&'static str> {
    match provider_id {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }
}

impl AppConfig {
    /// Load configuration from the default path (`~/.rivet/config.toml`,
    /// or `$RIVET_CONFIG_DIR/config.toml`) and apply environment overrides:
    /// - `RIVET_MODEL` replaces `model`
    /// - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `OPENROUTER_API_KEY` fill
    ///   provider keys not set in the file
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("RIVET_MODEL").filter(|m| !m.is_empty()) {
            self.model = Some(model);
        }
        for provider_id in ["anthropic", "openai", "openrouter"] {
            let Some(var) = api_key_env(provider_id) else {
                continue;
            };
            let Some(key) = lookup(var).filter(|k| !k.is_empty()) else {
                continue;
            };
            let entry = self.providers.entry(provider_id.to_string()).or_default();
            if entry.api_key.is_none() {
                entry.api_key = Some(key);
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        std::env::var("RIVET_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs_home().join(".rivet"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(model) = &self.model {
            parse_model(model, "model")?;
        }

        if self.max_output_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_output_tokens must be > 0".into(),
            ));
        }

        for (name, agent) in &self.agents {
            if let Some(t) = agent.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::ValidationError(format!(
                        "agents.{name}.temperature must be between 0.0 and 2.0"
                    )));
                }
            }
            if let Some(p) = agent.top_p {
                if !(0.0..=1.0).contains(&p) {
                    return Err(ConfigError::ValidationError(format!(
                        "agents.{name}.top_p must be between 0.0 and 1.0"
                    )));
                }
            }
            if agent.max_steps == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "agents.{name}.max_steps must be > 0"
                )));
            }
            if let Some(model) = &agent.model {
                parse_model(model, &format!("agents.{name}.model"))?;
            }
        }

        Ok(())
    }

    /// The configured default model, if any.
    pub fn default_model(&self) -> Result<Option<ModelRef>, ConfigError> {
        self.model.as_deref().map(|m| parse_model(m, "model")).transpose()
    }

    /// Built-in agent profiles with configured overrides applied.
    pub fn agent_registry(&self) -> Result<AgentRegistry, ConfigError> {
        let mut registry = AgentRegistry::new();
        let mut names: Vec<&String> = self.agents.keys().collect();
        names.sort();
        for name in names {
            let mut profile = registry
                .get(name)
                .cloned()
                .unwrap_or_else(|| AgentProfile::new(name.as_str()));
            self.agents[name].apply_to(&mut profile)?;
            registry.register(profile);
        }
        Ok(registry)
    }

    /// Static permission policy (no interactive delegate installed).
    pub fn permission_policy(&self) -> PermissionPolicy {
        self.permission.policy()
    }

    /// Check if an API key is available for a provider.
    pub fn has_api_key(&self, provider_id: &str) -> bool {
        self.providers
            .get(provider_id)
            .is_some_and(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self {
            model: Some("anthropic/claude-sonnet-4-20250514".into()),
            ..Self::default()
        };
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_output_tokens: default_max_output_tokens(),
            storage: StorageConfig::default(),
            providers: HashMap::new(),
            agents: HashMap::new(),
            permission: PermissionConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_output_tokens, 32_000);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.default_model().unwrap().is_none());
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            parsed.default_model().unwrap().unwrap().provider_id,
            "anthropic"
        );
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(config.model.is_none());
    }

    #[test]
    fn full_file_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
model = "openrouter/anthropic/claude-sonnet-4"
max_output_tokens = 16000

[storage]
backend = "sqlite"
path = "/tmp/rivet-test.db"

[providers.openrouter]
api_key = "sk-or-test"

[providers.local]
kind = "openai"
api_url = "http://localhost:11434/v1"

[providers.local.models."qwen2.5-coder"]
context_limit = 32768
output_limit = 8192

[agents.plan]
max_steps = 10

[agents.review]
planning = true
prompt = "Review the diff."
model = "anthropic/claude-sonnet-4-20250514"
tools = {{ bash = false }}

[permission]
default = "ask"
tools = {{ read = "allow", bash = "deny" }}
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        let model = config.default_model().unwrap().unwrap();
        assert_eq!(model.provider_id, "openrouter");
        assert_eq!(model.model_id, "anthropic/claude-sonnet-4");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert!(config.has_api_key("openrouter"));
        assert_eq!(
            config.providers["local"].kind_for("local"),
            ProviderKind::OpenAi
        );
        assert_eq!(
            config.providers["local"].models["qwen2.5-coder"].context_limit,
            Some(32768)
        );

        let agents = config.agent_registry().unwrap();
        let plan = agents.get("plan").unwrap();
        assert_eq!(plan.max_steps(), 10);
        assert!(!plan.tool_enabled("write"), "built-in restrictions kept");
        let review = agents.get("review").unwrap();
        assert!(review.planning);
        assert!(!review.tool_enabled("bash"));
        assert_eq!(review.model.as_ref().unwrap().provider_id, "anthropic");

        let policy = config.permission_policy();
        assert_eq!(policy.action_for("read"), PermissionAction::Allow);
        assert_eq!(policy.action_for("bash"), PermissionAction::Deny);
        assert_eq!(policy.action_for("write"), PermissionAction::Ask);
    }

    #[test]
    fn invalid_model_rejected() {
        let config = AppConfig {
            model: Some("no-provider".into()),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn invalid_agent_temperature_rejected() {
        let mut config = AppConfig::default();
        config.agents.insert(
            "build".into(),
            AgentConfig {
                temperature: Some(5.0),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_fill_missing_keys_only() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("from-file".into()),
                ..Default::default()
            },
        );

        let env: HashMap<&str, &str> = [
            ("RIVET_MODEL", "openai/gpt-4o"),
            ("ANTHROPIC_API_KEY", "from-env"),
            ("OPENAI_API_KEY", "sk-openai"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(
            config.providers["anthropic"].api_key.as_deref(),
            Some("from-file")
        );
        assert_eq!(
            config.providers["openai"].api_key.as_deref(),
            Some("sk-openai")
        );
        assert!(!config.providers.contains_key("openrouter"));
    }

    #[test]
    fn debug_redacts_api_keys() {
        let provider = ProviderConfig {
            api_key: Some("sk-secret-value".into()),
            ..Default::default()
        };
        let debug = format!("{provider:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn storage_path_defaults_by_backend() {
        let dir = Path::new("/home/u/.rivet");
        let sqlite = StorageConfig {
            backend: StorageBackend::Sqlite,
            path: None,
        };
        assert_eq!(sqlite.resolved_path(dir), dir.join("rivet.db"));
        assert_eq!(StorageConfig::default().resolved_path(dir), dir.join("storage"));
    }
}
