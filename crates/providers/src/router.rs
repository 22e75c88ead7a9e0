//! Provider registry: maps provider ids to adapters and resolves a
//! `provider/model` reference into everything a call needs.
//!
//! Handles provider creation from config, model lookup and vendor quirks.

use std::collections::HashMap;
use std::sync::Arc;

use rivet_config::{AppConfig, ProviderKind};
use rivet_core::error::ProviderError;
use rivet_core::provider::{ModelInfo, Provider};
use rivet_core::session::ModelRef;
use tracing::{debug, info};

use crate::anthropic::AnthropicProvider;
use crate::models::ModelCatalog;
use crate::openai_compat::OpenAiCompatProvider;
use crate::quirks::VendorQuirks;

/// A model reference resolved against the registry.
#[derive(Clone)]
pub struct ResolvedModel {
    pub info: ModelInfo,
    pub provider: Arc<dyn Provider>,
    pub quirks: VendorQuirks,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("info", &self.info)
            .field("provider", &self.provider.name())
            .field("quirks", &self.quirks)
            .finish()
    }
}

struct Registered {
    provider: Arc<dyn Provider>,
    kind: ProviderKind,
}

/// Routes model references to the correct provider.
pub struct ProviderRegistry {
    providers: HashMap<String, Registered>,
    catalog: ModelCatalog,
    default_model: Option<ModelRef>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(ModelCatalog::builtin())
    }
}

impl ProviderRegistry {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            providers: HashMap::new(),
            catalog,
            default_model: None,
        }
    }

    /// Register a provider under `id`.
    pub fn register(&mut self, id: impl Into<String>, kind: ProviderKind, provider: Arc<dyn Provider>) {
        let id = id.into();
        debug!(provider = %id, ?kind, "Registered provider");
        self.providers.insert(id, Registered { provider, kind });
    }

    pub fn with_provider(
        mut self,
        id: impl Into<String>,
        kind: ProviderKind,
        provider: Arc<dyn Provider>,
    ) -> Self {
        self.register(id, kind, provider);
        self
    }

    pub fn with_default_model(mut self, model: ModelRef) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Get a specific provider by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).map(|r| r.provider.clone())
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Resolve a model reference. Fails only when the provider is not
    /// registered; unknown models get a synthesized descriptor.
    pub fn resolve(&self, model: &ModelRef) -> Result<ResolvedModel, ProviderError> {
        let registered = self
            .providers
            .get(&model.provider_id)
            .ok_or_else(|| ProviderError::NotConfigured(model.provider_id.clone()))?;
        Ok(ResolvedModel {
            info: self.catalog.resolve(model),
            provider: registered.provider.clone(),
            quirks: VendorQuirks::for_provider(registered.kind, &model.provider_id),
        })
    }

    /// The configured default model, else the preferred model of the first
    /// well-known provider that is registered.
    pub fn default_model(&self) -> Option<ModelRef> {
        if let Some(model) = &self.default_model {
            return Some(model.clone());
        }
        ["anthropic", "openai", "openrouter"]
            .into_iter()
            .filter(|id| self.providers.contains_key(*id))
            .find_map(ModelCatalog::preferred)
    }

    /// List all registered provider ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

/// Build the registry from configuration. Providers without an API key are
/// skipped, except local endpoints that never need one.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRegistry, ProviderError> {
    let mut catalog = ModelCatalog::builtin();
    catalog.apply_overrides(config);

    let mut registry = ProviderRegistry::new(catalog);
    registry.default_model = config
        .default_model()
        .map_err(|e| ProviderError::NotConfigured(e.to_string()))?;

    let mut ids: Vec<&String> = config.providers.keys().collect();
    ids.sort();
    for id in ids {
        let provider_config = &config.providers[id];
        let kind = provider_config.kind_for(id);
        let api_key = match (&provider_config.api_key, is_local(id)) {
            (Some(key), _) => key.clone(),
            (None, true) => String::new(),
            (None, false) => {
                debug!(provider = %id, "Skipping provider without API key");
                continue;
            }
        };

        let provider: Arc<dyn Provider> = match kind {
            ProviderKind::Anthropic => {
                let mut p = AnthropicProvider::new(&api_key)?.with_name(id.as_str());
                if let Some(url) = &provider_config.api_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            ProviderKind::OpenAi => {
                let base_url = provider_config
                    .api_url
                    .clone()
                    .unwrap_or_else(|| default_base_url(id));
                Arc::new(OpenAiCompatProvider::new(id.as_str(), base_url, api_key)?)
            }
        };
        registry.register(id.clone(), kind, provider);
    }

    info!(providers = ?registry.list(), "Providers configured");
    Ok(registry)
}

fn is_local(provider_id: &str) -> bool {
    matches!(provider_id, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet_config::ProviderConfig;

    fn with_key(key: &str) -> ProviderConfig {
        ProviderConfig {
            api_key: Some(key.into()),
            ..Default::default()
        }
    }

    #[test]
    fn register_and_resolve() {
        let registry = ProviderRegistry::default().with_provider(
            "openrouter",
            ProviderKind::OpenAi,
            Arc::new(OpenAiCompatProvider::openrouter("sk-test").unwrap()),
        );

        let resolved = registry
            .resolve(&ModelRef::new("openrouter", "anthropic/claude-sonnet-4"))
            .unwrap();
        assert_eq!(resolved.provider.name(), "openrouter");
        assert_eq!(resolved.info.context_limit, 200_000);
        assert!(!resolved.quirks.drop_empty_content);

        let err = registry
            .resolve(&ModelRef::new("nonexistent", "x"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(id) if id == "nonexistent"));
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config_is_empty() {
        let registry = build_from_config(&AppConfig::default()).unwrap();
        assert!(registry.list().is_empty());
        assert!(registry.default_model().is_none());
    }

    #[test]
    fn build_registers_keyed_and_local_providers() {
        let mut config = AppConfig::default();
        config.providers.insert("anthropic".into(), with_key("sk-ant"));
        config.providers.insert("openai".into(), ProviderConfig::default());
        config.providers.insert("ollama".into(), ProviderConfig::default());

        let registry = build_from_config(&config).unwrap();
        assert_eq!(registry.list(), vec!["anthropic", "ollama"]);

        let resolved = registry
            .resolve(&ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
            .unwrap();
        assert!(resolved.quirks.requires_tools_with_history);
        assert_eq!(
            registry.default_model(),
            Some(ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
        );
    }

    #[test]
    fn configured_default_model_wins() {
        let mut config = AppConfig::default();
        config.model = Some("openai/gpt-4o".into());
        config.providers.insert("anthropic".into(), with_key("sk-ant"));
        config.providers.insert("openai".into(), with_key("sk-oai"));

        let registry = build_from_config(&config).unwrap();
        assert_eq!(registry.default_model(), Some(ModelRef::new("openai", "gpt-4o")));
    }
}
