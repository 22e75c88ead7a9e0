//! Built-in model catalog.
//!
//! Limits and prices (USD per 1 million tokens) for common models. Entries can
//! be overridden or added from the `[providers.<id>.models]` config tables.
//! Lookups fall back to prefix matching so dated ids such as
//! `claude-sonnet-4-20250514` resolve to the `claude-sonnet-4` entry.

use rivet_config::AppConfig;
use rivet_core::provider::{ModelCost, ModelInfo, guess_family};
use rivet_core::session::ModelRef;
use std::collections::HashMap;

/// Catalog of known models keyed by `provider/model`.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<String, ModelInfo>,
}

fn entry(
    provider_id: &str,
    id: &str,
    context_limit: u32,
    output_limit: u32,
    reasoning: bool,
    cost: (f64, f64, f64, f64),
) -> ModelInfo {
    ModelInfo {
        provider_id: provider_id.into(),
        id: id.into(),
        family: guess_family(id).into(),
        context_limit,
        output_limit,
        reasoning,
        cost: ModelCost {
            input: cost.0,
            output: cost.1,
            cache_read: cost.2,
            cache_write: cost.3,
        },
    }
}

impl ModelCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in entries.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();

        // ── Anthropic ──────────────────────────────────────────────
        for (id, output, reasoning, cost) in [
            ("claude-opus-4-1", 32_000, true, (15.0, 75.0, 1.5, 18.75)),
            ("claude-opus-4", 32_000, true, (15.0, 75.0, 1.5, 18.75)),
            ("claude-sonnet-4-5", 64_000, true, (3.0, 15.0, 0.3, 3.75)),
            ("claude-sonnet-4", 64_000, true, (3.0, 15.0, 0.3, 3.75)),
            ("claude-3-7-sonnet", 64_000, true, (3.0, 15.0, 0.3, 3.75)),
            ("claude-3-5-haiku", 8_192, false, (0.8, 4.0, 0.08, 1.0)),
        ] {
            catalog.insert(entry("anthropic", id, 200_000, output, reasoning, cost));
        }

        // ── OpenAI ─────────────────────────────────────────────────
        catalog.insert(entry("openai", "gpt-4.1", 1_047_576, 32_768, false, (2.0, 8.0, 0.5, 0.0)));
        catalog.insert(entry("openai", "gpt-4.1-mini", 1_047_576, 32_768, false, (0.4, 1.6, 0.1, 0.0)));
        catalog.insert(entry("openai", "gpt-4o", 128_000, 16_384, false, (2.5, 10.0, 1.25, 0.0)));
        catalog.insert(entry("openai", "gpt-4o-mini", 128_000, 16_384, false, (0.15, 0.6, 0.075, 0.0)));
        catalog.insert(entry("openai", "o3", 200_000, 100_000, true, (2.0, 8.0, 0.5, 0.0)));
        catalog.insert(entry("openai", "o4-mini", 200_000, 100_000, true, (1.1, 4.4, 0.275, 0.0)));

        // ── OpenRouter ─────────────────────────────────────────────
        catalog.insert(entry(
            "openrouter",
            "anthropic/claude-sonnet-4",
            200_000,
            64_000,
            true,
            (3.0, 15.0, 0.3, 3.75),
        ));
        catalog.insert(entry("openrouter", "openai/gpt-4.1", 1_047_576, 32_768, false, (2.0, 8.0, 0.5, 0.0)));
        catalog.insert(entry(
            "openrouter",
            "google/gemini-2.5-pro",
            1_048_576,
            65_536,
            true,
            (1.25, 10.0, 0.31, 0.0),
        ));

        catalog
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, info: ModelInfo) {
        self.models
            .insert(format!("{}/{}", info.provider_id, info.id), info);
    }

    /// Look up a model. Exact match first, then the longest catalog id the
    /// requested id starts with.
    pub fn get(&self, model: &ModelRef) -> Option<ModelInfo> {
        if let Some(info) = self.models.get(&model.to_string()) {
            return Some(info.clone());
        }

        self.models
            .values()
            .filter(|m| {
                m.provider_id == model.provider_id && model.model_id.starts_with(m.id.as_str())
            })
            .max_by_key(|m| m.id.len())
            .map(|m| ModelInfo {
                id: model.model_id.clone(),
                ..m.clone()
            })
    }

    /// Like [`get`](Self::get), but unknown models get a synthesized
    /// descriptor with conservative limits and zero cost.
    pub fn resolve(&self, model: &ModelRef) -> ModelInfo {
        self.get(model)
            .unwrap_or_else(|| ModelInfo::synthesized(model))
    }

    /// Apply `[providers.<id>.models.<model>]` overrides from config.
    pub fn apply_overrides(&mut self, config: &AppConfig) {
        for (provider_id, provider) in &config.providers {
            for (model_id, over) in &provider.models {
                let model = ModelRef::new(provider_id, model_id);
                let mut info = self.resolve(&model);
                if let Some(family) = &over.family {
                    info.family = family.clone();
                }
                if let Some(limit) = over.context_limit {
                    info.context_limit = limit;
                }
                if let Some(limit) = over.output_limit {
                    info.output_limit = limit;
                }
                if let Some(reasoning) = over.reasoning {
                    info.reasoning = reasoning;
                }
                if let Some(cost) = over.cost {
                    info.cost = cost;
                }
                self.insert(info);
            }
        }
    }

    /// Models, optionally restricted to one provider, sorted by reference.
    pub fn list(&self, provider_id: Option<&str>) -> Vec<ModelInfo> {
        let mut models: Vec<ModelInfo> = self
            .models
            .values()
            .filter(|m| provider_id.is_none_or(|p| m.provider_id == p))
            .cloned()
            .collect();
        models.sort_by(|a, b| (&a.provider_id, &a.id).cmp(&(&b.provider_id, &b.id)));
        models
    }

    /// The model to use for a provider when nothing else is configured.
    pub fn preferred(provider_id: &str) -> Option<ModelRef> {
        let model = match provider_id {
            "anthropic" => "claude-sonnet-4-20250514",
            "openai" => "gpt-4.1",
            "openrouter" => "anthropic/claude-sonnet-4",
            _ => return None,
        };
        Some(ModelRef::new(provider_id, model))
    }
}
