//! `rivet models`: list the model catalog with configured overrides.

use anyhow::Context;
use rivet_config::AppConfig;
use rivet_core::provider::ModelInfo;
use rivet_providers::ModelCatalog;

pub fn run(provider: Option<&str>) -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    let mut catalog = ModelCatalog::builtin();
    catalog.apply_overrides(&config);

    let models = catalog.list(provider);
    if models.is_empty() {
        println!("No models known for {}", provider.unwrap_or("any provider"));
        return Ok(());
    }
    for model in &models {
        let marker = if config.has_api_key(&model.provider_id) {
            "*"
        } else {
            " "
        };
        println!("{marker} {}", describe(model));
    }
    println!("\n* provider has an API key configured");
    Ok(())
}

fn describe(model: &ModelInfo) -> String {
    format!(
        "{:<48} ctx {:>7}  out {:>6}  ${}/${} per Mtok{}",
        model.model_ref().to_string(),
        model.context_limit,
        model.output_limit,
        model.cost.input,
        model.cost.output,
        if model.reasoning { "  reasoning" } else { "" }
    )
}
