//! `rivet config`: configuration file management.

use std::path::Path;

use anyhow::{Context, bail};
use clap::Subcommand;
use rivet_config::AppConfig;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration with secrets masked
    Show,

    /// Print the config file location
    Path,
}

pub fn run(command: ConfigCommand) -> anyhow::Result<()> {
    let dir = AppConfig::config_dir();
    match command {
        ConfigCommand::Init { force } => {
            let path = init(&dir, force)?;
            println!("Wrote {}", path.display());
            println!("Set ANTHROPIC_API_KEY (or OPENAI_API_KEY / OPENROUTER_API_KEY) to get started.");
        }
        ConfigCommand::Show => {
            let config = AppConfig::load().context("loading configuration")?;
            print!("{}", masked_toml(&config)?);
        }
        ConfigCommand::Path => println!("{}", dir.join("config.toml").display()),
    }
    Ok(())
}

fn init(dir: &Path, force: bool) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join("config.toml");
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn masked_toml(config: &AppConfig) -> anyhow::Result<String> {
    let mut config = config.clone();
    for provider in config.providers.values_mut() {
        if let Some(key) = &provider.api_key {
            let tail: String = key.chars().skip(key.chars().count().saturating_sub(4)).collect();
            provider.api_key = Some(format!("****{tail}"));
        }
    }
    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet_config::ProviderConfig;

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = init(dir.path(), false).unwrap();
        let written = AppConfig::load_from(&path).unwrap();
        assert!(written.default_model().unwrap().is_some());

        assert!(init(dir.path(), false).is_err());
        assert!(init(dir.path(), true).is_ok());
    }

    #[test]
    fn show_masks_api_keys() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("sk-ant-secret-1234".into()),
                ..Default::default()
            },
        );
        let shown = masked_toml(&config).unwrap();
        assert!(shown.contains("****1234"));
        assert!(!shown.contains("secret"));
    }
}
