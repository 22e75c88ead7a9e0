pub mod config_cmd;
pub mod models;
pub mod run;
pub mod session;

use std::sync::Arc;

use anyhow::Context;
use rivet_config::{AppConfig, StorageBackend};
use rivet_core::store::MessageStore;
use rivet_store::{FileStore, InMemoryStore, SqliteStore};

/// Open the message store selected in the configuration.
pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    let path = config.storage.resolved_path(&AppConfig::config_dir());
    let store: Arc<dyn MessageStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::File => Arc::new(
            FileStore::open(&path)
                .with_context(|| format!("opening file store at {}", path.display()))?,
        ),
        StorageBackend::Sqlite => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            Arc::new(
                SqliteStore::new(&format!("sqlite://{}", path.display()))
                    .await
                    .context("opening SQLite store")?,
            )
        }
    };
    tracing::debug!(backend = store.name(), path = %path.display(), "Store opened");
    Ok(store)
}
