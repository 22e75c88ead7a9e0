//! File-based backend: one JSON document per entity.
//!
//! Layout under the root directory:
//!
//! ```text
//! session/<session_id>.json
//! message/<session_id>/<message_id>.json
//! part/<message_id>/<part_id>.json
//! ```
//!
//! Ids sort by creation time, so a directory listing sorted by file name is
//! already in creation order. Writes go to a temporary file first and are
//! renamed into place; an unchanged document is not rewritten.
//!
//! Storage location: `~/.rivet/storage`

use async_trait::async_trait;
use rivet_core::error::StoreError;
use rivet_core::message::{MessageInfo, MessageWithParts, Part};
use rivet_core::session::Session;
use rivet_core::store::MessageStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

fn io_err(context: &str, path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Storage(format!("{context} {}: {e}", path.display()))
}

/// A JSON-file tree store.
///
/// Message → session ownership is indexed in memory at open time so single
/// message lookups don't scan the tree.
pub struct FileStore {
    root: PathBuf,
    index: Arc<RwLock<HashMap<String, String>>>,
}

impl FileStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in ["session", "message", "part"] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| io_err("Failed to create", &path, e))?;
        }
        let index = Self::build_index(&root)?;
        debug!(root = %root.display(), messages = index.len(), "File store opened");
        Ok(Self {
            root,
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Default path: `~/.rivet/storage`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".rivet").join("storage")
    }

    fn build_index(root: &Path) -> Result<HashMap<String, String>, StoreError> {
        let mut index = HashMap::new();
        let messages = root.join("message");
        let sessions = std::fs::read_dir(&messages).map_err(|e| io_err("Failed to list", &messages, e))?;
        for session_dir in sessions.flatten() {
            let session_id = session_dir.file_name().to_string_lossy().into_owned();
            let Ok(entries) = std::fs::read_dir(session_dir.path()) else {
                warn!(session_id = %session_id, "Skipping unreadable message directory");
                continue;
            };
            for entry in entries.flatten() {
                if let Some(id) = json_stem(&entry.path()) {
                    index.insert(id, session_id.clone());
                }
            }
        }
        Ok(index)
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.root.join("session").join(format!("{id}.json"))
    }

    fn message_dir(&self, session_id: &str) -> PathBuf {
        self.root.join("message").join(session_id)
    }

    fn message_path(&self, session_id: &str, id: &str) -> PathBuf {
        self.message_dir(session_id).join(format!("{id}.json"))
    }

    fn part_dir(&self, message_id: &str) -> PathBuf {
        self.root.join("part").join(message_id)
    }

    fn part_path(&self, message_id: &str, id: &str) -> PathBuf {
        self.part_dir(message_id).join(format!("{id}.json"))
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Ok(existing) = tokio::fs::read(path).await {
            if existing == bytes {
                return Ok(());
            }
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("Failed to create", parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_err("Failed to write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_err("Failed to rename", path, e))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err("Failed to read", path, e)),
        }
    }

    /// `*.json` file stems in `dir`, sorted ascending.
    async fn list_ids(&self, dir: &Path) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("Failed to list", dir, e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err("Failed to list", dir, e))?
        {
            if let Some(id) = json_stem(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn remove_file(&self, path: &Path) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("Failed to remove", path, e)),
        }
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("Failed to remove", path, e)),
        }
    }

    async fn session_of(&self, message_id: &str) -> Option<String> {
        self.index.read().await.get(message_id).cloned()
    }
}

fn json_stem(path: &Path) -> Option<String> {
    if path.extension()? != "json" {
        return None;
    }
    Some(path.file_stem()?.to_string_lossy().into_owned())
}

#[async_trait]
impl MessageStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.write_json(&self.session_path(&session.id), session).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        self.read_json(&self.session_path(id)).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions = Vec::new();
        for id in self.list_ids(&self.root.join("session")).await? {
            match self.get_session(&id).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) => warn!(session_id = %id, error = %e, "Skipping corrupted session"),
            }
        }
        sessions.sort_by(|a, b| b.time.updated.cmp(&a.time.updated).then_with(|| b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let existed = self.remove_file(&self.session_path(id)).await?;
        let message_ids = self.list_ids(&self.message_dir(id)).await?;
        for message_id in &message_ids {
            self.remove_dir(&self.part_dir(message_id)).await?;
        }
        self.remove_dir(&self.message_dir(id)).await?;
        let mut index = self.index.write().await;
        for message_id in &message_ids {
            index.remove(message_id);
        }
        debug!(session_id = %id, messages = message_ids.len(), "Session deleted");
        Ok(existed)
    }

    async fn save_message(&self, info: &MessageInfo) -> Result<(), StoreError> {
        self.write_json(&self.message_path(info.session_id(), info.id()), info)
            .await?;
        self.index
            .write()
            .await
            .insert(info.id().to_string(), info.session_id().to_string());
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageInfo>, StoreError> {
        let Some(session_id) = self.session_of(id).await else {
            return Ok(None);
        };
        self.read_json(&self.message_path(&session_id, id)).await
    }

    async fn message_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        self.list_ids(&self.message_dir(session_id)).await
    }

    async fn delete_message(&self, id: &str) -> Result<bool, StoreError> {
        let Some(session_id) = self.session_of(id).await else {
            return Ok(false);
        };
        self.remove_dir(&self.part_dir(id)).await?;
        let removed = self.remove_file(&self.message_path(&session_id, id)).await?;
        self.index.write().await.remove(id);
        Ok(removed)
    }

    async fn insert_message(&self, message: &MessageWithParts) -> Result<(), StoreError> {
        // Parts first so a visible header always has its initial parts.
        for part in &message.parts {
            self.write_part(part).await?;
        }
        self.save_message(&message.info).await
    }

    async fn write_part(&self, part: &Part) -> Result<(), StoreError> {
        self.write_json(&self.part_path(&part.message_id, &part.id), part)
            .await
    }

    async fn get_part(&self, message_id: &str, part_id: &str) -> Result<Option<Part>, StoreError> {
        self.read_json(&self.part_path(message_id, part_id)).await
    }

    async fn list_parts(&self, message_id: &str) -> Result<Vec<Part>, StoreError> {
        let dir = self.part_dir(message_id);
        let mut parts = Vec::new();
        for id in self.list_ids(&dir).await? {
            if let Some(part) = self.read_json::<Part>(&dir.join(format!("{id}.json"))).await? {
                parts.push(part);
            }
        }
        Ok(parts)
    }
}
