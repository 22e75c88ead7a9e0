//! In-memory backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use rivet_core::error::StoreError;
use rivet_core::message::{MessageInfo, MessageWithParts, Part};
use rivet_core::session::Session;
use rivet_core::store::MessageStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, MessageInfo>,
    /// session id → message ids (ascending)
    session_messages: HashMap<String, BTreeSet<String>>,
    /// message id → part id → part (ascending)
    parts: HashMap<String, BTreeMap<String, Part>>,
}

impl State {
    fn remove_message(&mut self, id: &str) -> bool {
        let Some(info) = self.messages.remove(id) else {
            return false;
        };
        if let Some(ids) = self.session_messages.get_mut(info.session_id()) {
            ids.remove(id);
        }
        self.parts.remove(id);
        true
    }
}

/// A store that keeps everything in process memory.
/// Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self.state.read().await.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.time.updated.cmp(&a.time.updated).then_with(|| b.id.cmp(&a.id)));
        Ok(sessions)
    }

    async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let existed = state.sessions.remove(id).is_some();
        for message_id in state.session_messages.remove(id).unwrap_or_default() {
            state.messages.remove(&message_id);
            state.parts.remove(&message_id);
        }
        Ok(existed)
    }

    async fn save_message(&self, info: &MessageInfo) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .session_messages
            .entry(info.session_id().to_string())
            .or_default()
            .insert(info.id().to_string());
        state.messages.insert(info.id().to_string(), info.clone());
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageInfo>, StoreError> {
        Ok(self.state.read().await.messages.get(id).cloned())
    }

    async fn message_ids(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .session_messages
            .get(session_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_message(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.state.write().await.remove_message(id))
    }

    async fn insert_message(&self, message: &MessageWithParts) -> Result<(), StoreError> {
        let info = &message.info;
        let mut state = self.state.write().await;
        state
            .session_messages
            .entry(info.session_id().to_string())
            .or_default()
            .insert(info.id().to_string());
        state.messages.insert(info.id().to_string(), info.clone());
        let parts = state.parts.entry(info.id().to_string()).or_default();
        for part in &message.parts {
            parts.insert(part.id.clone(), part.clone());
        }
        Ok(())
    }

    async fn write_part(&self, part: &Part) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .parts
            .entry(part.message_id.clone())
            .or_default()
            .insert(part.id.clone(), part.clone());
        Ok(())
    }

    async fn get_part(&self, message_id: &str, part_id: &str) -> Result<Option<Part>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .parts
            .get(message_id)
            .and_then(|parts| parts.get(part_id))
            .cloned())
    }

    async fn list_parts(&self, message_id: &str) -> Result<Vec<Part>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .parts
            .get(message_id)
            .map(|parts| parts.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn message_lifecycle() {
        testing::message_lifecycle(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn part_rules() {
        testing::part_rules(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn settlement_is_terminal() {
        testing::settlement_is_terminal(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn stream_is_newest_first() {
        testing::stream_is_newest_first(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn session_cascade() {
        testing::session_cascade(&InMemoryStore::new()).await;
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryStore::new();
        let other = store.clone();
        let session = store.create_session(Some("shared".into())).await.unwrap();
        assert!(other.get_session(&session.id).await.unwrap().is_some());
    }
}
