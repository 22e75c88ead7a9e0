//! MessageStore trait: durable persistence of sessions, messages and parts.
//!
//! Backends implement a handful of storage primitives; the lifecycle
//! operations (create, settle, upsert with state checks) are provided on top
//! of them so every backend enforces the same rules:
//!
//! - parts belong to an existing message and are ordered by ascending id
//! - tool part states only move forward
//! - a settled assistant message accepts no further completion or part writes

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::StoreError;
use crate::message::{
    AssistantMessage, Completion, MessageError, MessageInfo, MessageWithParts, Part, PartKind,
    UserMessage,
};
use crate::session::Session;

type StoreResult<T> = std::result::Result<T, StoreError>;

enum Cursor {
    Start,
    Remaining(Vec<String>),
    Done,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Backend name for logging (e.g., "memory", "file", "sqlite").
    fn name(&self) -> &str;

    // --- Storage primitives ---

    async fn save_session(&self, session: &Session) -> StoreResult<()>;

    async fn get_session(&self, id: &str) -> StoreResult<Option<Session>>;

    /// All sessions, most recently updated first.
    async fn list_sessions(&self) -> StoreResult<Vec<Session>>;

    /// Delete a session with all its messages and parts.
    async fn delete_session(&self, id: &str) -> StoreResult<bool>;

    /// Upsert a message header.
    async fn save_message(&self, info: &MessageInfo) -> StoreResult<()>;

    async fn get_message(&self, id: &str) -> StoreResult<Option<MessageInfo>>;

    /// Message ids of a session in ascending (creation) order.
    async fn message_ids(&self, session_id: &str) -> StoreResult<Vec<String>>;

    /// Delete a message and its parts.
    async fn delete_message(&self, id: &str) -> StoreResult<bool>;

    /// Persist a header and its initial parts as one unit.
    async fn insert_message(&self, message: &MessageWithParts) -> StoreResult<()>;

    /// Raw part upsert, no lifecycle checks.
    async fn write_part(&self, part: &Part) -> StoreResult<()>;

    async fn get_part(&self, message_id: &str, part_id: &str) -> StoreResult<Option<Part>>;

    /// Parts of a message in ascending id order.
    async fn list_parts(&self, message_id: &str) -> StoreResult<Vec<Part>>;

    // --- Sessions ---

    async fn create_session(&self, title: Option<String>) -> StoreResult<Session> {
        let session = Session::new(title.unwrap_or_else(Session::default_title));
        self.save_session(&session).await?;
        tracing::debug!(session_id = %session.id, backend = self.name(), "Session created");
        Ok(session)
    }

    // --- Messages ---

    async fn get_message_with_parts(&self, id: &str) -> StoreResult<Option<MessageWithParts>> {
        let Some(info) = self.get_message(id).await? else {
            return Ok(None);
        };
        let parts = self.list_parts(id).await?;
        Ok(Some(MessageWithParts { info, parts }))
    }

    /// All messages of a session, oldest first.
    async fn list_messages(&self, session_id: &str) -> StoreResult<Vec<MessageWithParts>> {
        let mut out = Vec::new();
        for id in self.message_ids(session_id).await? {
            if let Some(message) = self.get_message_with_parts(&id).await? {
                out.push(message);
            }
        }
        Ok(out)
    }

    /// Lazily stream a session's messages, newest first. Each call starts over.
    fn stream_messages<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxStream<'a, StoreResult<MessageWithParts>> {
        stream::unfold(Cursor::Start, move |cursor| async move {
            let mut ids = match cursor {
                Cursor::Start => match self.message_ids(session_id).await {
                    Ok(ids) => ids,
                    Err(e) => return Some((Err(e), Cursor::Done)),
                },
                Cursor::Remaining(ids) => ids,
                Cursor::Done => return None,
            };
            loop {
                let id = ids.pop()?;
                match self.get_message_with_parts(&id).await {
                    Ok(Some(message)) => return Some((Ok(message), Cursor::Remaining(ids))),
                    // deleted since the id list was taken
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e), Cursor::Remaining(ids))),
                }
            }
        })
        .boxed()
    }

    async fn create_user_message(
        &self,
        info: UserMessage,
        parts: Vec<PartKind>,
    ) -> StoreResult<MessageWithParts> {
        if self.get_session(&info.session_id).await?.is_none() {
            return Err(StoreError::not_found("session", &info.session_id));
        }
        let parts = parts
            .into_iter()
            .map(|kind| Part::new(&info.session_id, &info.id, kind))
            .collect();
        let message = MessageWithParts {
            info: MessageInfo::User(info),
            parts,
        };
        self.insert_message(&message).await?;
        Ok(message)
    }

    async fn create_assistant_message(&self, info: AssistantMessage) -> StoreResult<AssistantMessage> {
        match self.get_message(&info.parent_id).await? {
            Some(MessageInfo::User(parent)) if parent.session_id == info.session_id => {}
            Some(_) => {
                return Err(StoreError::invalid_state(
                    &info.parent_id,
                    "parent is not a user message of this session",
                ));
            }
            None => return Err(StoreError::not_found("message", &info.parent_id)),
        }
        self.insert_message(&MessageWithParts {
            info: MessageInfo::Assistant(info.clone()),
            parts: Vec::new(),
        })
        .await?;
        Ok(info)
    }

    /// Settle an in-flight assistant message successfully.
    async fn complete_assistant_message(
        &self,
        id: &str,
        completion: Completion,
    ) -> StoreResult<AssistantMessage> {
        let mut msg = self.in_flight_assistant(id).await?;
        msg.cost = completion.cost;
        msg.tokens = completion.tokens;
        msg.finish = completion.finish;
        msg.summary = completion.summary;
        msg.time.completed = Some(Utc::now());
        self.save_message(&MessageInfo::Assistant(msg.clone())).await?;
        Ok(msg)
    }

    /// Settle an in-flight assistant message into an error state.
    async fn set_assistant_message_error(
        &self,
        id: &str,
        error: MessageError,
    ) -> StoreResult<AssistantMessage> {
        let mut msg = self.in_flight_assistant(id).await?;
        msg.error = Some(error);
        msg.time.completed = Some(Utc::now());
        self.save_message(&MessageInfo::Assistant(msg.clone())).await?;
        Ok(msg)
    }

    /// Fetch an assistant message that has not been settled yet.
    async fn in_flight_assistant(&self, id: &str) -> StoreResult<AssistantMessage> {
        match self.get_message(id).await? {
            None => Err(StoreError::not_found("message", id)),
            Some(MessageInfo::User(_)) => {
                Err(StoreError::invalid_state(id, "not an assistant message"))
            }
            Some(MessageInfo::Assistant(msg)) if msg.is_settled() => {
                Err(StoreError::invalid_state(id, "assistant message already settled"))
            }
            Some(MessageInfo::Assistant(msg)) => Ok(msg),
        }
    }

    /// Delete every message of a session, keeping the session itself.
    async fn delete_session_messages(&self, session_id: &str) -> StoreResult<usize> {
        let mut deleted = 0;
        for id in self.message_ids(session_id).await? {
            if self.delete_message(&id).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // --- Parts ---

    /// Idempotent upsert by part id with lifecycle checks.
    async fn save_part(&self, part: &Part) -> StoreResult<()> {
        match self.get_message(&part.message_id).await? {
            None => return Err(StoreError::not_found("message", &part.message_id)),
            Some(MessageInfo::Assistant(msg)) if msg.is_settled() => {
                return Err(StoreError::invalid_state(
                    &part.id,
                    format!("message {} is already settled", msg.id),
                ));
            }
            Some(info) if info.session_id() != part.session_id => {
                return Err(StoreError::invalid_state(&part.id, "session id mismatch"));
            }
            Some(_) => {}
        }

        if let (Some(existing), PartKind::Tool(next)) =
            (self.get_part(&part.message_id, &part.id).await?, &part.kind)
        {
            match &existing.kind {
                PartKind::Tool(prev) if !prev.state.can_transition_to(&next.state) => {
                    return Err(StoreError::invalid_state(
                        &part.id,
                        format!(
                            "tool state cannot move from {} to {}",
                            prev.state.status(),
                            next.state.status()
                        ),
                    ));
                }
                PartKind::Tool(_) => {}
                _ => return Err(StoreError::invalid_state(&part.id, "part kind changed")),
            }
        }

        self.write_part(part).await
    }

    /// Create a new part with a fresh id on `message_id`.
    async fn add_part(
        &self,
        session_id: &str,
        message_id: &str,
        kind: PartKind,
    ) -> StoreResult<Part> {
        let part = Part::new(session_id, message_id, kind);
        self.save_part(&part).await?;
        Ok(part)
    }

    async fn update_part(&self, part: &Part) -> StoreResult<()> {
        self.save_part(part).await
    }
}
