//! Session export and import.
//!
//! An export is a self-contained `{metadata, messages: [{info, parts}]}`
//! document. Importing never overwrites: the session, every message and every
//! part get fresh ids, and assistant parent links are remapped.

use chrono::Utc;
use rivet_core::error::StoreError;
use rivet_core::id::{self, IdKind};
use rivet_core::message::{MessageInfo, MessageWithParts, Part};
use rivet_core::session::{EXPORT_VERSION, ExportMetadata, Session, SessionExport};
use rivet_core::store::MessageStore;
use std::collections::HashMap;
use tracing::info;

/// Snapshot a session with all its messages, oldest first.
pub async fn export_session(
    store: &dyn MessageStore,
    session_id: &str,
) -> Result<SessionExport, StoreError> {
    let session = store
        .get_session(session_id)
        .await?
        .ok_or_else(|| StoreError::not_found("session", session_id))?;
    let messages = store.list_messages(session_id).await?;
    Ok(SessionExport {
        metadata: ExportMetadata {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            session,
        },
        messages,
    })
}

/// Recreate an exported session under a fresh id and return it.
pub async fn import_session(
    store: &dyn MessageStore,
    export: SessionExport,
) -> Result<Session, StoreError> {
    if export.metadata.version > EXPORT_VERSION {
        return Err(StoreError::invalid_state(
            &export.metadata.session.id,
            format!("unsupported export version {}", export.metadata.version),
        ));
    }

    let now = Utc::now();
    let mut session = export.metadata.session;
    let original_id = std::mem::replace(&mut session.id, id::ascending(IdKind::Session));
    session.time.created = now;
    session.time.updated = now;
    store.save_session(&session).await?;

    let mut messages = export.messages;
    messages.sort_by(|a, b| a.info.id().cmp(b.info.id()));

    let mut remapped: HashMap<String, String> = HashMap::new();
    for message in messages {
        let new_id = id::ascending(IdKind::Message);
        remapped.insert(message.info.id().to_string(), new_id.clone());

        let info = match message.info {
            MessageInfo::User(mut user) => {
                user.id = new_id.clone();
                user.session_id = session.id.clone();
                MessageInfo::User(user)
            }
            MessageInfo::Assistant(mut assistant) => {
                assistant.parent_id = remapped
                    .get(&assistant.parent_id)
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::invalid_state(
                            &assistant.id,
                            format!("parent {} missing from export", assistant.parent_id),
                        )
                    })?;
                assistant.id = new_id.clone();
                assistant.session_id = session.id.clone();
                MessageInfo::Assistant(assistant)
            }
        };

        let parts = message
            .parts
            .into_iter()
            .map(|part| Part::new(&session.id, &new_id, part.kind))
            .collect();

        store.insert_message(&MessageWithParts { info, parts }).await?;
    }

    info!(
        from = %original_id,
        session_id = %session.id,
        messages = remapped.len(),
        "Session imported"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use chrono::Duration;
    use rivet_core::message::{
        AssistantMessage, Completion, FilePart, PartKind, ToolPart, ToolState, ToolTime,
        UserMessage,
    };
    use rivet_core::session::ModelRef;
    use serde_json::json;

    fn tool_part(call_id: &str, tool: &str, state: ToolState) -> PartKind {
        PartKind::Tool(ToolPart {
            call_id: call_id.into(),
            tool: tool.into(),
            state,
        })
    }

    async fn populated(store: &InMemoryStore) -> String {
        let model = ModelRef::new("anthropic", "claude-sonnet-4");
        let session = store.create_session(Some("export me".into())).await.unwrap();
        let user = store
            .create_user_message(
                UserMessage::new(&session.id, "build", model.clone()),
                vec![
                    PartKind::text("What is in notes.md?"),
                    PartKind::File(FilePart {
                        mime: "text/markdown".into(),
                        url: "file:///work/notes.md".into(),
                        filename: Some("notes.md".into()),
                        source: None,
                    }),
                ],
            )
            .await
            .unwrap();
        let assistant = store
            .create_assistant_message(AssistantMessage::new(&session.id, user.info.id(), &model, "build"))
            .await
            .unwrap();
        let start = Utc::now();
        let time = ToolTime {
            start,
            end: start + Duration::milliseconds(40),
        };
        let parts = [
            PartKind::text("Reading it now."),
            tool_part(
                "toolu_01",
                "read",
                ToolState::Completed {
                    input: json!({"path": "notes.md"}),
                    output: "1\t# Notes\n2\tcafé ☕".into(),
                    title: "notes.md".into(),
                    metadata: json!({"lines": 2}).as_object().cloned().unwrap(),
                    time: time.clone(),
                    attachments: vec![],
                },
            ),
            tool_part(
                "toolu_02",
                "read",
                ToolState::Error {
                    input: json!({"path": "missing.md"}),
                    error: "file not found: missing.md".into(),
                    time,
                },
            ),
        ];
        for kind in parts {
            store.add_part(&session.id, &assistant.id, kind).await.unwrap();
        }
        store
            .complete_assistant_message(&assistant.id, Completion::default())
            .await
            .unwrap();
        session.id
    }

    #[tokio::test]
    async fn round_trip_under_fresh_ids() {
        let store = InMemoryStore::new();
        let session_id = populated(&store).await;

        let export = export_session(&store, &session_id).await.unwrap();
        let json = serde_json::to_string(&export).unwrap();
        let parsed: SessionExport = serde_json::from_str(&json).unwrap();

        let imported = import_session(&store, parsed).await.unwrap();
        assert_ne!(imported.id, session_id);
        assert_eq!(imported.title, "export me");

        let original = store.list_messages(&session_id).await.unwrap();
        let copy = store.list_messages(&imported.id).await.unwrap();
        assert_eq!(copy.len(), original.len());

        for (a, b) in original.iter().zip(&copy) {
            assert_ne!(a.info.id(), b.info.id());
            assert_eq!(a.info.role(), b.info.role());
            assert_eq!(a.parts.len(), b.parts.len());
            for (pa, pb) in a.parts.iter().zip(&b.parts) {
                assert_ne!(pa.id, pb.id);
                assert_eq!(pa.kind, pb.kind);
                assert_eq!(pb.session_id, imported.id);
                assert_eq!(pb.message_id, b.info.id());
            }
        }
        assert_eq!(copy[0].parts.len(), 2);

        let call_ids: Vec<_> = copy[1]
            .parts
            .iter()
            .filter_map(|p| p.as_tool())
            .map(|t| (t.call_id.as_str(), t.state.status()))
            .collect();
        assert_eq!(call_ids, [("toolu_01", "completed"), ("toolu_02", "error")]);

        let user_id = copy[0].info.id();
        let assistant = copy[1].info.as_assistant().unwrap();
        assert_eq!(assistant.parent_id, user_id);
        assert!(assistant.is_settled());
    }

    #[tokio::test]
    async fn export_missing_session_is_not_found() {
        let store = InMemoryStore::new();
        let err = export_session(&store, "ses_missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn future_version_rejected() {
        let store = InMemoryStore::new();
        let session_id = populated(&store).await;
        let mut export = export_session(&store, &session_id).await.unwrap();
        export.metadata.version = EXPORT_VERSION + 1;
        assert!(import_session(&store, export).await.is_err());
    }
}
