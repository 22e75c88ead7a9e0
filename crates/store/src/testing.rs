//! Behavior checks every backend must pass. Each backend's test module calls
//! these against a fresh instance.

use chrono::Utc;
use futures::StreamExt;
use rivet_core::error::StoreError;
use rivet_core::message::{
    AssistantMessage, Completion, MessageError, MessageInfo, PartKind, TextPart, TokenUsage,
    ToolPart, ToolStart, ToolState, ToolTime, UserMessage,
};
use rivet_core::session::ModelRef;
use rivet_core::store::MessageStore;

fn model() -> ModelRef {
    ModelRef::new("anthropic", "claude-sonnet-4")
}

async fn seed(store: &dyn MessageStore) -> (String, String, String) {
    let session = store.create_session(Some("test".into())).await.unwrap();
    let user = store
        .create_user_message(
            UserMessage::new(&session.id, "build", model()),
            vec![PartKind::text("hello")],
        )
        .await
        .unwrap();
    let assistant = store
        .create_assistant_message(AssistantMessage::new(&session.id, user.info.id(), &model(), "build"))
        .await
        .unwrap();
    (session.id, user.info.id().to_string(), assistant.id)
}

pub async fn message_lifecycle(store: &dyn MessageStore) {
    let (session_id, user_id, assistant_id) = seed(store).await;

    let user = store.get_message_with_parts(&user_id).await.unwrap().unwrap();
    assert_eq!(user.parts.len(), 1);
    assert_eq!(user.text(), "hello");

    let mut text = store
        .add_part(&session_id, &assistant_id, PartKind::text("Hel"))
        .await
        .unwrap();
    text.kind = PartKind::Text(TextPart::new("Hello"));
    store.update_part(&text).await.unwrap();
    store.update_part(&text).await.unwrap();

    let parts = store.list_parts(&assistant_id).await.unwrap();
    assert_eq!(parts.len(), 1, "update_part must be idempotent");
    assert_eq!(parts[0].as_text().unwrap().text, "Hello");

    let settled = store
        .complete_assistant_message(
            &assistant_id,
            Completion {
                cost: 0.5,
                tokens: TokenUsage {
                    input: 10,
                    output: 4,
                    ..Default::default()
                },
                finish: Some("stop".into()),
                summary: false,
            },
        )
        .await
        .unwrap();
    assert!(settled.is_settled());

    let stored = store.get_message(&assistant_id).await.unwrap().unwrap();
    let stored = stored.as_assistant().unwrap();
    assert_eq!(stored.tokens.input, 10);
    assert_eq!(stored.finish.as_deref(), Some("stop"));

    let missing = store
        .complete_assistant_message("msg_missing", Completion::default())
        .await
        .unwrap_err();
    assert!(matches!(missing, StoreError::NotFound { .. }));

    let wrong_role = store
        .complete_assistant_message(&user_id, Completion::default())
        .await
        .unwrap_err();
    assert!(matches!(wrong_role, StoreError::InvalidState { .. }));

    assert!(store.get_message("msg_missing").await.unwrap().is_none());
    assert!(store.get_message_with_parts("msg_missing").await.unwrap().is_none());
}

pub async fn part_rules(store: &dyn MessageStore) {
    let (session_id, _, assistant_id) = seed(store).await;

    let mut part = store
        .add_part(
            &session_id,
            &assistant_id,
            PartKind::Tool(ToolPart {
                call_id: "call_1".into(),
                tool: "read".into(),
                state: ToolState::Pending {
                    input: serde_json::json!({}),
                },
            }),
        )
        .await
        .unwrap();

    let start = Utc::now();
    part.kind = PartKind::Tool(ToolPart {
        call_id: "call_1".into(),
        tool: "read".into(),
        state: ToolState::Running {
            input: serde_json::json!({"path": "a.txt"}),
            title: None,
            metadata: None,
            time: ToolStart { start },
        },
    });
    store.update_part(&part).await.unwrap();

    let running = part.clone();
    part.kind = PartKind::Tool(ToolPart {
        call_id: "call_1".into(),
        tool: "read".into(),
        state: ToolState::Error {
            input: serde_json::json!({"path": "a.txt"}),
            error: "file not found".into(),
            time: ToolTime { start, end: Utc::now() },
        },
    });
    store.update_part(&part).await.unwrap();

    let regress = store.update_part(&running).await.unwrap_err();
    assert!(matches!(regress, StoreError::InvalidState { .. }));

    let stored = store.get_part(&assistant_id, &part.id).await.unwrap().unwrap();
    assert_eq!(stored.as_tool().unwrap().state.status(), "error");

    let orphan = store
        .add_part(&session_id, "msg_missing", PartKind::text("x"))
        .await
        .unwrap_err();
    assert!(matches!(orphan, StoreError::NotFound { .. }));
}

pub async fn settlement_is_terminal(store: &dyn MessageStore) {
    let (session_id, _, assistant_id) = seed(store).await;
    let part = store
        .add_part(&session_id, &assistant_id, PartKind::text("partial"))
        .await
        .unwrap();

    let settled = store
        .set_assistant_message_error(&assistant_id, MessageError::aborted())
        .await
        .unwrap();
    assert!(settled.is_settled());
    assert!(settled.error.as_ref().unwrap().is_aborted());

    let again = store
        .set_assistant_message_error(&assistant_id, MessageError::OutputLength)
        .await
        .unwrap_err();
    assert!(matches!(again, StoreError::InvalidState { .. }));

    let complete = store
        .complete_assistant_message(&assistant_id, Completion::default())
        .await
        .unwrap_err();
    assert!(matches!(complete, StoreError::InvalidState { .. }));

    let write = store.update_part(&part).await.unwrap_err();
    assert!(matches!(write, StoreError::InvalidState { .. }));

    // Partial output survives settlement.
    let parts = store.list_parts(&assistant_id).await.unwrap();
    assert_eq!(parts[0].as_text().unwrap().text, "partial");
}

pub async fn stream_is_newest_first(store: &dyn MessageStore) {
    let session = store.create_session(None).await.unwrap();
    let mut ids = Vec::new();
    for text in ["one", "two", "three"] {
        let message = store
            .create_user_message(
                UserMessage::new(&session.id, "build", model()),
                vec![PartKind::text(text)],
            )
            .await
            .unwrap();
        ids.push(message.info.id().to_string());
    }

    let streamed: Vec<String> = store
        .stream_messages(&session.id)
        .map(|m| m.unwrap().info.id().to_string())
        .collect()
        .await;
    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(streamed, expected);

    // Restartable, and lazy: taking one does not require reading the rest.
    let first = store.stream_messages(&session.id).next().await.unwrap().unwrap();
    assert_eq!(first.text(), "three");

    let listed: Vec<String> = store
        .list_messages(&session.id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.info.id().to_string())
        .collect();
    assert_eq!(listed, ids);
}

pub async fn session_cascade(store: &dyn MessageStore) {
    let (session_id, user_id, assistant_id) = seed(store).await;
    let (other_id, _, _) = seed(store).await;

    let mut first = store.get_session(&session_id).await.unwrap().unwrap();
    first.title = "renamed".into();
    first.time.updated = Utc::now() + chrono::Duration::seconds(1);
    store.save_session(&first).await.unwrap();

    let sessions = store.list_sessions().await.unwrap();
    assert_eq!(sessions[0].id, session_id, "most recently updated first");
    assert_eq!(sessions[0].title, "renamed");
    assert_eq!(sessions.len(), 2);

    assert!(store.delete_session(&session_id).await.unwrap());
    assert!(store.get_session(&session_id).await.unwrap().is_none());
    assert!(store.get_message(&user_id).await.unwrap().is_none());
    assert!(store.list_parts(&user_id).await.unwrap().is_empty());
    assert!(store.get_message(&assistant_id).await.unwrap().is_none());
    assert!(!store.delete_session(&session_id).await.unwrap());

    assert_eq!(store.delete_session_messages(&other_id).await.unwrap(), 2);
    assert!(store.message_ids(&other_id).await.unwrap().is_empty());
    assert!(store.get_session(&other_id).await.unwrap().is_some());

    let info = MessageInfo::User(UserMessage::new("ses_missing", "build", model()));
    let err = store
        .create_user_message(info.as_user().unwrap().clone(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}
