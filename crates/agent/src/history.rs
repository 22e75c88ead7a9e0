//! Rebuilds the model-facing conversation from stored messages.
//!
//! User turns carry their visible text (synthetic reminders included) and
//! file attachments. Assistant turns carry their text plus every settled tool
//! call, each followed by a tool-result turn. Reasoning, ignored text and
//! tool calls that never finished stay out of the prompt.

use rivet_core::message::{MessageInfo, MessageWithParts, PartKind, ToolState};
use rivet_core::provider::{ChatMessage, ChatPart, ChatToolCall};

pub fn to_chat_messages(history: &[MessageWithParts]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(history.len());
    for message in history {
        match &message.info {
            MessageInfo::User(_) => {
                if let Some(turn) = user_turn(message) {
                    out.push(turn);
                }
            }
            MessageInfo::Assistant(_) => out.extend(assistant_turns(message)),
        }
    }
    out
}

fn user_turn(message: &MessageWithParts) -> Option<ChatMessage> {
    let content: Vec<ChatPart> = message
        .parts
        .iter()
        .filter_map(|part| match &part.kind {
            PartKind::Text(t) if !t.ignored && !t.text.is_empty() => {
                Some(ChatPart::Text { text: t.text.clone() })
            }
            PartKind::File(f) => Some(ChatPart::File {
                mime: f.mime.clone(),
                url: f.url.clone(),
                filename: f.filename.clone(),
            }),
            _ => None,
        })
        .collect();
    (!content.is_empty()).then(|| ChatMessage::user_parts(content))
}

fn assistant_turns(message: &MessageWithParts) -> Vec<ChatMessage> {
    let mut text = String::new();
    let mut calls = Vec::new();
    let mut results = Vec::new();

    for part in &message.parts {
        match &part.kind {
            PartKind::Text(t) if !t.ignored => text.push_str(&t.text),
            PartKind::Tool(tool) => {
                let (output, is_error) = match &tool.state {
                    ToolState::Completed { output, .. } => (output.clone(), false),
                    ToolState::Error { error, .. } => (error.clone(), true),
                    ToolState::Pending { .. } | ToolState::Running { .. } => continue,
                };
                calls.push(ChatToolCall {
                    id: tool.call_id.clone(),
                    name: tool.tool.clone(),
                    input: tool.state.input().clone(),
                });
                results.push(ChatMessage::tool_result(
                    &tool.call_id,
                    &tool.tool,
                    output,
                    is_error,
                ));
            }
            _ => {}
        }
    }

    // Errored or aborted turns that produced nothing are dropped entirely.
    if text.is_empty() && calls.is_empty() {
        return Vec::new();
    }

    let mut turns = vec![ChatMessage::assistant(text).with_tool_calls(calls)];
    turns.extend(results);
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rivet_core::message::{
        AssistantMessage, FilePart, MessageError, Part, TextPart, ToolPart, ToolTime, UserMessage,
    };
    use rivet_core::provider::ChatRole;
    use rivet_core::session::ModelRef;
    use serde_json::json;

    fn model() -> ModelRef {
        ModelRef::new("anthropic", "claude-sonnet-4-20250514")
    }

    fn user(parts: Vec<PartKind>) -> MessageWithParts {
        let info = UserMessage::new("ses_1", "build", model());
        let parts = parts
            .into_iter()
            .map(|kind| Part::new("ses_1", &info.id, kind))
            .collect();
        MessageWithParts {
            info: MessageInfo::User(info),
            parts,
        }
    }

    fn assistant(parts: Vec<PartKind>) -> MessageWithParts {
        let info = AssistantMessage::new("ses_1", "msg_parent", &model(), "build");
        let parts = parts
            .into_iter()
            .map(|kind| Part::new("ses_1", &info.id, kind))
            .collect();
        MessageWithParts {
            info: MessageInfo::Assistant(info),
            parts,
        }
    }

    fn tool(call_id: &str, state: ToolState) -> PartKind {
        PartKind::Tool(ToolPart {
            call_id: call_id.into(),
            tool: "read".into(),
            state,
        })
    }

    fn finished() -> ToolTime {
        ToolTime {
            start: Utc::now(),
            end: Utc::now(),
        }
    }

    #[test]
    fn user_text_and_files() {
        let history = vec![user(vec![
            PartKind::text("look at this"),
            PartKind::File(FilePart {
                mime: "image/png".into(),
                url: "data:image/png;base64,AAAA".into(),
                filename: Some("shot.png".into()),
                source: None,
            }),
        ])];
        let chat = to_chat_messages(&history);
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].role, ChatRole::User);
        assert_eq!(chat[0].content.len(), 2);
    }

    #[test]
    fn ignored_text_is_hidden_but_synthetic_is_sent() {
        let history = vec![user(vec![
            PartKind::text("hi"),
            PartKind::Text(TextPart {
                ignored: true,
                ..TextPart::new("internal note")
            }),
            PartKind::synthetic_text("reminder"),
        ])];
        let chat = to_chat_messages(&history);
        assert_eq!(chat[0].text(), "hireminder");
    }

    #[test]
    fn settled_tools_become_calls_and_results() {
        let history = vec![
            user(vec![PartKind::text("read it")]),
            assistant(vec![
                PartKind::text("Reading."),
                tool(
                    "call_1",
                    ToolState::Completed {
                        input: json!({"path": "a.txt"}),
                        output: "contents".into(),
                        title: "a.txt".into(),
                        metadata: Default::default(),
                        time: finished(),
                        attachments: vec![],
                    },
                ),
                tool(
                    "call_2",
                    ToolState::Error {
                        input: json!({"path": "b.txt"}),
                        error: "file not found: b.txt".into(),
                        time: finished(),
                    },
                ),
            ]),
        ];
        let chat = to_chat_messages(&history);
        assert_eq!(chat.len(), 4);
        assert_eq!(chat[1].role, ChatRole::Assistant);
        assert_eq!(chat[1].text(), "Reading.");
        assert_eq!(chat[1].tool_calls.len(), 2);
        assert_eq!(chat[2].tool_call_id.as_deref(), Some("call_1"));
        assert!(!chat[2].is_error);
        assert_eq!(chat[3].text(), "file not found: b.txt");
        assert!(chat[3].is_error);
    }

    #[test]
    fn unfinished_tools_and_reasoning_are_excluded() {
        let history = vec![assistant(vec![
            PartKind::Reasoning(rivet_core::message::ReasoningPart {
                text: "thinking".into(),
                time: rivet_core::message::PartTime::started(),
            }),
            tool("call_1", ToolState::Pending { input: json!({}) }),
            PartKind::text("partial"),
        ])];
        let chat = to_chat_messages(&history);
        assert_eq!(chat.len(), 1);
        assert!(chat[0].tool_calls.is_empty());
        assert_eq!(chat[0].text(), "partial");
    }

    #[test]
    fn empty_errored_assistant_is_skipped() {
        let mut failed = assistant(vec![]);
        if let MessageInfo::Assistant(info) = &mut failed.info {
            info.error = Some(MessageError::aborted());
        }
        let history = vec![user(vec![PartKind::text("hi")]), failed];
        assert_eq!(to_chat_messages(&history).len(), 1);
    }
}
