//! Stream processor: consumes one model call's events and turns them into
//! persisted parts, tool executions and a settled assistant message.
//!
//! Every change is written to the store before it is published on the event
//! bus, so observers can always re-read what they were told about.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rivet_core::agent::AgentProfile;
use rivet_core::error::{StoreError, ToolError};
use rivet_core::event::{EventBus, SessionEvent};
use rivet_core::message::{
    AssistantMessage, Completion, MessageError, MessageInfo, Part, PartKind, PartTime,
    ReasoningPart, TextPart, TokenUsage, ToolPart, ToolStart, ToolState, ToolTime,
};
use rivet_core::permission::PermissionGate;
use rivet_core::provider::{FinishReason, ModelInfo, StreamEvent};
use rivet_core::store::MessageStore;
use rivet_core::tool::{ToolContext, ToolMetadataSink, ToolOutput, ToolRegistry};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Whether the loop should call the model again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stop,
}

/// Result of processing one model call.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// The settled assistant message.
    pub message: AssistantMessage,
    pub verdict: Verdict,
}

impl StepOutcome {
    pub fn error(&self) -> Option<&MessageError> {
        self.message.error.as_ref()
    }
}

pub struct SessionProcessor {
    store: Arc<dyn MessageStore>,
    bus: EventBus,
    tools: ToolRegistry,
    permission: Arc<dyn PermissionGate>,
    model: ModelInfo,

    message: Option<AssistantMessage>,
    text: Option<Part>,
    reasoning: Option<Part>,
    tool_parts: HashMap<String, Part>,
    tokens: TokenUsage,
    cost: f64,
    finish: Option<FinishReason>,
}

impl SessionProcessor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        bus: EventBus,
        tools: ToolRegistry,
        permission: Arc<dyn PermissionGate>,
        model: ModelInfo,
    ) -> Self {
        Self {
            store,
            bus,
            tools,
            permission,
            model,
            message: None,
            text: None,
            reasoning: None,
            tool_parts: HashMap::new(),
            tokens: TokenUsage::default(),
            cost: 0.0,
            finish: None,
        }
    }

    /// Prepare for a new step writing into `message`.
    pub fn reset(&mut self, message: AssistantMessage) {
        self.message = Some(message);
        self.text = None;
        self.reasoning = None;
        self.tool_parts.clear();
        self.tokens = TokenUsage::default();
        self.cost = 0.0;
        self.finish = None;
    }

    /// Consume `events` until the call ends, fails or `cancel` fires, then
    /// settle the message exactly once.
    pub async fn process(
        &mut self,
        mut events: mpsc::Receiver<StreamEvent>,
        agent: &AgentProfile,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, StoreError> {
        let message = self
            .message
            .clone()
            .ok_or_else(|| StoreError::invalid_state("processor", "no message to process"))?;
        let mut error: Option<MessageError> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                StreamEvent::TextStart => {
                    self.open_text(&message).await?;
                }
                StreamEvent::TextDelta { text } => {
                    self.open_text(&message).await?;
                    if let Some(part) = self.text.as_mut() {
                        if let PartKind::Text(t) = &mut part.kind {
                            t.text.push_str(&text);
                        }
                        persist(self.store.as_ref(), &self.bus, part, Some(text)).await?;
                    }
                }
                StreamEvent::TextEnd => self.close_text().await?,
                StreamEvent::ReasoningStart => {
                    self.open_reasoning(&message).await?;
                }
                StreamEvent::ReasoningDelta { text } => {
                    self.open_reasoning(&message).await?;
                    if let Some(part) = self.reasoning.as_mut() {
                        if let PartKind::Reasoning(r) = &mut part.kind {
                            r.text.push_str(&text);
                        }
                        persist(self.store.as_ref(), &self.bus, part, Some(text)).await?;
                    }
                }
                StreamEvent::ReasoningEnd => self.close_reasoning().await?,
                StreamEvent::ToolInputStart { id, name } => {
                    if !self.tool_parts.contains_key(&id) {
                        let kind = PartKind::Tool(ToolPart {
                            call_id: id.clone(),
                            tool: name,
                            state: ToolState::Pending {
                                input: Value::Object(Map::new()),
                            },
                        });
                        let part = self.create_part(&message, kind).await?;
                        self.tool_parts.insert(id, part);
                    }
                }
                StreamEvent::ToolCall { id, name, input } => {
                    self.handle_tool_call(&message, agent, cancel, id, name, input)
                        .await?;
                }
                StreamEvent::StepFinish {
                    usage,
                    finish_reason,
                } => {
                    self.tokens += usage;
                    self.cost += self.model.cost.compute(&usage);
                    debug!(
                        message_id = %message.id,
                        finish = finish_reason.as_str(),
                        input_tokens = usage.input,
                        output_tokens = usage.output,
                        "Step finished"
                    );
                    self.finish = Some(finish_reason);
                }
                StreamEvent::Error(e) => {
                    warn!(message_id = %message.id, error = %e, "Model stream failed");
                    error = Some(MessageError::from_provider(&e, &message.provider_id));
                    break;
                }
            }
        }

        if error.is_none() && cancel.is_cancelled() {
            info!(message_id = %message.id, "Step aborted");
            error = Some(MessageError::aborted());
        }
        if error.is_none() && self.finish == Some(FinishReason::Length) {
            error = Some(MessageError::OutputLength);
        }

        self.close_text().await?;
        self.close_reasoning().await?;
        self.settle_tools(error.is_some()).await?;

        let settled = self.settle_message(message, error).await?;
        self.bus.publish(SessionEvent::MessageUpdated {
            info: MessageInfo::Assistant(settled.clone()),
        });

        let verdict = if settled.error.is_some() {
            Verdict::Stop
        } else if !self.tool_parts.is_empty() || self.finish == Some(FinishReason::ToolCalls) {
            Verdict::Continue
        } else {
            Verdict::Stop
        };

        Ok(StepOutcome {
            message: settled,
            verdict,
        })
    }

    async fn create_part(
        &self,
        message: &AssistantMessage,
        kind: PartKind,
    ) -> Result<Part, StoreError> {
        let part = self
            .store
            .add_part(&message.session_id, &message.id, kind)
            .await?;
        self.bus.publish(SessionEvent::PartUpdated {
            part: part.clone(),
            delta: None,
        });
        Ok(part)
    }

    async fn open_text(&mut self, message: &AssistantMessage) -> Result<(), StoreError> {
        if self.text.is_none() {
            let kind = PartKind::Text(TextPart {
                time: Some(PartTime::started()),
                ..TextPart::new("")
            });
            self.text = Some(self.create_part(message, kind).await?);
        }
        Ok(())
    }

    async fn close_text(&mut self) -> Result<(), StoreError> {
        let Some(mut part) = self.text.take() else {
            return Ok(());
        };
        if let PartKind::Text(TextPart {
            time: Some(time), ..
        }) = &mut part.kind
        {
            time.end = Some(Utc::now());
        }
        persist(self.store.as_ref(), &self.bus, &part, None).await
    }

    async fn open_reasoning(&mut self, message: &AssistantMessage) -> Result<(), StoreError> {
        if self.reasoning.is_none() {
            let kind = PartKind::Reasoning(ReasoningPart {
                text: String::new(),
                time: PartTime::started(),
            });
            self.reasoning = Some(self.create_part(message, kind).await?);
        }
        Ok(())
    }

    async fn close_reasoning(&mut self) -> Result<(), StoreError> {
        let Some(mut part) = self.reasoning.take() else {
            return Ok(());
        };
        if let PartKind::Reasoning(r) = &mut part.kind {
            r.time.end = Some(Utc::now());
        }
        persist(self.store.as_ref(), &self.bus, &part, None).await
    }

    async fn handle_tool_call(
        &mut self,
        message: &AssistantMessage,
        agent: &AgentProfile,
        cancel: &CancellationToken,
        call_id: String,
        name: String,
        input: Value,
    ) -> Result<(), StoreError> {
        let start = Utc::now();
        let running = ToolState::Running {
            input: input.clone(),
            title: None,
            metadata: None,
            time: ToolStart { start },
        };

        let part = if let Some(part) = self.tool_parts.get_mut(&call_id) {
            let PartKind::Tool(tool) = &mut part.kind else {
                return Ok(());
            };
            if tool.state.is_terminal() {
                warn!(call_id = %call_id, tool = %name, "Ignoring duplicate tool call");
                return Ok(());
            }
            tool.tool = name.clone();
            tool.state = running;
            persist(self.store.as_ref(), &self.bus, part, None).await?;
            part.clone()
        } else {
            let kind = PartKind::Tool(ToolPart {
                call_id: call_id.clone(),
                tool: name.clone(),
                state: running,
            });
            let part = self.create_part(message, kind).await?;
            self.tool_parts.insert(call_id.clone(), part.clone());
            part
        };

        let result = self
            .execute_tool(message, agent, cancel, &part, &name, input.clone())
            .await;
        let time = ToolTime {
            start,
            end: Utc::now(),
        };
        let state = match result {
            Ok(output) => {
                info!(tool = %name, call_id = %call_id, "Tool completed");
                ToolState::Completed {
                    input,
                    output: output.output,
                    title: output.title,
                    metadata: output.metadata,
                    time,
                    attachments: output.attachments,
                }
            }
            Err(e) => {
                warn!(tool = %name, call_id = %call_id, error = %e, "Tool failed");
                ToolState::Error {
                    input,
                    error: e.to_string(),
                    time,
                }
            }
        };
        self.set_tool_state(&call_id, state).await
    }

    async fn execute_tool(
        &self,
        message: &AssistantMessage,
        agent: &AgentProfile,
        cancel: &CancellationToken,
        part: &Part,
        name: &str,
        input: Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .filter(|_| agent.tool_enabled(name))
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let init = tool.init(agent).await;
        if let Some(missing) = missing_required(&init.parameters, &input) {
            return Err(ToolError::InvalidArguments(format!(
                "missing required argument: {missing}"
            )));
        }

        let call_id = part
            .as_tool()
            .map(|t| t.call_id.clone())
            .unwrap_or_default();
        let sink = Arc::new(PartMetadataSink {
            store: self.store.clone(),
            bus: self.bus.clone(),
            part: Mutex::new(part.clone()),
        });
        let ctx = ToolContext::new(&message.session_id, &message.id, call_id, &agent.name)
            .with_cancel(cancel.clone())
            .with_permission(self.permission.clone())
            .with_metadata_sink(sink);

        debug!(tool = %name, call_id = %ctx.call_id, "Executing tool");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Aborted),
            result = tool.execute(input, &ctx) => result,
        }
    }

    async fn set_tool_state(&mut self, call_id: &str, state: ToolState) -> Result<(), StoreError> {
        let Some(part) = self.tool_parts.get_mut(call_id) else {
            return Ok(());
        };
        // Live metadata updates may have advanced the stored copy.
        if let Some(stored) = self.store.get_part(&part.message_id, &part.id).await? {
            *part = stored;
        }
        if let PartKind::Tool(tool) = &mut part.kind {
            tool.state = state;
        }
        persist(self.store.as_ref(), &self.bus, part, None).await
    }

    /// Move every unfinished tool call to `error` so nothing stays pending
    /// once the message settles.
    async fn settle_tools(&mut self, failed: bool) -> Result<(), StoreError> {
        let reason = if failed {
            "aborted"
        } else {
            "tool call did not complete"
        };
        let unfinished: Vec<(String, ToolState)> = self
            .tool_parts
            .iter()
            .filter_map(|(call_id, part)| {
                let tool = part.as_tool()?;
                if tool.state.is_terminal() {
                    return None;
                }
                let now = Utc::now();
                Some((
                    call_id.clone(),
                    ToolState::Error {
                        input: tool.state.input().clone(),
                        error: reason.to_string(),
                        time: ToolTime {
                            start: tool.state.started_at().unwrap_or(now),
                            end: now,
                        },
                    },
                ))
            })
            .collect();
        for (call_id, state) in unfinished {
            self.set_tool_state(&call_id, state).await?;
        }
        Ok(())
    }

    async fn settle_message(
        &self,
        message: AssistantMessage,
        error: Option<MessageError>,
    ) -> Result<AssistantMessage, StoreError> {
        let finish = self.finish.as_ref().map(|f| f.as_str().to_string());
        match error {
            None => {
                self.store
                    .complete_assistant_message(
                        &message.id,
                        Completion {
                            cost: self.cost,
                            tokens: self.tokens,
                            finish,
                            summary: false,
                        },
                    )
                    .await
            }
            Some(error) => {
                // Keep the usage reported before the failure.
                let partial = AssistantMessage {
                    cost: self.cost,
                    tokens: self.tokens,
                    finish,
                    ..message
                };
                self.store
                    .save_message(&MessageInfo::Assistant(partial.clone()))
                    .await?;
                let settled = self
                    .store
                    .set_assistant_message_error(&partial.id, error.clone())
                    .await?;
                self.bus.publish(SessionEvent::SessionError {
                    session_id: settled.session_id.clone(),
                    error,
                });
                Ok(settled)
            }
        }
    }
}

async fn persist(
    store: &dyn MessageStore,
    bus: &EventBus,
    part: &Part,
    delta: Option<String>,
) -> Result<(), StoreError> {
    store.update_part(part).await?;
    bus.publish(SessionEvent::PartUpdated {
        part: part.clone(),
        delta,
    });
    Ok(())
}

/// First key listed in the schema's `required` array that `input` lacks.
fn missing_required(schema: &Value, input: &Value) -> Option<String> {
    schema["required"]
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find(|key| input.get(*key).is_none_or(Value::is_null))
        .map(String::from)
}

/// Writes live title/metadata from a running tool onto its part.
struct PartMetadataSink {
    store: Arc<dyn MessageStore>,
    bus: EventBus,
    part: Mutex<Part>,
}

#[async_trait]
impl ToolMetadataSink for PartMetadataSink {
    async fn update(&self, title: Option<String>, metadata: Map<String, Value>) {
        let mut part = self.part.lock().await;
        let PartKind::Tool(ToolPart {
            state:
                ToolState::Running {
                    title: current_title,
                    metadata: current_metadata,
                    ..
                },
            ..
        }) = &mut part.kind
        else {
            return;
        };
        if title.is_some() {
            *current_title = title;
        }
        *current_metadata = Some(metadata);

        if let Err(e) = persist(self.store.as_ref(), &self.bus, &part, None).await {
            warn!(part_id = %part.id, error = %e, "Failed to store tool metadata");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivet_core::error::ProviderError;
    use rivet_core::message::UserMessage;
    use rivet_core::permission::AllowAll;
    use rivet_core::session::ModelRef;
    use rivet_core::tool::Tool;
    use rivet_store::InMemoryStore;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
            let text = args["text"].as_str().unwrap_or_default().to_string();
            ctx.update_metadata(Some("echoing".into()), Map::new()).await;
            Ok(ToolOutput::new("echo", text))
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        processor: SessionProcessor,
        message: AssistantMessage,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let session = store.create_session(None).await.unwrap();
        let model = ModelRef::new("anthropic", "claude-sonnet-4-20250514");
        let user = store
            .create_user_message(
                UserMessage::new(&session.id, "build", model.clone()),
                vec![PartKind::text("hi")],
            )
            .await
            .unwrap();
        let message = store
            .create_assistant_message(AssistantMessage::new(
                &session.id,
                user.info.id(),
                &model,
                "build",
            ))
            .await
            .unwrap();

        let mut processor = SessionProcessor::new(
            store.clone(),
            EventBus::default(),
            ToolRegistry::new().with(Echo),
            Arc::new(AllowAll),
            ModelInfo::synthesized(&model),
        );
        processor.reset(message.clone());
        Fixture {
            store,
            processor,
            message,
        }
    }

    fn channel(events: Vec<StreamEvent>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        rx
    }

    fn finish(reason: FinishReason) -> StreamEvent {
        StreamEvent::StepFinish {
            usage: TokenUsage {
                input: 10,
                output: 5,
                ..Default::default()
            },
            finish_reason: reason,
        }
    }

    #[tokio::test]
    async fn text_deltas_accumulate_into_one_part() {
        let mut f = fixture().await;
        let events = channel(vec![
            StreamEvent::TextStart,
            StreamEvent::TextDelta { text: "Hel".into() },
            StreamEvent::TextDelta { text: "lo".into() },
            StreamEvent::TextEnd,
            finish(FinishReason::Stop),
        ]);
        let outcome = f
            .processor
            .process(events, &AgentProfile::build(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Stop);
        assert!(outcome.message.is_settled());
        assert_eq!(outcome.message.tokens.input, 10);
        assert_eq!(outcome.message.finish.as_deref(), Some("stop"));

        let parts = f.store.list_parts(&f.message.id).await.unwrap();
        assert_eq!(parts.len(), 1);
        let text = parts[0].as_text().unwrap();
        assert_eq!(text.text, "Hello");
        assert!(text.time.as_ref().unwrap().end.is_some());
    }

    #[tokio::test]
    async fn tool_call_runs_and_continues() {
        let mut f = fixture().await;
        let events = channel(vec![
            StreamEvent::ToolInputStart {
                id: "call_1".into(),
                name: "echo".into(),
            },
            StreamEvent::ToolCall {
                id: "call_1".into(),
                name: "echo".into(),
                input: json!({"text": "ping"}),
            },
            finish(FinishReason::Stop),
        ]);
        let outcome = f
            .processor
            .process(events, &AgentProfile::build(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Continue);

        let parts = f.store.list_parts(&f.message.id).await.unwrap();
        assert_eq!(parts.len(), 1);
        match &parts[0].as_tool().unwrap().state {
            ToolState::Completed { output, .. } => assert_eq!(output, "ping"),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_part() {
        let mut f = fixture().await;
        let events = channel(vec![
            StreamEvent::ToolCall {
                id: "call_1".into(),
                name: "teleport".into(),
                input: json!({}),
            },
            finish(FinishReason::ToolCalls),
        ]);
        let outcome = f
            .processor
            .process(events, &AgentProfile::build(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Continue);
        assert!(outcome.error().is_none());

        let parts = f.store.list_parts(&f.message.id).await.unwrap();
        match &parts[0].as_tool().unwrap().state {
            ToolState::Error { error, .. } => assert_eq!(error, "tool not found: teleport"),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_argument_fails_before_execution() {
        let mut f = fixture().await;
        let events = channel(vec![StreamEvent::ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            input: json!({}),
        }]);
        f.processor
            .process(events, &AgentProfile::build(), &CancellationToken::new())
            .await
            .unwrap();
        let parts = f.store.list_parts(&f.message.id).await.unwrap();
        match &parts[0].as_tool().unwrap().state {
            ToolState::Error { error, .. } => assert!(error.contains("text")),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_error_settles_message_and_pending_tools() {
        let mut f = fixture().await;
        let events = channel(vec![
            StreamEvent::TextDelta {
                text: "partial".into(),
            },
            StreamEvent::ToolInputStart {
                id: "call_1".into(),
                name: "echo".into(),
            },
            StreamEvent::Error(ProviderError::ApiError {
                status_code: 500,
                message: "overloaded".into(),
            }),
        ]);
        let outcome = f
            .processor
            .process(events, &AgentProfile::build(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.verdict, Verdict::Stop);
        assert!(matches!(
            outcome.error(),
            Some(MessageError::Api {
                status_code: Some(500),
                ..
            })
        ));
        let parts = f.store.list_parts(&f.message.id).await.unwrap();
        assert_eq!(parts[0].as_text().unwrap().text, "partial");
        assert!(parts[1].as_tool().unwrap().state.is_terminal());
    }

    #[tokio::test]
    async fn length_finish_is_output_length_error() {
        let mut f = fixture().await;
        let events = channel(vec![
            StreamEvent::TextDelta { text: "long".into() },
            finish(FinishReason::Length),
        ]);
        let outcome = f
            .processor
            .process(events, &AgentProfile::build(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.error(), Some(&MessageError::OutputLength));
        assert_eq!(outcome.message.tokens.output, 5);
    }

    #[tokio::test]
    async fn reset_clears_step_state() {
        let mut f = fixture().await;
        let events = channel(vec![StreamEvent::ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            input: json!({"text": "a"}),
        }]);
        f.processor
            .process(events, &AgentProfile::build(), &CancellationToken::new())
            .await
            .unwrap();

        let next = f
            .store
            .create_assistant_message(AssistantMessage::new(
                &f.message.session_id,
                &f.message.parent_id,
                &ModelRef::new("anthropic", "claude-sonnet-4-20250514"),
                "build",
            ))
            .await
            .unwrap();
        f.processor.reset(next);
        let outcome = f
            .processor
            .process(
                channel(vec![finish(FinishReason::Stop)]),
                &AgentProfile::build(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Stop);
        assert_eq!(outcome.message.tokens.input, 10);
    }
}
