//! The session loop: one user prompt, as many model steps as the work needs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rivet_core::agent::{AgentProfile, AgentRegistry};
use rivet_core::error::StoreError;
use rivet_core::event::{EventBus, SessionEvent};
use rivet_core::message::{AssistantMessage, MessageInfo, MessageWithParts, PartKind, UserMessage};
use rivet_core::permission::{AllowAll, PermissionGate};
use rivet_core::session::ModelRef;
use rivet_core::store::MessageStore;
use rivet_core::tool::ToolRegistry;
use rivet_providers::{ProviderRegistry, ResolvedModel, StreamClient, StreamInput};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::history;
use crate::processor::{SessionProcessor, Verdict};
use crate::reminders::{self, ReminderContext};

const DEFAULT_OUTPUT_CEILING: u32 = 32_000;

/// One prompt submitted to a session.
#[derive(Debug, Clone, Default)]
pub struct PromptInput {
    pub session_id: String,
    /// Overrides the agent's and the session's model.
    pub model: Option<ModelRef>,
    /// Agent profile name; defaults to the session's agent.
    pub agent: Option<String>,
    pub parts: Vec<PartKind>,
    /// Extra system text for every step of this prompt.
    pub system: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl PromptInput {
    pub fn text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            parts: vec![PartKind::text(text)],
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: ModelRef) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Drives prompts through providers and tools, persisting everything to the
/// message store.
pub struct AgentLoop {
    store: Arc<dyn MessageStore>,
    providers: Arc<ProviderRegistry>,
    tools: ToolRegistry,
    agents: AgentRegistry,
    client: StreamClient,
    bus: EventBus,
    permission: Arc<dyn PermissionGate>,
    busy: Mutex<HashMap<String, CancellationToken>>,
}

impl AgentLoop {
    pub fn new(
        store: Arc<dyn MessageStore>,
        providers: Arc<ProviderRegistry>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            store,
            providers,
            tools,
            agents: AgentRegistry::new(),
            client: StreamClient::new(DEFAULT_OUTPUT_CEILING),
            bus: EventBus::default(),
            permission: Arc::new(AllowAll),
            busy: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn with_stream_client(mut self, client: StreamClient) -> Self {
        self.client = client;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Gate consulted by tools before side effects.
    pub fn with_permission(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.permission = gate;
        self
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.bus.subscribe()
    }

    /// Cancel the prompt running on `session_id`. Returns false when the
    /// session is idle.
    pub fn cancel(&self, session_id: &str) -> bool {
        let busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        match busy.get(session_id) {
            Some(token) => {
                info!(session_id = %session_id, "Cancelling prompt");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_id)
    }

    /// Run a prompt to completion.
    ///
    /// Returns the last assistant message with its parts, or the user message
    /// when no model step ran. Model and tool failures are recorded on the
    /// returned message; `Err` is reserved for invalid input and store
    /// failures.
    pub async fn prompt(&self, input: PromptInput) -> Result<MessageWithParts, AgentError> {
        let mut session = self
            .store
            .get_session(&input.session_id)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound(input.session_id.clone()))?;

        let agent_name = input.agent.clone().unwrap_or_else(|| session.agent.clone());
        let agent = self
            .agents
            .get(&agent_name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgent(agent_name.clone()))?;

        let model = input
            .model
            .clone()
            .or_else(|| agent.model.clone())
            .or_else(|| session.model.clone())
            .or_else(|| self.providers.default_model())
            .ok_or(AgentError::NoModel)?;
        let resolved = self
            .providers
            .resolve(&model)
            .map_err(|_| AgentError::ProviderNotConfigured(model.provider_id.clone()))?;

        let cancel = input.cancel.clone().unwrap_or_default();
        let _guard = BusyGuard::acquire(&self.busy, &session.id, cancel.clone())?;

        session.model = Some(model.clone());
        session.agent = agent.name.clone();
        session.touch();
        self.store.save_session(&session).await?;
        self.bus.publish(SessionEvent::SessionUpdated {
            session: session.clone(),
        });

        let mut user = UserMessage::new(&session.id, &agent.name, model.clone());
        user.system = input.system.clone();
        let user = self.store.create_user_message(user, input.parts).await?;
        self.bus.publish(SessionEvent::MessageUpdated {
            info: user.info.clone(),
        });
        for part in &user.parts {
            self.bus.publish(SessionEvent::PartUpdated {
                part: part.clone(),
                delta: None,
            });
        }

        info!(
            session_id = %session.id,
            agent = %agent.name,
            model = %model,
            "Prompt started"
        );

        let result = self
            .run_steps(
                &session.id,
                &user,
                &agent,
                &model,
                &resolved,
                input.system.as_deref(),
                &cancel,
            )
            .await;

        self.bus.publish(SessionEvent::SessionIdle {
            session_id: session.id.clone(),
        });

        let last_id = result?.unwrap_or_else(|| user.info.id().to_string());
        self.store
            .get_message_with_parts(&last_id)
            .await?
            .ok_or_else(|| StoreError::not_found("message", &last_id).into())
    }

    /// The step loop. Returns the id of the last assistant message, if any.
    #[allow(clippy::too_many_arguments)]
    async fn run_steps(
        &self,
        session_id: &str,
        user: &MessageWithParts,
        agent: &AgentProfile,
        model: &ModelRef,
        resolved: &ResolvedModel,
        system: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, AgentError> {
        let max_steps = agent.max_steps().max(1);
        let tools = self.tools.definitions_for(agent).await;
        let mut processor = SessionProcessor::new(
            self.store.clone(),
            self.bus.clone(),
            self.tools.clone(),
            self.permission.clone(),
            resolved.info.clone(),
        );

        let mut last_assistant = None;
        let mut step = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(session_id = %session_id, step, "Cancelled before step");
                break;
            }
            step += 1;
            self.bus.publish(SessionEvent::StepStarted {
                session_id: session_id.to_string(),
                step,
            });

            let mut history = self.store.list_messages(session_id).await?;
            let previous_was_planning = history
                .iter()
                .rev()
                .find_map(|m| m.info.as_assistant())
                .and_then(|a| self.agents.get(&a.mode))
                .is_some_and(|profile| profile.planning);
            let due = reminders::reminders_for(
                agent,
                ReminderContext {
                    step,
                    max_steps,
                    previous_was_planning,
                },
            );
            reminders::insert(self.store.as_ref(), &mut history, &due).await?;
            let messages = history::to_chat_messages(&history);

            let assistant = self
                .store
                .create_assistant_message(AssistantMessage::new(
                    session_id,
                    user.info.id(),
                    model,
                    &agent.name,
                ))
                .await?;
            self.bus.publish(SessionEvent::MessageUpdated {
                info: MessageInfo::Assistant(assistant.clone()),
            });
            last_assistant = Some(assistant.id.clone());
            processor.reset(assistant);

            debug!(session_id = %session_id, step, messages = messages.len(), "Calling model");
            let events = self
                .client
                .stream(StreamInput {
                    model: resolved,
                    agent,
                    system,
                    messages,
                    tools: tools.clone(),
                    cancel: cancel.clone(),
                })
                .await;
            let outcome = processor.process(events, agent, cancel).await?;

            if let Some(error) = outcome.error() {
                if error.is_aborted() {
                    info!(session_id = %session_id, step, "Prompt aborted");
                } else {
                    warn!(session_id = %session_id, step, error = %error.message(), "Step failed");
                }
                break;
            }
            if outcome.verdict == Verdict::Stop {
                break;
            }
            if step >= max_steps {
                info!(session_id = %session_id, max_steps, "Step limit reached");
                break;
            }
        }

        info!(session_id = %session_id, steps = step, "Prompt finished");
        Ok(last_assistant)
    }
}

/// Marks a session busy for the lifetime of one prompt.
struct BusyGuard<'a> {
    busy: &'a Mutex<HashMap<String, CancellationToken>>,
    session_id: String,
}

impl<'a> BusyGuard<'a> {
    fn acquire(
        busy: &'a Mutex<HashMap<String, CancellationToken>>,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<Self, AgentError> {
        let mut map = busy.lock().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(session_id) {
            return Err(AgentError::SessionBusy(session_id.to_string()));
        }
        map.insert(session_id.to_string(), cancel);
        Ok(Self {
            busy,
            session_id: session_id.to_string(),
        })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
    }
}
