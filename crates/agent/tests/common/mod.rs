//! Shared fixtures: a provider that replays scripted event sequences.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rivet_agent::AgentLoop;
use rivet_config::ProviderKind;
use rivet_core::agent::AgentRegistry;
use rivet_core::error::ProviderError;
use rivet_core::message::TokenUsage;
use rivet_core::provider::{
    EventReceiver, FinishReason, Provider, ProviderRequest, StreamEvent,
};
use rivet_core::session::{ModelRef, Session};
use rivet_core::store::MessageStore;
use rivet_providers::system::Environment;
use rivet_providers::{ProviderRegistry, StreamClient};
use rivet_store::InMemoryStore;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub enum Script {
    /// Emit the events, then end the call.
    Events(Vec<StreamEvent>),
    /// Emit the events, then hold the call open until cancelled.
    Stall(Vec<StreamEvent>),
}

#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> Result<EventReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::StreamInterrupted("no script left".into()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let (events, stall) = match script {
                Script::Events(events) => (events, false),
                Script::Stall(events) => (events, true),
            };
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            if stall {
                cancel.cancelled().await;
            }
        });
        Ok(rx)
    }
}

pub fn model() -> ModelRef {
    ModelRef::new("anthropic", "claude-sonnet-4-20250514")
}

pub fn text(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::TextStart,
        StreamEvent::TextDelta { text: text.into() },
        StreamEvent::TextEnd,
    ]
}

pub fn tool_call(id: &str, name: &str, input: Value) -> Vec<StreamEvent> {
    vec![
        StreamEvent::ToolInputStart {
            id: id.into(),
            name: name.into(),
        },
        StreamEvent::ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        },
    ]
}

pub fn finish(reason: FinishReason) -> StreamEvent {
    StreamEvent::StepFinish {
        usage: TokenUsage {
            input: 100,
            output: 20,
            ..Default::default()
        },
        finish_reason: reason,
    }
}

pub fn turn(mut events: Vec<StreamEvent>, reason: FinishReason) -> Script {
    events.push(finish(reason));
    Script::Events(events)
}

pub struct Harness {
    pub agent: Arc<AgentLoop>,
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<InMemoryStore>,
    pub session: Session,
}

pub struct HarnessBuilder {
    scripts: Vec<Script>,
    agents: AgentRegistry,
    tools: rivet_core::tool::ToolRegistry,
    permission: Option<Arc<dyn rivet_core::permission::PermissionGate>>,
}

impl HarnessBuilder {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts,
            agents: AgentRegistry::new(),
            tools: rivet_core::tool::ToolRegistry::new(),
            permission: None,
        }
    }

    pub fn tools_in(mut self, root: &Path) -> Self {
        self.tools = rivet_tools::default_registry(root);
        self
    }

    pub fn agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = agents;
        self
    }

    pub fn permission(mut self, gate: Arc<dyn rivet_core::permission::PermissionGate>) -> Self {
        self.permission = Some(gate);
        self
    }

    pub async fn build(self) -> Harness {
        let provider = Arc::new(ScriptedProvider::new(self.scripts));
        let providers = ProviderRegistry::default()
            .with_provider("anthropic", ProviderKind::Anthropic, provider.clone())
            .with_default_model(model());
        let store = Arc::new(InMemoryStore::new());
        let session = store.create_session(Some("test".into())).await.unwrap();

        let mut agent = AgentLoop::new(store.clone(), Arc::new(providers), self.tools)
            .with_agents(self.agents)
            .with_stream_client(
                StreamClient::new(32_000).with_environment(Environment::for_dir(Path::new("."))),
            );
        if let Some(gate) = self.permission {
            agent = agent.with_permission(gate);
        }

        Harness {
            agent: Arc::new(agent),
            provider,
            store,
            session,
        }
    }
}
