//! Stream client: turns a normalized history plus agent options into one
//! provider call and a single ordered event stream.
//!
//! The client never retries. A transport failure, a rejected request or a
//! failure mid-stream all surface as exactly one terminal
//! [`StreamEvent::Error`], after which nothing else is delivered.

use rivet_core::agent::AgentProfile;
use rivet_core::provider::{ChatMessage, ModelInfo, ProviderRequest, StreamEvent, ToolDefinition};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::router::ResolvedModel;
use crate::schema;
use crate::system::{self, Environment};

/// Everything one model call needs.
pub struct StreamInput<'a> {
    pub model: &'a ResolvedModel,
    pub agent: &'a AgentProfile,
    /// Caller-supplied system text appended after the agent instructions.
    pub system: Option<&'a str>,
    /// Conversation history without system messages.
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub cancel: CancellationToken,
}

pub struct StreamClient {
    environment: Environment,
    output_ceiling: u32,
}

impl StreamClient {
    /// `output_ceiling` is the global cap on output tokens per call.
    pub fn new(output_ceiling: u32) -> Self {
        Self {
            environment: Environment::detect(),
            output_ceiling,
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Effective `(max_tokens, thinking_budget)` for a call.
    ///
    /// Without thinking the limit is the smallest of the model's output limit,
    /// the global ceiling and the agent's own cap. A thinking budget shares
    /// the model's output window: it is added on top of the standard limit
    /// when that still fits, otherwise the call gets the whole window. The
    /// budget always stays below `max_tokens`.
    pub fn output_limits(&self, model: &ModelInfo, agent: &AgentProfile) -> (u32, Option<u32>) {
        let model_limit = if model.output_limit == 0 {
            self.output_ceiling
        } else {
            model.output_limit
        };
        let standard = model_limit
            .min(self.output_ceiling)
            .min(agent.max_output_tokens.unwrap_or(u32::MAX))
            .max(1);

        let budget = agent
            .thinking_budget
            .filter(|b| *b > 0 && model.reasoning);
        let Some(budget) = budget else {
            return (standard, None);
        };

        let max_tokens = match standard.checked_add(budget) {
            Some(total) if total <= model_limit => total,
            _ => model_limit,
        };
        let budget = budget.min(max_tokens.saturating_sub(1));
        (max_tokens, (budget > 0).then_some(budget))
    }

    /// Assemble the provider request.
    pub fn build_request(&self, input: &StreamInput<'_>) -> ProviderRequest {
        let info = &input.model.info;
        let quirks = input.model.quirks;

        let mut messages: Vec<ChatMessage> =
            system::system_prompt(input.agent, &info.family, input.system, &self.environment)
                .into_iter()
                .map(ChatMessage::system)
                .collect();
        messages.extend(input.messages.iter().cloned());
        let messages = quirks.normalize_messages(messages);

        let tools = schema::translate_tools(&info.family, input.tools.clone());
        let tools = quirks.normalize_tools(&messages, tools);

        let (max_tokens, thinking_budget) = self.output_limits(info, input.agent);

        ProviderRequest {
            model: info.id.clone(),
            messages,
            temperature: input.agent.temperature,
            top_p: input.agent.top_p,
            max_tokens,
            thinking_budget,
            tools,
        }
    }

    /// Start a call. The returned channel yields events in provider order and
    /// closes after the step finishes, after an error, or on cancellation.
    pub async fn stream(&self, input: StreamInput<'_>) -> mpsc::Receiver<StreamEvent> {
        let request = self.build_request(&input);
        let (tx, rx) = mpsc::channel(64);
        let provider = input.model.provider.clone();
        let cancel = input.cancel.clone();

        debug!(
            provider = %provider.name(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            max_tokens = request.max_tokens,
            "Starting model stream"
        );

        let mut upstream = match provider.stream(request, cancel.clone()).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(provider = %provider.name(), error = %e, "Provider rejected stream");
                let _ = tx.send(StreamEvent::Error(e)).await;
                return rx;
            }
        };

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    next = upstream.recv() => next,
                };
                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => StreamEvent::Error(e),
                    None => return,
                };
                let terminal = matches!(event, StreamEvent::Error(_));
                if tx.send(event).await.is_err() || terminal {
                    return;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quirks::VendorQuirks;
    use async_trait::async_trait;
    use rivet_config::ProviderKind;
    use rivet_core::error::ProviderError;
    use rivet_core::message::TokenUsage;
    use rivet_core::provider::{EventReceiver, FinishReason, Provider};
    use rivet_core::session::ModelRef;
    use std::sync::{Arc, Mutex};

    struct Recording {
        requests: Mutex<Vec<ProviderRequest>>,
        events: Vec<Result<StreamEvent, ProviderError>>,
        reject: bool,
    }

    #[async_trait]
    impl Provider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn stream(
            &self,
            request: ProviderRequest,
            _cancel: CancellationToken,
        ) -> Result<EventReceiver, ProviderError> {
            self.requests.lock().unwrap().push(request);
            if self.reject {
                return Err(ProviderError::AuthenticationFailed("bad key".into()));
            }
            let (tx, rx) = mpsc::channel(16);
            for event in self.events.clone() {
                tx.send(event).await.unwrap();
            }
            Ok(rx)
        }
    }

    fn resolved(provider: Arc<Recording>, info: ModelInfo) -> ResolvedModel {
        ResolvedModel {
            info,
            provider,
            quirks: VendorQuirks::for_provider(ProviderKind::Anthropic, "anthropic"),
        }
    }

    fn model(output_limit: u32, reasoning: bool) -> ModelInfo {
        let mut info = ModelInfo::synthesized(&ModelRef::new("anthropic", "claude-test"));
        info.output_limit = output_limit;
        info.reasoning = reasoning;
        info
    }

    async fn drain(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[test]
    fn standard_limit_is_the_minimum() {
        let client = StreamClient::new(32_000);
        let agent = AgentProfile::build();
        assert_eq!(client.output_limits(&model(64_000, false), &agent), (32_000, None));
        assert_eq!(client.output_limits(&model(8_192, false), &agent), (8_192, None));

        let capped = AgentProfile {
            max_output_tokens: Some(4_000),
            ..AgentProfile::build()
        };
        assert_eq!(client.output_limits(&model(64_000, false), &capped), (4_000, None));
    }

    #[test]
    fn thinking_budget_shares_the_window() {
        let client = StreamClient::new(32_000);
        let agent = AgentProfile {
            thinking_budget: Some(16_000),
            ..AgentProfile::build()
        };
        // 32k standard + 16k budget fits in 64k
        assert_eq!(
            client.output_limits(&model(64_000, true), &agent),
            (48_000, Some(16_000))
        );
        // Does not fit: whole window, budget still below it
        assert_eq!(
            client.output_limits(&model(32_000, true), &agent),
            (32_000, Some(16_000))
        );
        // Models without reasoning ignore the budget
        assert_eq!(client.output_limits(&model(64_000, false), &agent), (32_000, None));
    }

    #[test]
    fn budget_clamped_below_max_tokens() {
        let client = StreamClient::new(32_000);
        let agent = AgentProfile {
            thinking_budget: Some(50_000),
            ..AgentProfile::build()
        };
        let (max, budget) = client.output_limits(&model(20_000, true), &agent);
        assert_eq!(max, 20_000);
        assert_eq!(budget, Some(19_999));
    }

    #[tokio::test]
    async fn request_carries_system_prompt_first() {
        let provider = Arc::new(Recording {
            requests: Mutex::new(Vec::new()),
            events: vec![],
            reject: false,
        });
        let model = resolved(provider.clone(), model(64_000, false));
        let client = StreamClient::new(32_000);
        let agent = AgentProfile::build();

        let rx = client
            .stream(StreamInput {
                model: &model,
                agent: &agent,
                system: Some("extra"),
                messages: vec![ChatMessage::user("hi")],
                tools: vec![],
                cancel: CancellationToken::new(),
            })
            .await;
        drain(rx).await;

        let requests = provider.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert!(messages[0].text().contains("extra"));
        assert!(messages[0].text().contains("<env>"));
        assert_eq!(requests[0].model, "claude-test");
    }

    #[tokio::test]
    async fn rejected_request_is_one_error_event() {
        let provider = Arc::new(Recording {
            requests: Mutex::new(Vec::new()),
            events: vec![],
            reject: true,
        });
        let model = resolved(provider, model(64_000, false));
        let client = StreamClient::new(32_000);
        let agent = AgentProfile::build();

        let events = drain(
            client
                .stream(StreamInput {
                    model: &model,
                    agent: &agent,
                    system: None,
                    messages: vec![ChatMessage::user("hi")],
                    tools: vec![],
                    cancel: CancellationToken::new(),
                })
                .await,
        )
        .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Error(ProviderError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn nothing_after_an_error() {
        let provider = Arc::new(Recording {
            requests: Mutex::new(Vec::new()),
            events: vec![
                Ok(StreamEvent::TextStart),
                Err(ProviderError::StreamInterrupted("reset".into())),
                Ok(StreamEvent::StepFinish {
                    usage: TokenUsage::default(),
                    finish_reason: FinishReason::Stop,
                }),
            ],
            reject: false,
        });
        let model = resolved(provider, model(64_000, false));
        let client = StreamClient::new(32_000);
        let agent = AgentProfile::build();

        let events = drain(
            client
                .stream(StreamInput {
                    model: &model,
                    agent: &agent,
                    system: None,
                    messages: vec![ChatMessage::user("hi")],
                    tools: vec![],
                    cancel: CancellationToken::new(),
                })
                .await,
        )
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Error(_)));
    }
}
