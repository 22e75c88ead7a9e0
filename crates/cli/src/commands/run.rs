//! `rivet run`: send one prompt and stream the reply.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use clap::Args;
use rivet_agent::{AgentLoop, PromptInput};
use rivet_config::AppConfig;
use rivet_core::event::SessionEvent;
use rivet_core::message::{MessageInfo, PartKind, ToolState};
use rivet_core::permission::{AllowAll, PermissionDecision, PermissionGate, PermissionRequest};
use rivet_core::session::{ModelRef, Session};
use rivet_core::store::MessageStore;
use rivet_providers::system::Environment;
use rivet_providers::{StreamClient, build_from_config};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The prompt text
    #[arg(required = true)]
    message: Vec<String>,

    /// Continue an existing session
    #[arg(short, long)]
    session: Option<String>,

    /// Continue the most recently updated session
    #[arg(short = 'c', long = "continue", conflicts_with = "session")]
    continue_last: bool,

    /// Model as provider/model
    #[arg(short, long, env = "RIVET_RUN_MODEL")]
    model: Option<String>,

    /// Agent profile, e.g. build or plan
    #[arg(short, long)]
    agent: Option<String>,

    /// Extra system instructions for this prompt
    #[arg(long)]
    system: Option<String>,

    /// Approve every tool action without asking
    #[arg(short = 'y', long)]
    yes: bool,
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    let store = super::open_store(&config).await?;
    let providers = build_from_config(&config).context("configuring providers")?;
    let agents = config.agent_registry()?;
    let root = std::env::current_dir().context("reading working directory")?;

    let permission: Arc<dyn PermissionGate> = if args.yes {
        Arc::new(AllowAll)
    } else {
        Arc::new(
            config
                .permission_policy()
                .with_interactive(Arc::new(TerminalPrompt)),
        )
    };

    let agent = Arc::new(
        AgentLoop::new(
            store.clone(),
            Arc::new(providers),
            rivet_tools::default_registry(&root),
        )
        .with_agents(agents)
        .with_stream_client(
            StreamClient::new(config.max_output_tokens)
                .with_environment(Environment::for_dir(&root)),
        )
        .with_permission(permission),
    );

    let session = select_session(store.as_ref(), &args).await?;
    let model = args
        .model
        .as_deref()
        .map(|m| ModelRef::parse(m).ok_or_else(|| anyhow!("invalid model '{m}', expected provider/model")))
        .transpose()?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n  interrupted");
                cancel.cancel();
            }
        }
    });

    let printer = tokio::spawn(render(agent.subscribe(), session.id.clone()));

    let input = PromptInput {
        session_id: session.id.clone(),
        model,
        agent: args.agent,
        parts: vec![PartKind::text(args.message.join(" "))],
        system: args.system,
        cancel: Some(cancel),
    };
    let result = match agent.prompt(input).await {
        Ok(result) => result,
        Err(e) => {
            printer.abort();
            return Err(e.into());
        }
    };
    let _ = printer.await;

    println!();
    if let MessageInfo::Assistant(info) = &result.info {
        if let Some(error) = &info.error {
            eprintln!("  error: {}", error.message());
        }
        eprintln!(
            "  session {}  ·  {}/{}  ·  {} in / {} out tokens  ·  ${:.4}",
            session.id,
            info.provider_id,
            info.model_id,
            info.tokens.input,
            info.tokens.output,
            info.cost
        );
    }
    Ok(())
}

async fn select_session(store: &dyn MessageStore, args: &RunArgs) -> anyhow::Result<Session> {
    if let Some(id) = &args.session {
        return store
            .get_session(id)
            .await?
            .ok_or_else(|| anyhow!("session not found: {id}"));
    }
    if args.continue_last {
        let latest = store
            .list_sessions()
            .await?
            .into_iter()
            .max_by_key(|s| s.time.updated);
        if let Some(session) = latest {
            return Ok(session);
        }
    }
    let title: String = args.message.join(" ").chars().take(60).collect();
    Ok(store.create_session(Some(title)).await?)
}

/// Print streamed text to stdout and tool activity to stderr until the
/// session goes idle.
async fn render(mut events: broadcast::Receiver<Arc<SessionEvent>>, session_id: String) {
    let mut shown: HashMap<String, &'static str> = HashMap::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Output fell behind, some updates were not shown");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        if event.session_id() != session_id {
            continue;
        }
        match event.as_ref() {
            SessionEvent::PartUpdated { part, delta } => match &part.kind {
                PartKind::Text(_) => {
                    if let Some(delta) = delta {
                        print!("{delta}");
                        let _ = std::io::stdout().flush();
                    }
                }
                PartKind::Tool(tool) => {
                    let status = tool.state.status();
                    if shown.get(&part.id) == Some(&status) {
                        continue;
                    }
                    shown.insert(part.id.clone(), status);
                    if let Some(line) = tool_line(&tool.tool, &tool.state) {
                        eprintln!("{line}");
                    }
                }
                _ => {}
            },
            SessionEvent::SessionIdle { .. } => return,
            _ => {}
        }
    }
}

fn tool_line(tool: &str, state: &ToolState) -> Option<String> {
    match state {
        ToolState::Pending { .. } => None,
        ToolState::Running { input, title, .. } => Some(format!(
            "\n  ⚙ {tool} {}",
            title.clone().unwrap_or_else(|| input.to_string())
        )),
        ToolState::Completed { title, .. } => Some(format!("  ✓ {tool} {title}")),
        ToolState::Error { error, .. } => Some(format!("  ✗ {tool}: {error}")),
    }
}

/// Asks on the terminal before a tool acts.
struct TerminalPrompt;

#[async_trait]
impl PermissionGate for TerminalPrompt {
    async fn ask(&self, request: &PermissionRequest) -> PermissionDecision {
        eprint!("\n  allow {}: {}? [y/N] ", request.tool, request.title);
        let _ = std::io::stderr().flush();
        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;
        match answer {
            Ok(Ok(line)) if matches!(line.trim(), "y" | "Y" | "yes") => PermissionDecision::Allow,
            _ => PermissionDecision::Deny,
        }
    }
}
