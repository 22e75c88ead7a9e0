//! `rivet session`: inspect and move stored sessions.

use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::Subcommand;
use rivet_config::AppConfig;
use rivet_core::message::{MessageInfo, MessageWithParts, PartKind, ToolState};
use rivet_core::session::SessionExport;
use rivet_core::store::MessageStore;
use rivet_store::{export_session, import_session};

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// List sessions, most recently updated first
    List,

    /// Print a session's conversation
    Show { id: String },

    /// Write a session as JSON
    Export {
        id: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recreate a session from an export file under a new id
    Import { file: PathBuf },

    /// Delete a session and all its messages
    Delete { id: String },
}

pub async fn run(command: SessionCommand) -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    let store = super::open_store(&config).await?;
    execute(store.as_ref(), command).await
}

async fn execute(store: &dyn MessageStore, command: SessionCommand) -> anyhow::Result<()> {
    match command {
        SessionCommand::List => {
            let mut sessions = store.list_sessions().await?;
            sessions.sort_by(|a, b| b.time.updated.cmp(&a.time.updated));
            if sessions.is_empty() {
                println!("No sessions yet. Start one with `rivet run <prompt>`.");
            }
            for s in sessions {
                let model = s.model.map(|m| m.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "{}  {}  {:<6}  {:<40}  {}",
                    s.id,
                    s.time.updated.format("%Y-%m-%d %H:%M"),
                    s.agent,
                    model,
                    s.title
                );
            }
        }
        SessionCommand::Show { id } => {
            let session = store
                .get_session(&id)
                .await?
                .ok_or_else(|| anyhow!("session not found: {id}"))?;
            println!("# {}\n", session.title);
            for message in store.list_messages(&id).await? {
                print!("{}", render_message(&message));
            }
        }
        SessionCommand::Export { id, output } => {
            let export = export_session(store, &id).await?;
            let json = export.to_json_pretty()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!(
                        "Exported {} messages to {}",
                        export.messages.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }
        SessionCommand::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let export = SessionExport::from_json(&content).context("parsing session export")?;
            let session = import_session(store, export).await?;
            println!("{}", session.id);
        }
        SessionCommand::Delete { id } => {
            if !store.delete_session(&id).await? {
                return Err(anyhow!("session not found: {id}"));
            }
            eprintln!("Deleted {id}");
        }
    }
    Ok(())
}

fn render_message(message: &MessageWithParts) -> String {
    let mut out = match &message.info {
        MessageInfo::User(_) => "## user\n".to_string(),
        MessageInfo::Assistant(a) => format!("## assistant ({}/{})\n", a.provider_id, a.model_id),
    };
    for part in &message.parts {
        match &part.kind {
            PartKind::Text(t) if !t.synthetic && !t.ignored => {
                out.push_str(&t.text);
                out.push('\n');
            }
            PartKind::File(f) => {
                let name = f.filename.as_deref().unwrap_or(f.url.as_str());
                out.push_str(&format!("[file: {name}]\n"));
            }
            PartKind::Tool(tool) => {
                let detail = match &tool.state {
                    ToolState::Completed { title, .. } => title.clone(),
                    ToolState::Error { error, .. } => format!("error: {error}"),
                    other => other.status().to_string(),
                };
                out.push_str(&format!("[{}] {detail}\n", tool.tool));
            }
            _ => {}
        }
    }
    if let Some(error) = message.info.as_assistant().and_then(|a| a.error.as_ref()) {
        out.push_str(&format!("(error: {})\n", error.message()));
    }
    out.push('\n');
    out
}
