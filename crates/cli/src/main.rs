//! Rivet CLI: the main entry point.
//!
//! Commands:
//! - `run`      Send a prompt to a session and stream the reply
//! - `session`  List, show, export, import or delete sessions
//! - `models`   Show the model catalog
//! - `config`   Create or inspect the configuration file

use clap::{Parser, Subcommand};

mod commands;

use commands::config_cmd::ConfigCommand;
use commands::run::RunArgs;
use commands::session::SessionCommand;

#[derive(Parser)]
#[command(
    name = "rivet",
    about = "Rivet: a tool-using coding assistant for the terminal",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt and stream the assistant's reply
    Run(RunArgs),

    /// Manage stored sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// List known models
    Models {
        /// Only show models of this provider
        provider: Option<String>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so streamed replies on stdout stay clean.
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Session { command } => commands::session::run(command).await?,
        Commands::Models { provider } => commands::models::run(provider.as_deref())?,
        Commands::Config { command } => commands::config_cmd::run(command)?,
    }

    Ok(())
}
