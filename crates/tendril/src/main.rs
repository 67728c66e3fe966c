//! Tendril - an autonomous chat-with-tools agent.
//!
//! This is the main entry point for the tendril CLI.

mod chat;
mod logging;
mod terminal;

use clap::{Parser, Subcommand};
use logging::init_logging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tendril_core::{AgentEnv, Config, Conversation};
use tendril_provider::{ModelSelection, ModelTier};
use terminal::TerminalSink;
use tracing::info;

#[derive(Parser)]
#[command(name = "tendril")]
#[command(author, version, about = "Autonomous chat-with-tools agent", long_about = None)]
struct Cli {
    /// Session file to load and save (defaults to the configured one)
    #[arg(long, global = true)]
    session: Option<PathBuf>,

    /// Model to use (sonnet, opus)
    #[arg(long, short, global = true)]
    model: Option<ModelTier>,

    /// Print logs to stderr instead of the log file
    #[arg(long, global = true)]
    print_logs: bool,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively (default)
    Chat,
    /// Run a single message and exit
    Run {
        /// Message to send
        #[arg(num_args = 1.., required = true)]
        message: Vec<String>,
    },
    /// Replay the stored session
    History,
    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = init_logging(&cli.log_level, cli.print_logs);
    if let Some(path) = &log_file {
        tracing::debug!(path = %path.display(), "Logging to file");
    }

    let cwd = std::env::current_dir()?;
    let (config, sources) = Config::load(Some(&cwd)).await?;
    info!(sources = sources.len(), "Configuration loaded");

    let session = session_path(cli.session.as_deref(), &config);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let conversation = Conversation::load(&session).await?;
            let env = agent_env(&config, cli.model)?;
            chat::chat_loop(conversation, env, &session).await
        }
        Commands::Run { message } => {
            let mut conversation = Conversation::load(&session).await?;
            let mut env = agent_env(&config, cli.model)?;
            let mut sink = TerminalSink::stdout();
            chat::run_interaction(
                &mut conversation,
                message.join(" "),
                &mut env,
                &mut sink,
                &session,
            )
            .await
        }
        Commands::History => {
            let conversation = Conversation::load(&session).await?;
            conversation.render(&mut TerminalSink::stdout());
            Ok(())
        }
        Commands::Config => show_config(&config, &sources, &session),
    }
}

/// The session file: `--session`, else the configured one, else the data
/// directory default.
fn session_path(flag: Option<&Path>, config: &Config) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.session_file.clone())
        .or_else(|| Config::data_dir().map(|d| d.join("session.json")))
        .unwrap_or_else(|| PathBuf::from("tendril-session.json"))
}

fn agent_env(config: &Config, model: Option<ModelTier>) -> anyhow::Result<AgentEnv> {
    let gateway = Arc::new(config.gateway()?);
    let mut env = AgentEnv::from_config(gateway, config);
    if let Some(model) = model {
        env.selection = ModelSelection::fixed(model);
    }
    info!(model = %env.selection.current(), "Agent ready");
    Ok(env)
}

fn show_config(config: &Config, sources: &[PathBuf], session: &Path) -> anyhow::Result<()> {
    println!("Configuration sources:");
    if sources.is_empty() {
        println!("  (none)");
    } else {
        for source in sources {
            println!("  {}", source.display());
        }
    }
    println!();
    println!("Session file: {}", session.display());
    println!();

    let mut shown = config.clone();
    if let Some(key) = shown.api.as_mut().and_then(|api| api.key.as_mut()) {
        *key = "<redacted>".to_string();
    }
    println!("Current configuration:");
    println!("{}", serde_json::to_string_pretty(&shown)?);

    Ok(())
}
