//! The interactive chat loop.

use crate::terminal::TerminalSink;
use std::path::Path;
use tendril_core::{AgentEnv, Conversation};
use tendril_provider::{ModelSelection, ModelTier};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One line of chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Message(String),
    /// Switch the default model.
    Model(ModelTier),
    /// Use a model for the next completion only.
    ModelOnce(ModelTier),
    Quit,
    Empty,
    Unknown(String),
}

impl ChatCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            "" => ChatCommand::Empty,
            "/sonnet" => ChatCommand::Model(ModelTier::Sonnet),
            "/opus" => ChatCommand::Model(ModelTier::Opus),
            "/opus-once" => ChatCommand::ModelOnce(ModelTier::Opus),
            "/quit" | "/exit" => ChatCommand::Quit,
            cmd if cmd.starts_with('/') => ChatCommand::Unknown(cmd.to_string()),
            _ => ChatCommand::Message(trimmed.to_string()),
        }
    }

    /// Apply a model command to `selection`. Returns false for anything
    /// else.
    pub fn apply(&self, selection: &mut ModelSelection) -> bool {
        match self {
            ChatCommand::Model(model) => *selection = ModelSelection::fixed(*model),
            ChatCommand::ModelOnce(model) => *selection = selection.one_shot(*model),
            _ => return false,
        }
        true
    }
}

/// Run one message to completion, cancelling it on Ctrl-C, and save.
pub async fn run_interaction(
    conversation: &mut Conversation,
    message: String,
    env: &mut AgentEnv,
    sink: &mut TerminalSink<std::io::Stdout>,
    session: &Path,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt requested");
                cancel.cancel();
            }
        }
    });

    conversation.run_message(message, env, sink, &cancel).await;
    watcher.abort();

    conversation.save(session).await?;
    Ok(())
}

/// Read lines from stdin until `/quit`, EOF or Ctrl-C while idle.
pub async fn chat_loop(
    mut conversation: Conversation,
    mut env: AgentEnv,
    session: &Path,
) -> anyhow::Result<()> {
    let mut sink = TerminalSink::stdout();
    conversation.render(&mut sink);

    println!(
        "tendril {} ({}). /sonnet, /opus, /opus-once, /quit. Ctrl-C interrupts.",
        env!("CARGO_PKG_VERSION"),
        env.selection.current()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt while idle, exiting");
                break;
            }
        };
        let Some(line) = line else { break };

        let command = ChatCommand::parse(&line);
        if command.apply(&mut env.selection) {
            println!("model: {}", describe_selection(&env.selection));
            continue;
        }
        match command {
            ChatCommand::Message(message) => {
                run_interaction(&mut conversation, message, &mut env, &mut sink, session).await?;
            }
            ChatCommand::Quit => break,
            ChatCommand::Unknown(cmd) => {
                warn!(command = %cmd, "Unknown chat command");
                println!("unknown command: {cmd}");
            }
            _ => {}
        }
    }
    Ok(())
}

pub fn describe_selection(selection: &ModelSelection) -> String {
    match selection {
        ModelSelection::Fixed { model } => model.to_string(),
        ModelSelection::OneShot { once, then } => format!("{once} once, then {then}"),
    }
}
