//! One user message and everything the agent does in response.
//!
//! An interaction runs turns until the model stops asking for tools or the
//! user interrupts. It owns one [`ToolRegistry`] for exactly that long: the
//! registry is opened before the first turn and closed after the last,
//! whichever way the loop ends. Nothing escapes [`Interaction::run`]; every
//! failure is already folded into a turn or rendered as a notice.

use crate::agent::AgentEnv;
use crate::battery::Battery;
use crate::history::HistoryMode;
use crate::render::{user_element, RenderSink, NOTICE_AVATAR};
use crate::stats::{stats_element, stats_lines, stats_text};
use crate::turn::Turn;
use chrono::{DateTime, Local};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tendril_protocol::{ChatRole, UiBlock, UiElement};
use tendril_provider::cancel::panic_message;
use tendril_provider::{ContentBlock, Message, UsageAccount};
use tendril_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Prefix marking user text in history.
pub const USER_PREFIX: &str = "🧬 ";

/// A user message, its turns and the resulting accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_message: String,
    /// Position in the conversation, starting at 0.
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub turns: Vec<Turn>,
    pub start_time: DateTime<Local>,
    #[serde(default)]
    pub elapsed: Duration,
    /// Sum of this interaction's turn usages.
    #[serde(default)]
    pub usage: UsageAccount,
    /// Running total over the whole conversation, this interaction included.
    #[serde(default)]
    pub total_usage: UsageAccount,
    #[serde(default)]
    pub final_battery: Battery,
    /// The stats element as it was rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<UiElement>,
}

impl Interaction {
    pub fn new(user_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            index: 0,
            turns: Vec::new(),
            start_time: Local::now(),
            elapsed: Duration::ZERO,
            usage: UsageAccount::zero(),
            total_usage: UsageAccount::zero(),
            final_battery: Battery::FULL,
            stats: None,
        }
    }

    /// Run the interaction to completion.
    ///
    /// `previous` is the conversation so far, oldest first.
    pub async fn run(
        &mut self,
        env: &mut AgentEnv,
        previous: &[Interaction],
        sink: &mut dyn RenderSink,
        cancel: &CancellationToken,
    ) {
        self.index = previous.len();
        sink.render(&user_element(&self.user_message));
        info!(interaction = self.index, "Starting interaction");

        let registry = env.open_registry();
        self.start_time = Local::now();

        let looped = AssertUnwindSafe(self.run_turns(env, &registry, previous, sink, cancel))
            .catch_unwind()
            .await;
        registry.close().await;

        if let Err(payload) = looped {
            let message = panic_message(payload);
            error!(interaction = self.index, panic = %message, "Interaction loop panicked");
            sink.render(&UiElement::single(
                NOTICE_AVATAR,
                ChatRole::System,
                UiBlock::error(format!("Interaction aborted: {message}")),
            ));
        }

        self.finish(env, &registry, previous, sink).await;
    }

    async fn run_turns(
        &mut self,
        env: &mut AgentEnv,
        registry: &ToolRegistry,
        previous: &[Interaction],
        sink: &mut dyn RenderSink,
        cancel: &CancellationToken,
    ) {
        loop {
            let mut turn = Turn::new(self.turns.len(), self.index);
            let proceed = turn.run(env, registry, previous, self, sink, cancel).await;
            let interrupted_tools = !proceed && !turn.tool_results.is_empty();
            self.turns.push(turn);

            if proceed {
                continue;
            }
            if interrupted_tools {
                info!(interaction = self.index, "Tool execution interrupted, acknowledging");
                let ack = Turn::acknowledgment(self.turns.len(), self.index, env.selection.current());
                ack.render(sink);
                self.turns.push(ack);
            }
            break;
        }
    }

    async fn finish(
        &mut self,
        env: &AgentEnv,
        registry: &ToolRegistry,
        previous: &[Interaction],
        sink: &mut dyn RenderSink,
    ) {
        self.usage = self.turns.iter().map(Turn::usage).sum();
        self.total_usage = previous
            .last()
            .map(|p| p.total_usage)
            .unwrap_or_default()
            + self.usage;

        self.final_battery = env
            .measure_battery(previous, self, &registry.schemas())
            .await;
        self.elapsed = (Local::now() - self.start_time).to_std().unwrap_or_default();

        let prev_battery = previous.last().map_or(Battery::FULL, |p| p.final_battery);
        let lines = stats_lines(
            &self.usage,
            &self.total_usage,
            self.final_battery,
            prev_battery,
            env.limits.low_battery_threshold,
        );
        let stats = stats_element(stats_text(&lines, self.elapsed, self.index + 1));
        sink.render(&stats);
        self.stats = Some(stats);

        info!(
            interaction = self.index,
            turns = self.turns.len(),
            cost = self.usage.cost,
            battery = self.final_battery.as_f64(),
            "Interaction finished"
        );
    }

    /// Replay a stored interaction. Makes no requests.
    pub fn render(&self, sink: &mut dyn RenderSink) {
        sink.render(&user_element(&self.user_message));
        for turn in &self.turns {
            turn.render(sink);
        }
        if let Some(stats) = &self.stats {
            sink.render(stats);
        }
    }

    /// Messages this interaction contributes to history.
    pub fn messages(&self, mode: HistoryMode) -> Vec<Message> {
        let mut messages = vec![Message::user_blocks(vec![ContentBlock::text(format!(
            "{USER_PREFIX}{}",
            self.user_message
        ))])];
        for turn in &self.turns {
            messages.extend(turn.messages(mode));
        }
        messages
    }
}
