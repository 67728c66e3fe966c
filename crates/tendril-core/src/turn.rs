//! One completion plus the tool executions it asks for.

use crate::agent::AgentEnv;
use crate::history::{build_history, prepare_request, HistoryMode};
use crate::interaction::Interaction;
use crate::render::{completion_elements, RenderSink};
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tendril_provider::completion::EMPTY_PLACEHOLDER;
use tendril_provider::{
    CompletionRequest, CompletionResult, ContentBlock, Message, ModelTier, UsageAccount,
};
use tendril_tools::{ToolOutcome, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sent when a tool produced no blocks at all.
pub const EMPTY_TOOL_RESULT: &str = "<no output>";

/// A single completion and its tool results.
///
/// Tool results are keyed by invocation id and kept in the order the model
/// requested them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub index: usize,
    pub interaction_index: usize,
    pub timestamp: DateTime<Local>,
    #[serde(default)]
    pub completion: Option<CompletionResult>,
    #[serde(default)]
    pub tool_results: IndexMap<String, ToolOutcome>,
}

impl Turn {
    pub fn new(index: usize, interaction_index: usize) -> Self {
        Self {
            index,
            interaction_index,
            timestamp: Local::now(),
            completion: None,
            tool_results: IndexMap::new(),
        }
    }

    /// The synthetic turn that closes an interaction after tool execution
    /// was interrupted. No request is made for it.
    pub fn acknowledgment(index: usize, interaction_index: usize, model: ModelTier) -> Self {
        let mut turn = Self::new(index, interaction_index);
        let mut completion = CompletionResult::tool_interrupted_ack(model);
        completion.add_cycle_marker(&turn.cycle_marker());
        turn.completion = Some(completion);
        turn
    }

    /// Progress marker prefixed to the completion text.
    pub fn cycle_marker(&self) -> String {
        format!(
            "`🚲{}.{} {}`",
            self.interaction_index,
            self.index,
            self.timestamp.format("%H:%M:%S")
        )
    }

    /// Run the turn. Returns whether the interaction should continue.
    pub async fn run(
        &mut self,
        env: &mut AgentEnv,
        registry: &ToolRegistry,
        previous: &[Interaction],
        current: &Interaction,
        sink: &mut dyn RenderSink,
        cancel: &CancellationToken,
    ) -> bool {
        let tools = registry.schemas();
        let battery = env.measure_battery(previous, current, &tools).await;

        let mut messages = build_history(previous, current, &env.prompts.suffix, HistoryMode::Request);
        prepare_request(&mut messages, battery, env.limits.low_battery_threshold);

        let mut request = CompletionRequest::new(
            env.selection.current(),
            env.prompts.system.clone(),
            messages,
            tools,
        );
        request.max_output_tokens = env.limits.max_output_tokens;
        request.thinking_budget = env.limits.thinking_budget;

        info!(
            cycle = %format!("{}.{}", self.interaction_index, self.index),
            model = %request.model,
            battery = battery.as_f64(),
            "Requesting completion"
        );
        let mut completion = env.gateway.complete(request, cancel).await;
        completion.add_cycle_marker(&self.cycle_marker());
        if completion.outcome.is_success() {
            env.selection.consume();
        }
        debug!(outcome = ?completion.outcome, "Completion received");

        for element in completion_elements(&completion) {
            sink.render(&element);
        }

        let requests = completion.tool_requests();
        self.completion = Some(completion);
        if requests.is_empty() {
            return false;
        }

        for request in requests {
            let outcome = registry.dispatch(&request, cancel).await;
            for element in &outcome.elements {
                sink.render(element);
            }
            self.tool_results.insert(request.id, outcome);
        }

        !cancel.is_cancelled()
    }

    /// Usage of the completion, zero when there is none.
    pub fn usage(&self) -> UsageAccount {
        self.completion
            .as_ref()
            .map(CompletionResult::usage)
            .unwrap_or_default()
    }

    /// Replay the turn through `sink`.
    pub fn render(&self, sink: &mut dyn RenderSink) {
        if let Some(completion) = &self.completion {
            for element in completion_elements(completion) {
                sink.render(&element);
            }
        }
        for outcome in self.tool_results.values() {
            for element in &outcome.elements {
                sink.render(element);
            }
        }
    }

    /// Messages this turn contributes to history.
    pub fn messages(&self, mode: HistoryMode) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);

        if let Some(mut assistant) = self.completion.as_ref().and_then(CompletionResult::as_message) {
            if mode == HistoryMode::TokenCount {
                assistant.content.retain(|block| !block.is_thinking());
                if assistant.content.is_empty() {
                    assistant
                        .content
                        .push(ContentBlock::text(EMPTY_PLACEHOLDER));
                }
            }
            messages.push(assistant);
        }

        if !self.tool_results.is_empty() {
            let results = self
                .tool_results
                .iter()
                .map(|(id, outcome)| {
                    let mut content = outcome.as_llm_blocks();
                    if content.is_empty() {
                        content.push(ContentBlock::text(EMPTY_TOOL_RESULT));
                    }
                    let mut block = ContentBlock::tool_result(id.clone(), content);
                    if outcome.has_error() {
                        if let ContentBlock::ToolResult { is_error, .. } = &mut block {
                            *is_error = Some(true);
                        }
                    }
                    block
                })
                .collect();
            messages.push(Message::user_blocks(results));
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendril_provider::{Outcome, TokenCounts};

    #[test]
    fn test_cycle_marker_format() {
        let turn = Turn::new(2, 3);
        let marker = turn.cycle_marker();
        assert!(marker.starts_with("`🚲3.2 "));
        assert!(marker.ends_with('`'));
    }

    #[test]
    fn test_acknowledgment_turn() {
        let turn = Turn::acknowledgment(1, 0, ModelTier::Sonnet);
        let completion = turn.completion.as_ref().unwrap();
        assert_eq!(completion.outcome, Outcome::EndTurn);
        assert!(completion.usage().is_empty());
        let text = completion.content[0].as_text().unwrap();
        assert!(text.starts_with("`🚲0.1 "));
        assert!(text.ends_with("🛑 Tool execution interrupted by user."));
    }

    #[test]
    fn test_usage_of_empty_turn_is_zero() {
        assert!(Turn::new(0, 0).usage().is_empty());

        let mut turn = Turn::new(0, 0);
        turn.completion = Some(CompletionResult::completed(
            Outcome::EndTurn,
            vec![ContentBlock::text("hi")],
            Some(TokenCounts::new(10, 5)),
            ModelTier::Sonnet,
        ));
        assert_eq!(turn.usage().input_tokens, 10);
    }

    #[test]
    fn test_empty_tool_output_gets_placeholder() {
        let mut turn = Turn::new(0, 0);
        turn.tool_results
            .insert("t1".into(), ToolOutcome::from_blocks("🐍", vec![]));
        let messages = turn.messages(HistoryMode::Request);
        match &messages[0].content[0] {
            ContentBlock::ToolResult { content, is_error, .. } => {
                assert_eq!(content[0].as_text(), Some(EMPTY_TOOL_RESULT));
                assert_eq!(*is_error, None);
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn test_error_outcome_marks_tool_result() {
        let mut turn = Turn::new(0, 0);
        turn.tool_results
            .insert("t1".into(), ToolOutcome::unavailable("nope"));
        let messages = turn.messages(HistoryMode::Request);
        assert!(matches!(
            messages[0].content[0],
            ContentBlock::ToolResult {
                is_error: Some(true),
                ..
            }
        ));
    }
}
