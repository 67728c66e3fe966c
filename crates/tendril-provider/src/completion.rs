//! Completion results and their outcome classification.

use crate::message::{ContentBlock, Message};
use crate::model::ModelTier;
use crate::usage::{TokenCounts, UsageAccount};
use serde::{Deserialize, Serialize};

/// Notice shown when the user cancels an outstanding request.
pub const RESPONSE_CANCELLED: &str = "🛑 Response cancelled by user";

/// Notice used for the acknowledgment after interrupted tool execution.
pub const TOOL_EXECUTION_INTERRUPTED: &str = "🛑 Tool execution interrupted by user.";

/// Text substituted for an assistant message with no usable content.
pub const EMPTY_PLACEHOLDER: &str = "<empty response from LLM>";

/// How a completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// The model wants tools run.
    ToolUse,
    /// The model finished its turn.
    EndTurn,
    /// The model stopped for any other reason (max tokens, stop sequence).
    UnexpectedStop,
    /// The model declined to answer.
    Refusal,
    /// The API answered with a non-success status.
    HttpError,
    /// The request failed without an HTTP status.
    Exception,
    /// The user cancelled the request.
    Interrupted,
}

impl Outcome {
    /// Map an API `stop_reason`.
    pub fn from_stop_reason(reason: Option<&str>) -> Self {
        match reason {
            Some("tool_use") => Outcome::ToolUse,
            Some("end_turn") => Outcome::EndTurn,
            Some("refusal") => Outcome::Refusal,
            _ => Outcome::UnexpectedStop,
        }
    }

    /// Transport or runtime failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::HttpError | Outcome::Exception)
    }

    /// The model actually produced a completion.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::ToolUse | Outcome::EndTurn | Outcome::UnexpectedStop | Outcome::Refusal
        )
    }
}

/// Details kept for failed requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureDetail {
    Http { status: u16, body: String },
    Exception {
        error_type: String,
        message: String,
        trace: String,
    },
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// The result of one completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub outcome: Outcome,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Option<TokenCounts>,
    pub model: ModelTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl CompletionResult {
    /// A completion the model actually produced.
    pub fn completed(
        outcome: Outcome,
        content: Vec<ContentBlock>,
        usage: Option<TokenCounts>,
        model: ModelTier,
    ) -> Self {
        Self {
            outcome,
            content,
            usage,
            model,
            failure: None,
        }
    }

    /// The request was cancelled by the user.
    pub fn interrupted(model: ModelTier) -> Self {
        Self::completed(
            Outcome::Interrupted,
            vec![ContentBlock::text(RESPONSE_CANCELLED)],
            None,
            model,
        )
    }

    /// Canned acknowledgment after tool execution was interrupted. No
    /// request is made for it.
    pub fn tool_interrupted_ack(model: ModelTier) -> Self {
        Self::completed(
            Outcome::EndTurn,
            vec![ContentBlock::text(TOOL_EXECUTION_INTERRUPTED)],
            None,
            model,
        )
    }

    /// The API answered with a non-success status.
    pub fn http_error(status: u16, body: impl Into<String>, model: ModelTier) -> Self {
        let body = body.into();
        Self {
            outcome: Outcome::HttpError,
            content: vec![ContentBlock::text(format!(
                "⚠️ HTTP Error ({status}):\n{body}"
            ))],
            usage: None,
            model,
            failure: Some(FailureDetail::Http { status, body }),
        }
    }

    /// The request failed before a status was received.
    pub fn exception(
        error_type: impl Into<String>,
        message: impl Into<String>,
        trace: impl Into<String>,
        model: ModelTier,
    ) -> Self {
        let error_type = error_type.into();
        let message = message.into();
        Self {
            outcome: Outcome::Exception,
            content: vec![ContentBlock::text(format!(
                "⚠️ Exception during API call:\n{error_type}: {message}"
            ))],
            usage: None,
            model,
            failure: Some(FailureDetail::Exception {
                error_type,
                message,
                trace: trace.into(),
            }),
        }
    }

    /// Priced usage. Always an account, zero when the API reported none.
    pub fn usage(&self) -> UsageAccount {
        self.usage
            .as_ref()
            .map(|counts| UsageAccount::from_counts(counts, self.model))
            .unwrap_or_default()
    }

    /// Whether the model asked for tools.
    pub fn has_tool_requests(&self) -> bool {
        self.outcome == Outcome::ToolUse
    }

    /// Tool invocations, in the order the model emitted them. Empty unless
    /// the outcome is `ToolUse`.
    pub fn tool_requests(&self) -> Vec<ToolRequest> {
        if !self.has_tool_requests() {
            return Vec::new();
        }
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolRequest {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Prefix the first text block with a progress marker, replacing a
    /// marker left by an earlier call.
    pub fn add_cycle_marker(&mut self, marker: &str) {
        let first_text = self.content.iter_mut().find_map(|block| match block {
            ContentBlock::Text { text, .. } => Some(text),
            _ => None,
        });
        if let Some(text) = first_text {
            let mut lines: Vec<&str> = text.lines().collect();
            if lines.is_empty() {
                lines.push("<No content>");
            }
            let start = usize::from(lines[0].contains('🚲'));
            *text = format!("{marker}\n\n{}", lines[start..].join("\n"));
        }
    }

    /// The assistant message this completion contributes to history.
    /// Failed requests contribute nothing. Tool invocations are kept only
    /// when the outcome is `ToolUse`, since no other outcome gets results
    /// for them.
    pub fn as_message(&self) -> Option<Message> {
        if self.outcome.is_error() {
            return None;
        }
        let keep_tool_use = self.has_tool_requests();
        let mut content: Vec<ContentBlock> = self
            .content
            .iter()
            .filter(|block| match block {
                ContentBlock::Unsupported => false,
                ContentBlock::ToolUse { .. } => keep_tool_use,
                _ => true,
            })
            .cloned()
            .collect();
        if content.is_empty() {
            content.push(ContentBlock::text(EMPTY_PLACEHOLDER));
        }
        Some(Message::assistant_blocks(content))
    }
}
