//! The gateway abstraction the agent loop talks to.

use crate::completion::CompletionResult;
use crate::message::Message;
use crate::model::{ModelTier, DEFAULT_OUTPUT_TOKENS, THINKING_BUDGET};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Tool schema advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Everything needed to issue one completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: ModelTier,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_output_tokens: u32,
    pub thinking_budget: u32,
}

impl CompletionRequest {
    /// Create a request with default output and thinking limits.
    pub fn new(
        model: ModelTier,
        system: impl Into<String>,
        messages: Vec<Message>,
        tools: Vec<ToolSchema>,
    ) -> Self {
        Self {
            model,
            system: system.into(),
            messages,
            tools,
            max_output_tokens: DEFAULT_OUTPUT_TOKENS,
            thinking_budget: THINKING_BUDGET,
        }
    }
}

/// A non-generating request that only asks for an input token count.
#[derive(Debug, Clone)]
pub struct TokenCountRequest {
    pub model: ModelTier,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// Result of a token-count dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCount {
    Counted(u64),
    /// Counting failed. Callers degrade instead of aborting.
    Failed,
}

impl TokenCount {
    /// The count, or -1 when counting failed.
    pub fn as_i64(&self) -> i64 {
        match self {
            TokenCount::Counted(n) => *n as i64,
            TokenCount::Failed => -1,
        }
    }
}

/// Issues completions and token counts against a hosted model.
///
/// Neither method returns an error. `complete` folds every failure,
/// including cancellation through `cancel`, into the returned
/// [`CompletionResult`]; `count_tokens` reports [`TokenCount::Failed`].
#[async_trait]
pub trait ResponseGateway: Send + Sync {
    /// Issue one completion request.
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> CompletionResult;

    /// Count the input tokens `request` would consume.
    async fn count_tokens(&self, request: TokenCountRequest) -> TokenCount;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_count_is_negative_one() {
        assert_eq!(TokenCount::Failed.as_i64(), -1);
        assert_eq!(TokenCount::Counted(1234).as_i64(), 1234);
    }

    #[test]
    fn test_request_defaults() {
        let request = CompletionRequest::new(ModelTier::Opus, "sys", vec![], vec![]);
        assert_eq!(request.max_output_tokens, DEFAULT_OUTPUT_TOKENS);
        assert_eq!(request.thinking_budget, THINKING_BUDGET);
    }
}
