//! Scripted gateway for testing.

use crate::cancel::{race_with_cancel, RaceOutcome};
use crate::completion::{CompletionResult, Outcome};
use crate::gateway::{CompletionRequest, ResponseGateway, TokenCount, TokenCountRequest};
use crate::message::ContentBlock;
use crate::usage::TokenCounts;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A queued response.
#[derive(Debug, Clone)]
struct ScriptedResponse {
    outcome: Outcome,
    content: Vec<ContentBlock>,
    usage: Option<TokenCounts>,
    delay: Duration,
}

/// Gateway that replays queued responses and records every request.
///
/// Responses are served in order. The serving model recorded on each
/// result is the one the request asked for. A delayed response can be
/// cancelled like a real request.
#[derive(Clone)]
pub struct ScriptedGateway {
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    count_requests: Arc<Mutex<Vec<TokenCountRequest>>>,
    token_count: Arc<Mutex<TokenCount>>,
    poll_interval: Duration,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    /// Create a gateway with an empty script that counts 1000 tokens.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            count_requests: Arc::new(Mutex::new(Vec::new())),
            token_count: Arc::new(Mutex::new(TokenCount::Counted(1000))),
            poll_interval: Duration::from_millis(20),
        }
    }

    fn push(&self, response: ScriptedResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Queue a plain text answer.
    pub fn push_text(&self, text: impl Into<String>, usage: TokenCounts) -> &Self {
        self.push(ScriptedResponse {
            outcome: Outcome::EndTurn,
            content: vec![ContentBlock::text(text)],
            usage: Some(usage),
            delay: Duration::ZERO,
        })
    }

    /// Queue a tool-use answer with one text block followed by `calls`.
    pub fn push_tool_calls(
        &self,
        text: impl Into<String>,
        calls: Vec<(String, String, serde_json::Value)>,
        usage: TokenCounts,
    ) -> &Self {
        let mut content = vec![ContentBlock::text(text)];
        content.extend(
            calls
                .into_iter()
                .map(|(id, name, input)| ContentBlock::tool_use(id, name, input)),
        );
        self.push(ScriptedResponse {
            outcome: Outcome::ToolUse,
            content,
            usage: Some(usage),
            delay: Duration::ZERO,
        })
    }

    /// Queue an arbitrary outcome and content.
    pub fn push_outcome(
        &self,
        outcome: Outcome,
        content: Vec<ContentBlock>,
        usage: Option<TokenCounts>,
    ) -> &Self {
        self.push(ScriptedResponse {
            outcome,
            content,
            usage,
            delay: Duration::ZERO,
        })
    }

    /// Queue a text answer that only arrives after `delay`.
    pub fn push_delayed_text(&self, text: impl Into<String>, delay: Duration) -> &Self {
        self.push(ScriptedResponse {
            outcome: Outcome::EndTurn,
            content: vec![ContentBlock::text(text)],
            usage: Some(TokenCounts::new(1, 1)),
            delay,
        })
    }

    /// Set what `count_tokens` reports.
    pub fn set_token_count(&self, count: TokenCount) {
        *self.token_count.lock().unwrap() = count;
    }

    /// Completion requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Token-count requests received so far.
    pub fn count_requests(&self) -> Vec<TokenCountRequest> {
        self.count_requests.lock().unwrap().clone()
    }

    /// Responses still queued.
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ResponseGateway for ScriptedGateway {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> CompletionResult {
        let model = request.model;
        self.requests.lock().unwrap().push(request);

        let next = self.responses.lock().unwrap().pop_front();
        let Some(response) = next else {
            return CompletionResult::exception(
                "ScriptExhausted",
                "no scripted response left",
                "",
                model,
            );
        };

        let delay = response.delay;
        let serve = async move {
            tokio::time::sleep(delay).await;
            response
        };

        match race_with_cancel(serve, cancel, self.poll_interval).await {
            RaceOutcome::Completed(r) => {
                CompletionResult::completed(r.outcome, r.content, r.usage, model)
            }
            RaceOutcome::Cancelled => CompletionResult::interrupted(model),
            RaceOutcome::Panicked(message) => {
                CompletionResult::exception("TaskFailed", message, "", model)
            }
        }
    }

    async fn count_tokens(&self, request: TokenCountRequest) -> TokenCount {
        self.count_requests.lock().unwrap().push(request);
        *self.token_count.lock().unwrap()
    }
}
