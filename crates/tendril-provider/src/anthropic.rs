//! Anthropic messages API gateway.

use crate::cancel::{race_with_cancel, RaceOutcome, CANCEL_POLL_INTERVAL};
use crate::completion::{CompletionResult, Outcome};
use crate::error::ProviderError;
use crate::gateway::{CompletionRequest, ResponseGateway, TokenCount, TokenCountRequest, ToolSchema};
use crate::message::{ContentBlock, Message};
use crate::model::ModelTier;
use crate::usage::TokenCounts;
use crate::ProviderResult;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The Anthropic API base URL.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

/// The Anthropic API version.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Beta features enabled for every request.
const ANTHROPIC_BETA: &str = "interleaved-thinking-2025-05-14";

/// Wall-clock limit for a completion request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Wall-clock limit for a token-count request.
pub const DEFAULT_COUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway to the Anthropic messages API.
pub struct AnthropicGateway {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    count_timeout: Duration,
    poll_interval: Duration,
}

impl AnthropicGateway {
    /// Create a gateway with an API key.
    pub fn new(api_key: &str) -> ProviderResult<Self> {
        Self::with_base_url(api_key, ANTHROPIC_API_URL)
    }

    /// Create a gateway with a custom base URL.
    pub fn with_base_url(api_key: &str, base_url: &str) -> ProviderResult<Self> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::missing_api_key("anthropic"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|_| ProviderError::invalid_api_key("anthropic"))?,
        );
        headers.insert("anthropic-beta", HeaderValue::from_static(ANTHROPIC_BETA));
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        debug!(base_url, "Creating Anthropic gateway");

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            count_timeout: DEFAULT_COUNT_TIMEOUT,
            poll_interval: CANCEL_POLL_INTERVAL,
        })
    }

    /// Override request and count timeouts.
    pub fn with_timeouts(mut self, request: Duration, count: Duration) -> Self {
        self.request_timeout = request;
        self.count_timeout = count;
        self
    }

    /// Override how often an outstanding request checks for cancellation.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll_interval = poll;
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn count_url(&self) -> String {
        format!("{}/v1/messages/count_tokens", self.base_url)
    }

    /// Classify a finished HTTP exchange.
    fn classify(status: u16, body: &str, model: ModelTier) -> CompletionResult {
        if !(200..300).contains(&status) {
            warn!(status, "Messages API returned an error status");
            return CompletionResult::http_error(status, pretty_body(body), model);
        }

        let response: MessagesResponse = match serde_json::from_str(body) {
            Ok(r) => r,
            Err(e) => {
                let err = ProviderError::from(e);
                warn!(error = %err, "Failed to parse messages response");
                return CompletionResult::exception(err.kind(), err.to_string(), err.chain(), model);
            }
        };

        let outcome = Outcome::from_stop_reason(response.stop_reason.as_deref());
        match outcome {
            Outcome::Refusal => warn!("Model refused to generate content"),
            Outcome::UnexpectedStop => {
                warn!(stop_reason = ?response.stop_reason, "Unexpected stop reason")
            }
            _ => {}
        }

        info!(
            outcome = ?outcome,
            blocks = response.content.len(),
            input_tokens = response.usage.map(|u| u.input_tokens),
            output_tokens = response.usage.map(|u| u.output_tokens),
            "Completion received"
        );

        CompletionResult::completed(outcome, response.content, response.usage, model)
    }
}

/// Pretty-print a JSON error body, or return it untouched.
fn pretty_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| body.to_string())
}

async fn post_json<B: Serialize>(
    client: reqwest::Client,
    url: String,
    body: B,
    timeout: Duration,
) -> ProviderResult<(u16, String)> {
    let response = client.post(&url).timeout(timeout).json(&body).send().await?;
    let status = response.status().as_u16();
    let text = response.text().await?;
    Ok((status, text))
}

#[async_trait]
impl ResponseGateway for AnthropicGateway {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> CompletionResult {
        let model = request.model;
        let body = MessagesBody::from_request(request);

        info!(
            model = model.model_id(),
            messages = body.messages.len(),
            tools = body.tools.len(),
            "Sending completion request"
        );

        let call = post_json(
            self.client.clone(),
            self.messages_url(),
            body,
            self.request_timeout,
        );

        match race_with_cancel(call, cancel, self.poll_interval).await {
            RaceOutcome::Completed(Ok((status, text))) => Self::classify(status, &text, model),
            RaceOutcome::Completed(Err(err)) => {
                warn!(error = %err, "Completion request failed");
                CompletionResult::exception(err.kind(), err.to_string(), err.chain(), model)
            }
            RaceOutcome::Cancelled => {
                info!("Completion request cancelled by user");
                CompletionResult::interrupted(model)
            }
            RaceOutcome::Panicked(message) => {
                let err = ProviderError::TaskFailed(message);
                CompletionResult::exception(err.kind(), err.to_string(), err.chain(), model)
            }
        }
    }

    async fn count_tokens(&self, request: TokenCountRequest) -> TokenCount {
        let body = CountBody {
            model: request.model.model_id(),
            system: system_blocks(request.system),
            tools: request.tools,
            messages: request.messages,
        };

        let (status, text) = match post_json(
            self.client.clone(),
            self.count_url(),
            body,
            self.count_timeout,
        )
        .await
        {
            Ok(exchange) => exchange,
            Err(err) => {
                warn!(error = %err.chain(), "Token counting request failed");
                return TokenCount::Failed;
            }
        };

        if !(200..300).contains(&status) {
            warn!(status, body = %text, "Token counting returned an error status");
            return TokenCount::Failed;
        }

        match serde_json::from_str::<CountResponse>(&text) {
            Ok(count) => {
                debug!(input_tokens = count.input_tokens, "Counted tokens");
                TokenCount::Counted(count.input_tokens)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse token count response");
                TokenCount::Failed
            }
        }
    }
}

fn system_blocks(system: String) -> Vec<ContentBlock> {
    if system.is_empty() {
        Vec::new()
    } else {
        vec![ContentBlock::text(system)]
    }
}

// Wire types.

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesBody {
    model: &'static str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<ContentBlock>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSchema>,
    thinking: ThinkingConfig,
}

impl MessagesBody {
    fn from_request(request: CompletionRequest) -> Self {
        Self {
            model: request.model.model_id(),
            max_tokens: request.max_output_tokens,
            system: system_blocks(request.system),
            messages: request.messages,
            tools: request.tools,
            thinking: ThinkingConfig {
                kind: "enabled",
                budget_tokens: request.thinking_budget,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CountBody {
    model: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSchema>,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<TokenCounts>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    input_tokens: u64,
}
