//! LLM gateway for tendril.
//!
//! This crate owns everything that crosses the wire to the model:
//! - content block and message types in the provider's own JSON shape
//! - usage accounting and pricing
//! - the model catalogue and the one-shot model selection
//! - the [`ResponseGateway`] trait and its Anthropic implementation
//!
//! A gateway never fails. Transport errors, unexpected payloads and user
//! cancellation are all folded into a tagged [`CompletionResult`].

pub mod anthropic;
pub mod cancel;
pub mod completion;
pub mod error;
pub mod gateway;
pub mod message;
pub mod model;
pub mod scripted;
pub mod usage;

pub use anthropic::AnthropicGateway;
pub use cancel::{race_with_cancel, RaceOutcome, CANCEL_POLL_INTERVAL};
pub use completion::{CompletionResult, FailureDetail, Outcome, ToolRequest};
pub use error::{ProviderError, ProviderResult};
pub use gateway::{CompletionRequest, ResponseGateway, TokenCount, TokenCountRequest, ToolSchema};
pub use message::{CacheControl, ContentBlock, ImageSource, Message, Role};
pub use model::{ModelSelection, ModelTier, DEFAULT_OUTPUT_TOKENS, MAX_INPUT_TOKENS, THINKING_BUDGET};
pub use scripted::ScriptedGateway;
pub use usage::{ModelTag, TokenCounts, UsageAccount};
