//! Provider error types.

use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised inside the gateway before they are folded into a
/// [`CompletionResult`](crate::CompletionResult).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed before a status was received.
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Missing API key.
    #[error("Missing API key for provider: {0}")]
    MissingApiKey(String),

    /// API key contains characters that cannot be sent in a header.
    #[error("Invalid API key for provider: {0}")]
    InvalidApiKey(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The request task died without producing a response.
    #[error("Request task failed: {0}")]
    TaskFailed(String),

    /// Internal provider error.
    #[error("Provider error: {message}")]
    Internal { message: String },
}

impl ProviderError {
    /// Create a missing API key error.
    pub fn missing_api_key(provider: impl Into<String>) -> Self {
        Self::MissingApiKey(provider.into())
    }

    /// Create an invalid API key error.
    pub fn invalid_api_key(provider: impl Into<String>) -> Self {
        Self::InvalidApiKey(provider.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Short classification used when reporting an exception outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RequestFailed(e) if e.is_timeout() => "Timeout",
            ProviderError::RequestFailed(e) if e.is_connect() => "ConnectError",
            ProviderError::RequestFailed(_) => "RequestFailed",
            ProviderError::MissingApiKey(_) => "MissingApiKey",
            ProviderError::InvalidApiKey(_) => "InvalidApiKey",
            ProviderError::Json(_) => "Json",
            ProviderError::TaskFailed(_) => "TaskFailed",
            ProviderError::Internal { .. } => "Internal",
        }
    }

    /// Render the error together with its source chain.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_display() {
        let err = ProviderError::invalid_api_key("anthropic");
        assert_eq!(err.kind(), "InvalidApiKey");
        assert_eq!(err.to_string(), "Invalid API key for provider: anthropic");
        assert_eq!(ProviderError::internal("tls").kind(), "Internal");
    }

    #[test]
    fn test_chain_includes_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ProviderError::from(json_err);
        let chain = err.chain();
        assert!(chain.starts_with("JSON error:"));
        assert!(chain.contains("caused by"));
    }
}
