//! Tool error types.

use thiserror::Error;

/// Result type for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors that can occur during tool execution.
///
/// Errors fall into two classes. Domain failures mean the tool input or the
/// state of the world was wrong; they are reported back to the model as a
/// plain error. Runtime faults mean the tool itself broke; they carry a
/// diagnostic for the operator. See [`ToolError::is_domain`].
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An expected failure while carrying out a valid request.
    #[error("{0}")]
    ExecutionFailed(String),

    /// A path the command needs does not exist.
    #[error("The path {0} does not exist. Please provide a valid path.")]
    FileNotFound(String),

    /// A subprocess could not be started.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A subprocess stopped speaking the expected protocol.
    #[error("Session protocol error: {0}")]
    Protocol(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an execution failed error.
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound(path.into())
    }

    /// Create a spawn error.
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether this is a domain failure rather than a runtime fault.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            ToolError::Validation(_)
                | ToolError::ExecutionFailed(_)
                | ToolError::FileNotFound(_)
        )
    }

    /// The error and its source chain, one cause per line.
    pub fn diagnostic(&self) -> String {
        let mut out = format!("{self}");
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out.push_str("\n\n");
        out.push_str(&format!("{self:?}"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_classification() {
        assert!(ToolError::validation("bad").is_domain());
        assert!(ToolError::file_not_found("/x").is_domain());
        assert!(!ToolError::protocol("desync").is_domain());
        assert!(!ToolError::Io(std::io::Error::other("disk")).is_domain());
    }

    #[test]
    fn test_diagnostic_includes_cause() {
        let err = ToolError::spawn(
            "/bin/nope",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        let diagnostic = err.diagnostic();
        assert!(diagnostic.contains("Failed to spawn /bin/nope"));
        assert!(diagnostic.contains("caused by: no such file"));
    }
}
