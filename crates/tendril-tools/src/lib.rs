//! Tool implementations for tendril.
//!
//! This crate provides the tools the agent can call and the registry that
//! dispatches to them. The shell and Python tools are backed by persistent
//! sessions that live for one interaction and are torn down by
//! [`ToolRegistry::close`].

pub mod error;
pub mod outcome;
pub mod process;
pub mod registry;

// Tool implementations
pub mod bash;
pub mod edit;
pub mod python;

// Persistent session runtimes
pub mod repl;
pub mod shell;

pub use error::{ToolError, ToolResult};
pub use outcome::ToolOutcome;
pub use registry::{BuiltinTool, ToolRegistry, ToolsConfig};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tendril_provider::ToolSchema;
use tokio_util::sync::CancellationToken;

/// Context provided to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Id of the invocation, as issued by the model.
    pub invocation_id: String,
    /// Cancellation token. Long-running tools poll it.
    pub abort: CancellationToken,
}

impl ToolContext {
    pub fn new(invocation_id: impl Into<String>, abort: CancellationToken) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            abort,
        }
    }
}

/// A tool the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON schema of the input object.
    fn input_schema(&self) -> Value;

    /// Schema advertised in requests.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// Run one invocation.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutcome>;

    /// Release anything the tool holds. Called once when the owning
    /// registry closes.
    async fn cleanup(&self) -> ToolResult<()> {
        Ok(())
    }
}

/// A shared tool handle.
pub type BoxedTool = Arc<dyn Tool>;

/// Parse tool arguments, reporting problems as validation errors.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> ToolResult<T> {
    serde_json::from_value(args).map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))
}
