//! Tool registry.
//!
//! A registry is opened at the start of an interaction and closed at its
//! end. Closing runs every tool's cleanup exactly once, which is what tears
//! down the persistent shell and interpreter.

use crate::bash::BashTool;
use crate::edit::EditTool;
use crate::python::PythonTool;
use crate::{BoxedTool, ToolContext, ToolOutcome};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tendril_provider::cancel::panic_message;
use tendril_provider::{ToolRequest, ToolSchema};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings for the built-in tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Default `bash_tool` timeout in seconds.
    pub bash_timeout_secs: u64,
    /// Default `python_tool` timeout in seconds.
    pub python_timeout_secs: u64,
    /// Shell program backing `bash_tool`.
    pub shell: String,
    /// Interpreter backing `python_tool`.
    pub python: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bash_timeout_secs: crate::bash::DEFAULT_TIMEOUT_SECS,
            python_timeout_secs: crate::python::DEFAULT_TIMEOUT_SECS,
            shell: crate::shell::DEFAULT_SHELL.to_string(),
            python: crate::repl::DEFAULT_PYTHON.to_string(),
        }
    }
}

/// The tools every interaction starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    Bash,
    Python,
    Edit,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 3] = [BuiltinTool::Bash, BuiltinTool::Python, BuiltinTool::Edit];

    /// Name the model calls the tool by.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinTool::Bash => "bash_tool",
            BuiltinTool::Python => "python_tool",
            BuiltinTool::Edit => "edit_tool",
        }
    }

    /// Build a fresh instance.
    pub fn instantiate(&self, config: &ToolsConfig) -> BoxedTool {
        match self {
            BuiltinTool::Bash => Arc::new(BashTool::new(
                config.shell.clone(),
                Duration::from_secs(config.bash_timeout_secs),
            )),
            BuiltinTool::Python => Arc::new(PythonTool::new(
                config.python.clone(),
                Duration::from_secs(config.python_timeout_secs),
            )),
            BuiltinTool::Edit => Arc::new(EditTool::new()),
        }
    }
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
    index: HashMap<String, usize>,
    closed: AtomicBool,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Create a registry with fresh instances of all built-in tools.
    pub fn open(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        for builtin in BuiltinTool::ALL {
            registry.register(builtin.instantiate(config));
        }
        debug!(tools = registry.tools.len(), "Opened tool registry");
        registry
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: BoxedTool) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.index.get(name).map(|&slot| &self.tools[slot])
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|tool| tool.schema()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run one tool request. Never fails: every problem becomes an outcome.
    pub async fn dispatch(&self, request: &ToolRequest, abort: &CancellationToken) -> ToolOutcome {
        if abort.is_cancelled() {
            info!(tool = %request.name, id = %request.id, "Skipping tool, already interrupted");
            return ToolOutcome::skipped();
        }

        let Some(tool) = self.get(&request.name) else {
            warn!(tool = %request.name, "Model asked for an unknown tool");
            return ToolOutcome::unavailable(&request.name);
        };

        let ctx = ToolContext::new(request.id.clone(), abort.clone());
        debug!(tool = %request.name, id = %request.id, "Executing tool");

        let run = AssertUnwindSafe(tool.execute(request.input.clone(), &ctx)).catch_unwind();
        match run.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_domain() => {
                debug!(tool = %request.name, error = %e, "Tool reported an error");
                ToolOutcome::domain_error(&request.name, &e)
            }
            Ok(Err(e)) => {
                error!(tool = %request.name, error = %e, diagnostic = %e.diagnostic(), "Tool failed");
                ToolOutcome::runtime_fault(&request.name, &e, e.diagnostic())
            }
            Err(payload) => {
                let message = panic_message(payload);
                error!(tool = %request.name, panic = %message, "Tool panicked");
                ToolOutcome::runtime_fault(&request.name, &message, format!("panic: {message}"))
            }
        }
    }

    /// Clean up every tool. Only the first call does anything. Failures are
    /// logged and swallowed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        cleanup_all(self.tools.clone()).await;
        debug!("Closed tool registry");
    }
}

async fn cleanup_all(tools: Vec<BoxedTool>) {
    for tool in tools {
        let name = tool.name().to_string();
        match AssertUnwindSafe(tool.cleanup()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(tool = %name, error = %e, "Tool cleanup failed"),
            Err(payload) => {
                warn!(tool = %name, panic = %panic_message(payload), "Tool cleanup panicked")
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ToolRegistry {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tools = std::mem::take(&mut self.tools);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Tool registry dropped without close, cleaning up in background");
                handle.spawn(cleanup_all(tools));
            }
            Err(_) => warn!("Tool registry dropped outside a runtime, skipping cleanup"),
        }
    }
}
