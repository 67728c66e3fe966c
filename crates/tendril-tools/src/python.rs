//! Python tool - run code in a persistent interpreter.

use crate::bash::resolve_timeout;
use crate::repl::{ReplSession, SnippetOutput, SnippetStatus};
use crate::{parse_args, Tool, ToolContext, ToolError, ToolOutcome, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tendril_protocol::UiBlock;
use tokio::sync::Mutex;
use tracing::info;

/// Avatar for interpreter output.
pub const PYTHON_AVATAR: &str = "🐍";

/// Default timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Execute Python code with state kept between calls.
pub struct PythonTool {
    session: Mutex<ReplSession>,
    default_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PythonArgs {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    restart: bool,
    #[serde(default)]
    timeout_s: Option<f64>,
}

impl PythonTool {
    pub fn new(python: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            session: Mutex::new(ReplSession::new(python)),
            default_timeout,
        }
    }

    /// Pid of the interpreter currently backing the tool.
    pub async fn interpreter_pid(&self) -> Option<u32> {
        self.session.lock().await.pid()
    }
}

impl Default for PythonTool {
    fn default() -> Self {
        Self::new(
            crate::repl::DEFAULT_PYTHON,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }
}

fn output_blocks(result: &SnippetOutput) -> Vec<UiBlock> {
    let mut blocks = Vec::new();

    let output = result.output.trim();
    if !output.is_empty() {
        blocks.push(UiBlock::code(output).with_meta("output"));
    }

    match result.status {
        SnippetStatus::Completed => {}
        SnippetStatus::TimedOut { timeout, .. } => {
            blocks.push(
                UiBlock::warning(format!(
                    "⌛️ Code execution timed out after {}s",
                    timeout.as_secs_f64()
                ))
                .with_meta("status"),
            );
            blocks.push(UiBlock::info("Exit code: 1").with_meta("exit_code"));
        }
        SnippetStatus::Interrupted => blocks.push(
            UiBlock::warning("🛑 Code execution interrupted by user").with_meta("status"),
        ),
        SnippetStatus::Exited => blocks.push(
            UiBlock::info("Python interpreter exited; the next call starts a fresh one")
                .with_meta("status"),
        ),
    }

    blocks
}

#[async_trait]
impl Tool for PythonTool {
    fn name(&self) -> &str {
        "python_tool"
    }

    fn description(&self) -> &str {
        r#"Execute Python code with state persistence

## Implementation Details
* The tool runs Python code in a separate process for stability and isolation
* Code runs in an interactive Python interpreter that maintains state between calls
* Variables, functions, and classes defined in one call persist in subsequent calls
* Standard output and errors are captured and returned

## Usage Considerations
* You can leverage Python's standard libraries for various tasks
* Execution is controlled with timeouts and can be interrupted by the user
* Use restart=True to reset the Python environment if needed"#
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute. Required unless restart=True is specified."
                },
                "restart": {
                    "type": "boolean",
                    "description": "Specify true to restart the Python interpreter (clearing all variables). Use this if previous code has caused issues or you want a clean environment."
                },
                "timeout_s": {
                    "type": "integer",
                    "description": "Specify this if your code may take longer than the default timeout. Only use this for legitimately long-running operations, not to work around code that hangs."
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutcome> {
        let args: PythonArgs = parse_args(args)?;
        let mut session = self.session.lock().await;

        if args.restart {
            info!("Restarting Python session");
            session.stop().await?;
            return Ok(ToolOutcome::from_blocks(
                PYTHON_AVATAR,
                vec![UiBlock::info("Python session has been restarted")],
            ));
        }

        let code = args
            .code
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::validation("The code parameter is required"))?;
        let timeout = resolve_timeout(args.timeout_s, self.default_timeout)?;

        let result = session.execute(&code, timeout, &ctx.abort).await?;
        Ok(ToolOutcome::from_blocks(PYTHON_AVATAR, output_blocks(&result)))
    }

    async fn cleanup(&self) -> ToolResult<()> {
        self.session.lock().await.stop().await
    }
}
