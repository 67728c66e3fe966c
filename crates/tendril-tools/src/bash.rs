//! Bash tool - run commands in a persistent shell.
//!
//! Executes shell commands with:
//! - State that persists across calls (cwd, variables, background jobs)
//! - A per-call timeout (default 60 seconds)
//! - Cooperative interruption through the invocation's abort token
//! - Process-group teardown, so a killed command leaves nothing behind

use crate::shell::{CommandOutput, CommandStatus, ShellSession};
use crate::{parse_args, Tool, ToolContext, ToolError, ToolOutcome, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tendril_protocol::UiBlock;
use tokio::sync::Mutex;
use tracing::info;

/// Avatar for shell output.
pub const BASH_AVATAR: &str = "📺";

/// Default timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Longest timeout a call may ask for, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 600;

/// Run commands in a persistent bash shell.
pub struct BashTool {
    session: Mutex<ShellSession>,
    default_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct BashArgs {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    restart: bool,
    #[serde(default)]
    timeout_s: Option<f64>,
}

impl BashTool {
    pub fn new(shell: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            session: Mutex::new(ShellSession::new(shell)),
            default_timeout,
        }
    }

    /// Pid of the shell currently backing the tool.
    pub async fn shell_pid(&self) -> Option<u32> {
        self.session.lock().await.pid()
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new(
            crate::shell::DEFAULT_SHELL,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }
}

/// Resolve an optional `timeout_s` argument, capped at
/// [`MAX_TIMEOUT_SECS`].
pub(crate) fn resolve_timeout(timeout_s: Option<f64>, default: Duration) -> ToolResult<Duration> {
    let invalid = |secs: f64| {
        ToolError::validation(format!(
            "Invalid `timeout_s`: {secs}. It should be a positive number of seconds."
        ))
    };
    match timeout_s {
        None => Ok(default),
        Some(secs) if secs > 0.0 => {
            Duration::try_from_secs_f64(secs.min(MAX_TIMEOUT_SECS as f64))
                .map_err(|_| invalid(secs))
        }
        Some(secs) => Err(invalid(secs)),
    }
}

/// Render command output as blocks.
fn output_blocks(output: &CommandOutput) -> Vec<UiBlock> {
    let mut blocks = Vec::new();

    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        blocks.push(UiBlock::code(stdout).with_meta("stdout"));
    }
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        blocks.push(UiBlock::error(stderr).with_meta("stderr"));
    }

    match output.status {
        CommandStatus::TimedOut(timeout) => blocks.push(
            UiBlock::warning(format!(
                "⌛️ Command timed out after {}s",
                timeout.as_secs_f64()
            ))
            .with_meta("status"),
        ),
        CommandStatus::Interrupted => {
            blocks.push(UiBlock::warning("🛑 Command interrupted by user").with_meta("status"))
        }
        CommandStatus::Completed | CommandStatus::ShellExited => {}
    }

    if let Some(code) = output.exit_code.filter(|code| *code != 0) {
        blocks.push(UiBlock::info(format!("Exit code: {code}")).with_meta("exit_code"));
    }

    blocks
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash_tool"
    }

    fn description(&self) -> &str {
        r#"Run commands in a bash shell
* When invoking this tool, the contents of the 'command' parameter does NOT need to be XML-escaped.
* State is persistent across command calls and discussions with the user.
* To inspect a particular line range of a file, e.g. lines 10-25, try 'sed -n 10,25p /path/to/the/file'.
* Please avoid commands that may produce a very large amount of output.
* Please run long lived commands in the background, e.g. 'sleep 10 &' or start a server in the background."#
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The bash command to run. Required unless the tool is being restarted."
                },
                "restart": {
                    "type": "boolean",
                    "description": "Specifying true will restart this tool. Otherwise, leave this unspecified."
                },
                "timeout_s": {
                    "type": "integer",
                    "default": self.default_timeout.as_secs(),
                    "description": format!(
                        "Specify this if you need to perform an operation that is likely to take longer than the default value of {}. \
                         Do NOT use it blindly if a prior tool-execution timed out. Consider whether the timeout was due to an actual \
                         need for more time (running a test, building an image, installing a package) or a more fundamental problem \
                         (an interactive editor, a command that never terminates, a test that should have completed quickly).",
                        self.default_timeout.as_secs()
                    )
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutcome> {
        let args: BashArgs = parse_args(args)?;
        let mut session = self.session.lock().await;

        if args.restart {
            info!("Restarting bash session");
            session.stop().await?;
            return Ok(ToolOutcome::from_blocks(
                BASH_AVATAR,
                vec![UiBlock::info("Bash session has been restarted")],
            ));
        }

        let command = args
            .command
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::validation("The command parameter is required"))?;
        let timeout = resolve_timeout(args.timeout_s, self.default_timeout)?;

        let output = session.execute(&command, timeout, &ctx.abort).await?;
        Ok(ToolOutcome::from_blocks(BASH_AVATAR, output_blocks(&output)))
    }

    async fn cleanup(&self) -> ToolResult<()> {
        self.session.lock().await.stop().await
    }
}
