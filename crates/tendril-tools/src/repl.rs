//! Persistent Python REPL session.
//!
//! The interpreter runs in interactive mode with its prompts replaced by
//! tokens that cannot appear in normal output. A snippet is complete when
//! the primary prompt token comes back. Snippets are wrapped in an
//! `if True:` block so blank lines inside them cannot end the statement
//! early.
//!
//! Interrupts are delivered by a watcher task that polls the abort token
//! and sends SIGINT to the interpreter itself. Timeouts also send SIGINT;
//! the process is kept if the prompt returns and killed otherwise.

use crate::error::{ToolError, ToolResult};
use crate::process::{
    find_bytes, signal_group, signal_process, terminate_group, KillSignal, OutputQueue,
    ESCALATION_GRACE,
};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default interpreter.
pub const DEFAULT_PYTHON: &str = "python3";

/// Primary prompt after startup.
pub const PS1: &str = "[TENDRIL_PS1>";

/// Continuation prompt after startup.
pub const PS2: &str = "[TENDRIL_PS2+";

const STOCK_PS1: &str = ">>> ";

/// How often the watcher looks at the abort token.
pub const WATCH_INTERVAL: Duration = Duration::from_millis(100);

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the interpreter gets to unwind after SIGINT.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// How long `exit()` gets before the process is killed.
const EXIT_WAIT: Duration = Duration::from_secs(2);

/// How a snippet ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetStatus {
    Completed,
    /// The limit expired. `kept` says whether the interpreter survived.
    TimedOut { timeout: Duration, kept: bool },
    Interrupted,
    /// The interpreter exited (the snippet called `exit()`, for instance).
    Exited,
}

/// Output of one snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetOutput {
    /// Interleaved stdout and stderr, prompt tokens removed.
    pub output: String,
    pub status: SnippetStatus,
}

struct ReplProcess {
    child: Child,
    stdin: ChildStdin,
    output: OutputQueue,
    reader: JoinHandle<()>,
}

enum ReadEnd {
    Prompt(usize),
    Closed,
    Deadline,
}

/// Read until `token` shows up, the pipe closes, or `deadline` passes.
async fn read_until(output: &mut OutputQueue, token: &[u8], deadline: Instant) -> ReadEnd {
    loop {
        if let Some(pos) = find_bytes(&output.buf, token) {
            return ReadEnd::Prompt(pos);
        }
        if output.closed {
            return ReadEnd::Closed;
        }
        tokio::select! {
            _ = output.fill() => {}
            _ = tokio::time::sleep_until(deadline) => return ReadEnd::Deadline,
        }
    }
}

/// Wrap a snippet so the REPL reads it as one compound statement.
pub fn wrap_snippet(code: &str) -> String {
    let mut wrapped = String::from("if True:\n");
    for line in code.lines().filter(|line| !line.trim().is_empty()) {
        wrapped.push_str("    ");
        wrapped.push_str(line);
        wrapped.push('\n');
    }
    wrapped.push('\n');
    wrapped
}

fn clean_output(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).replace(PS2, "")
}

/// A long-lived Python interpreter that runs one snippet at a time.
pub struct ReplSession {
    program: String,
    process: Option<ReplProcess>,
}

impl ReplSession {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            process: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.process.is_some()
    }

    /// Pid of the interpreter.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    /// Spawn the interpreter and install the prompt tokens.
    pub async fn start(&mut self) -> ToolResult<()> {
        if let Some(process) = self.process.as_mut() {
            if matches!(process.child.try_wait(), Ok(None)) {
                return Ok(());
            }
            debug!("Interpreter exited between snippets, respawning");
            if let Some(stale) = self.process.take() {
                stale.reader.abort();
            }
        }

        // `$0` carries the interpreter so its path needs no quoting.
        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg("exec \"$0\" -u -i -q 2>&1")
            .arg(&self.program)
            .env("PYTHON_BASIC_REPL", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| ToolError::spawn(&self.program, e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::protocol("interpreter stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::protocol("interpreter stdout is not piped"))?;
        let (output, reader) = OutputQueue::spawn(stdout, "repl");

        let mut process = ReplProcess {
            child,
            stdin,
            output,
            reader,
        };

        if let Err(e) = Self::handshake(&mut process).await {
            terminate_group(&mut process.child, ESCALATION_GRACE).await;
            process.reader.abort();
            return Err(e);
        }

        info!(program = %self.program, pid = ?process.child.id(), "Started Python session");
        self.process = Some(process);
        Ok(())
    }

    async fn handshake(process: &mut ReplProcess) -> ToolResult<()> {
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        Self::expect_prompt(process, STOCK_PS1, deadline).await?;
        process.output.discard();

        let install = format!("import sys; sys.ps1='{PS1}'; sys.ps2='{PS2}'\n");
        write_input(&mut process.stdin, &install).await?;
        Self::expect_prompt(process, PS1, deadline).await?;
        process.output.discard();
        Ok(())
    }

    async fn expect_prompt(
        process: &mut ReplProcess,
        prompt: &str,
        deadline: Instant,
    ) -> ToolResult<()> {
        match read_until(&mut process.output, prompt.as_bytes(), deadline).await {
            ReadEnd::Prompt(_) => Ok(()),
            ReadEnd::Closed => Err(ToolError::protocol(format!(
                "interpreter exited during startup: {}",
                process.output.take_text().trim()
            ))),
            ReadEnd::Deadline => Err(ToolError::protocol(format!(
                "interpreter did not show the prompt {prompt:?} within {STARTUP_TIMEOUT:?}"
            ))),
        }
    }

    /// Run one snippet, honouring `timeout` and `abort`.
    pub async fn execute(
        &mut self,
        code: &str,
        timeout: Duration,
        abort: &CancellationToken,
    ) -> ToolResult<SnippetOutput> {
        self.start().await?;
        let Some(process) = self.process.as_mut() else {
            return Err(ToolError::protocol("interpreter did not start"));
        };
        process.output.discard();

        let watcher = process.child.id().map(|pid| spawn_watcher(pid, abort.clone()));

        let result = Self::run_snippet(process, code, timeout, abort).await;
        if let Some(watcher) = watcher {
            watcher.abort();
        }

        let (output, status, keep) = match result {
            Ok(run) => run,
            Err(e) => {
                self.kill().await;
                return Err(e);
            }
        };
        if !keep {
            self.kill().await;
        }
        Ok(SnippetOutput { output, status })
    }

    /// Returns the output, how it ended, and whether the process is reusable.
    async fn run_snippet(
        process: &mut ReplProcess,
        code: &str,
        timeout: Duration,
        abort: &CancellationToken,
    ) -> ToolResult<(String, SnippetStatus, bool)> {
        debug!(len = code.len(), ?timeout, "Running Python snippet");
        if let Err(e) = write_input(&mut process.stdin, &wrap_snippet(code)).await {
            warn!(error = %e, "Interpreter stdin closed");
            let output = clean_output(&process.output.buf);
            return Ok((output, SnippetStatus::Exited, false));
        }

        let token = PS1.as_bytes();
        let mut deadline = Instant::now() + timeout;
        let mut interrupted = false;

        loop {
            if let Some(pos) = find_bytes(&process.output.buf, token) {
                let output = clean_output(&process.output.buf[..pos]);
                process.output.discard();
                let status = if interrupted {
                    SnippetStatus::Interrupted
                } else {
                    SnippetStatus::Completed
                };
                return Ok((output, status, true));
            }
            if process.output.closed {
                let output = clean_output(&process.output.buf);
                info!("Interpreter exited");
                return Ok((output, SnippetStatus::Exited, false));
            }

            tokio::select! {
                _ = process.output.fill() => {}
                _ = abort.cancelled(), if !interrupted => {
                    // The watcher delivers SIGINT; give it time to unwind.
                    interrupted = true;
                    deadline = deadline.min(Instant::now() + INTERRUPT_GRACE);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if interrupted {
                        warn!("Interpreter did not return after interrupt");
                        let output = clean_output(&process.output.buf);
                        return Ok((output, SnippetStatus::Interrupted, false));
                    }
                    return Ok(Self::recover_from_timeout(process, timeout).await);
                }
            }
        }
    }

    async fn recover_from_timeout(
        process: &mut ReplProcess,
        timeout: Duration,
    ) -> (String, SnippetStatus, bool) {
        warn!(?timeout, "Python snippet timed out, interrupting");
        if let Some(pid) = process.child.id() {
            if let Err(e) = signal_process(pid, KillSignal::Int) {
                warn!(pid, error = %e, "Failed to interrupt interpreter");
            }
        }

        let deadline = Instant::now() + INTERRUPT_GRACE;
        match read_until(&mut process.output, PS1.as_bytes(), deadline).await {
            ReadEnd::Prompt(pos) => {
                let output = clean_output(&process.output.buf[..pos]);
                process.output.discard();
                (output, SnippetStatus::TimedOut { timeout, kept: true }, true)
            }
            ReadEnd::Closed | ReadEnd::Deadline => {
                let output = clean_output(&process.output.buf);
                (output, SnippetStatus::TimedOut { timeout, kept: false }, false)
            }
        }
    }

    async fn kill(&mut self) {
        if let Some(mut process) = self.process.take() {
            let termination = terminate_group(&mut process.child, ESCALATION_GRACE).await;
            debug!(?termination, "Python process group torn down");
            process.reader.abort();
        }
    }

    /// Ask the interpreter to exit, then force it. Always releases the pipes.
    pub async fn stop(&mut self) -> ToolResult<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };

        if let Err(e) = write_input(&mut process.stdin, "exit()\n").await {
            debug!(error = %e, "Could not send exit() to interpreter");
        }
        match tokio::time::timeout(EXIT_WAIT, process.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Interpreter exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for interpreter"),
            Err(_) => {
                warn!("Interpreter still alive after exit(), terminating");
                terminate_group(&mut process.child, ESCALATION_GRACE).await;
            }
        }

        // Close our ends of the pipes even if the child is wedged.
        process.reader.abort();
        drop(process);
        info!("Stopped Python session");
        Ok(())
    }
}

impl Drop for ReplSession {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_ref() {
            if let Some(pid) = process.child.id() {
                let _ = signal_group(pid, KillSignal::Kill);
            }
            process.reader.abort();
        }
    }
}

fn spawn_watcher(pid: u32, abort: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if abort.is_cancelled() {
                warn!(pid, "Python execution interrupt requested");
                if let Err(e) = signal_process(pid, KillSignal::Int) {
                    warn!(pid, error = %e, "Failed to interrupt interpreter");
                }
                return;
            }
            tokio::time::sleep(WATCH_INTERVAL).await;
        }
    })
}

async fn write_input(stdin: &mut ChildStdin, text: &str) -> std::io::Result<()> {
    stdin.write_all(text.as_bytes()).await?;
    stdin.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_snippet_drops_blank_lines() {
        let wrapped = wrap_snippet("def f():\n\n    return 1\n\nprint(f())");
        assert_eq!(
            wrapped,
            "if True:\n    def f():\n        return 1\n    print(f())\n\n"
        );
    }

    #[test]
    fn test_clean_output_strips_continuation_prompts() {
        let raw = format!("{PS2}{PS2}{PS2}hello\n");
        assert_eq!(clean_output(raw.as_bytes()), "hello\n");
    }
}
