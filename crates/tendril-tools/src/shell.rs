//! Persistent shell session.
//!
//! One long-lived shell runs as the leader of its own process group. Each
//! command is written to its stdin followed by two `echo`s of a fresh
//! sentinel: one on stdout carrying `$?`, one on stderr. A command is
//! complete once both sentinels have been read back.
//!
//! On timeout or interrupt the whole group is torn down and the session
//! goes back to not-started, so the next command gets a fresh shell.

use crate::error::{ToolError, ToolResult};
use crate::process::{
    find_bytes, signal_group, terminate_group, KillSignal, OutputQueue, ESCALATION_GRACE,
};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default shell program.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// How long to wait for the stderr sentinel once stdout has completed.
const STDERR_SENTINEL_WAIT: Duration = Duration::from_millis(500);

/// How long to keep collecting output after the group has been killed.
const DRAIN_WINDOW: Duration = Duration::from_millis(200);

/// How long to wait for a shell that closed its pipes to be reaped.
const EXIT_REAP_WAIT: Duration = Duration::from_secs(1);

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Started,
    Stopped,
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Both sentinels were seen.
    Completed,
    /// The wall-clock limit expired and the shell was killed.
    TimedOut(Duration),
    /// The abort token fired and the shell was killed.
    Interrupted,
    /// The shell itself exited (the command ran `exit`, for instance).
    ShellExited,
}

/// Output of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status of the command, when it is known.
    pub exit_code: Option<i32>,
    pub status: CommandStatus,
}

struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: OutputQueue,
    stderr: OutputQueue,
    readers: [JoinHandle<()>; 2],
}

impl ShellProcess {
    fn abort_readers(&self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

enum Event {
    Output,
    TimedOut,
    Interrupted,
    StderrSentinelMissing,
}

/// A long-lived shell that runs one command at a time.
pub struct ShellSession {
    program: String,
    state: SessionState,
    process: Option<ShellProcess>,
}

impl ShellSession {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            state: SessionState::NotStarted,
            process: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Pid of the running shell (and id of its process group).
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.child.id())
    }

    /// Spawn the shell if it is not running.
    pub async fn start(&mut self) -> ToolResult<()> {
        if let Some(process) = self.process.as_mut() {
            match process.child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => {
                    debug!(?status, "Shell exited between commands, respawning");
                }
                Err(e) => warn!(error = %e, "Could not poll shell status, respawning"),
            }
            if let Some(stale) = self.process.take() {
                stale.abort_readers();
            }
        }

        let mut command = Command::new(&self.program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| ToolError::spawn(&self.program, e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::protocol("shell stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::protocol("shell stdout is not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::protocol("shell stderr is not piped"))?;

        let (stdout, stdout_reader) = OutputQueue::spawn(stdout, "stdout");
        let (stderr, stderr_reader) = OutputQueue::spawn(stderr, "stderr");

        info!(program = %self.program, pid = ?child.id(), "Started shell session");
        self.process = Some(ShellProcess {
            child,
            stdin,
            stdout,
            stderr,
            readers: [stdout_reader, stderr_reader],
        });
        self.state = SessionState::Started;
        Ok(())
    }

    /// Run one command, honouring `timeout` and `abort`.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
        abort: &CancellationToken,
    ) -> ToolResult<CommandOutput> {
        self.start().await?;
        let Some(process) = self.process.as_mut() else {
            return Err(ToolError::protocol("shell session did not start"));
        };

        process.stdout.discard();
        process.stderr.discard();

        let marker = format!("__TENDRIL_{}__", Uuid::new_v4().simple());
        let script = format!("{command}\necho \"{marker}$?\"; echo \"{marker}\" >&2\n");
        debug!(command = %command, ?timeout, "Running shell command");

        if let Err(e) = write_script(&mut process.stdin, &script).await {
            // The shell went away under us; report what it left behind.
            warn!(error = %e, "Shell stdin closed");
            return Ok(self.finish_exited().await);
        }

        let marker = marker.into_bytes();
        let deadline = Instant::now() + timeout;
        let mut stderr_deadline: Option<Instant> = None;

        loop {
            if let Some(end) = find_bytes(&process.stdout.buf, &marker) {
                let stderr_end = find_bytes(&process.stderr.buf, &marker);
                if let Some(exit_code) = parse_exit_line(&process.stdout.buf[end + marker.len()..])
                {
                    if stderr_end.is_some() || process.stderr.closed {
                        return Ok(Self::finish_completed(process, end, stderr_end, exit_code));
                    }
                    stderr_deadline.get_or_insert_with(|| Instant::now() + STDERR_SENTINEL_WAIT);
                }
            }
            if process.stdout.closed && process.stderr.closed {
                return Ok(self.finish_exited().await);
            }

            let event = tokio::select! {
                _ = process.stdout.fill(), if !process.stdout.closed => Event::Output,
                _ = process.stderr.fill(), if !process.stderr.closed => Event::Output,
                _ = tokio::time::sleep_until(deadline) => Event::TimedOut,
                _ = abort.cancelled() => Event::Interrupted,
                _ = sleep_until_opt(stderr_deadline), if stderr_deadline.is_some() => {
                    Event::StderrSentinelMissing
                }
            };

            match event {
                Event::Output => {}
                Event::StderrSentinelMissing => {
                    debug!("Stderr sentinel did not arrive, completing on stdout alone");
                    let end = find_bytes(&process.stdout.buf, &marker).unwrap_or(0);
                    let exit_code = parse_exit_line(&process.stdout.buf[end + marker.len()..])
                        .unwrap_or(-1);
                    return Ok(Self::finish_completed(process, end, None, exit_code));
                }
                Event::TimedOut => {
                    warn!(?timeout, "Shell command timed out");
                    return Ok(self.finish_killed(CommandStatus::TimedOut(timeout)).await);
                }
                Event::Interrupted => {
                    info!("Shell command interrupted by user");
                    return Ok(self.finish_killed(CommandStatus::Interrupted).await);
                }
            }
        }
    }

    fn finish_completed(
        process: &mut ShellProcess,
        stdout_end: usize,
        stderr_end: Option<usize>,
        exit_code: i32,
    ) -> CommandOutput {
        process.stdout.buf.truncate(stdout_end);
        if let Some(end) = stderr_end {
            process.stderr.buf.truncate(end);
        }
        CommandOutput {
            stdout: process.stdout.take_text(),
            stderr: process.stderr.take_text(),
            exit_code: Some(exit_code),
            status: CommandStatus::Completed,
        }
    }

    /// Kill the group, keep whatever output is still in flight, and forget
    /// the process.
    async fn finish_killed(&mut self, status: CommandStatus) -> CommandOutput {
        let Some(mut process) = self.process.take() else {
            return CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                status,
            };
        };
        let termination = terminate_group(&mut process.child, ESCALATION_GRACE).await;
        debug!(?termination, "Shell process group torn down");
        drain(&mut process).await;
        process.abort_readers();
        self.state = SessionState::NotStarted;

        CommandOutput {
            stdout: process.stdout.take_text(),
            stderr: process.stderr.take_text(),
            exit_code: None,
            status,
        }
    }

    async fn finish_exited(&mut self) -> CommandOutput {
        let Some(mut process) = self.process.take() else {
            return CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                status: CommandStatus::ShellExited,
            };
        };
        drain(&mut process).await;
        let exit_code = match tokio::time::timeout(EXIT_REAP_WAIT, process.child.wait()).await {
            Ok(Ok(status)) => status.code().unwrap_or(-1),
            _ => {
                terminate_group(&mut process.child, ESCALATION_GRACE).await;
                -1
            }
        };
        process.abort_readers();
        self.state = SessionState::NotStarted;
        info!(exit_code, "Shell exited");

        CommandOutput {
            stdout: process.stdout.take_text(),
            stderr: process.stderr.take_text(),
            exit_code: Some(exit_code),
            status: CommandStatus::ShellExited,
        }
    }

    /// Tear the shell down. Safe to call when nothing is running.
    pub async fn stop(&mut self) -> ToolResult<()> {
        if let Some(mut process) = self.process.take() {
            let termination = terminate_group(&mut process.child, ESCALATION_GRACE).await;
            debug!(?termination, "Stopped shell session");
            process.abort_readers();
        }
        self.state = SessionState::Stopped;
        Ok(())
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if let Some(process) = self.process.as_ref() {
            if let Some(pid) = process.child.id() {
                let _ = signal_group(pid, KillSignal::Kill);
            }
            process.abort_readers();
        }
    }
}

async fn write_script(stdin: &mut ChildStdin, script: &str) -> std::io::Result<()> {
    stdin.write_all(script.as_bytes()).await?;
    stdin.flush().await
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Collect whatever the pipes still hold, for at most [`DRAIN_WINDOW`].
async fn drain(process: &mut ShellProcess) {
    let deadline = Instant::now() + DRAIN_WINDOW;
    while !(process.stdout.closed && process.stderr.closed) {
        tokio::select! {
            _ = process.stdout.fill(), if !process.stdout.closed => {}
            _ = process.stderr.fill(), if !process.stderr.closed => {}
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
}

/// Parse the exit status that follows the stdout sentinel.
///
/// Returns `None` until the full line has arrived. A line that is not a
/// number yields `-1`.
fn parse_exit_line(rest: &[u8]) -> Option<i32> {
    let newline = rest.iter().position(|&b| b == b'\n')?;
    let line = String::from_utf8_lossy(&rest[..newline]);
    Some(line.trim().parse().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exit_line() {
        assert_eq!(parse_exit_line(b"0\n"), Some(0));
        assert_eq!(parse_exit_line(b"127\nmore"), Some(127));
        assert_eq!(parse_exit_line(b"12"), None);
        assert_eq!(parse_exit_line(b"oops\n"), Some(-1));
    }

    #[tokio::test]
    #[cfg_attr(windows, ignore)]
    async fn test_state_survives_between_commands() {
        let mut session = ShellSession::new(DEFAULT_SHELL);
        let abort = CancellationToken::new();
        let timeout = Duration::from_secs(10);

        session
            .execute("export TENDRIL_X=42; cd /tmp", timeout, &abort)
            .await
            .unwrap();
        let out = session
            .execute("echo $TENDRIL_X; pwd", timeout, &abort)
            .await
            .unwrap();

        assert_eq!(out.status, CommandStatus::Completed);
        assert_eq!(out.stdout.trim(), "42\n/tmp");
        session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    #[cfg_attr(windows, ignore)]
    async fn test_stderr_and_exit_code() {
        let mut session = ShellSession::new(DEFAULT_SHELL);
        let out = session
            .execute(
                "echo oops >&2; false",
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(out.stdout, "");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, Some(1));
        session.stop().await.unwrap();
    }

    #[tokio::test]
    #[cfg_attr(windows, ignore)]
    async fn test_exit_respawns_on_next_command() {
        let mut session = ShellSession::new(DEFAULT_SHELL);
        let abort = CancellationToken::new();
        let timeout = Duration::from_secs(10);

        let out = session.execute("exit 3", timeout, &abort).await.unwrap();
        assert_eq!(out.status, CommandStatus::ShellExited);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(session.state(), SessionState::NotStarted);

        let out = session.execute("echo back", timeout, &abort).await.unwrap();
        assert_eq!(out.stdout.trim(), "back");
        session.stop().await.unwrap();
    }
}
