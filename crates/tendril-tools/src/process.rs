//! Process-group signalling for session teardown.
//!
//! Sessions spawn their interpreter as the leader of a new process group, so
//! everything it starts can be signalled as a unit. Teardown escalates
//! SIGINT, then SIGTERM, then SIGKILL, waiting a grace period between steps
//! for the whole group to disappear.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Grace period between escalation steps.
pub const ESCALATION_GRACE: Duration = Duration::from_millis(200);

const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Signal to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// SIGINT - interrupt (Ctrl+C equivalent)
    Int,
    /// SIGTERM - allows graceful shutdown
    Term,
    /// SIGKILL - immediate termination
    Kill,
}

const ESCALATION: [KillSignal; 3] = [KillSignal::Int, KillSignal::Term, KillSignal::Kill];

/// How a teardown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The group was already gone.
    AlreadyGone,
    /// The group disappeared after this signal.
    StoppedBy(KillSignal),
    /// Members survived SIGKILL (uninterruptible sleep, most likely).
    Unresponsive,
}

#[cfg(unix)]
mod sys {
    use super::KillSignal;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    use std::io;

    fn to_signal(signal: KillSignal) -> Signal {
        match signal {
            KillSignal::Int => Signal::SIGINT,
            KillSignal::Term => Signal::SIGTERM,
            KillSignal::Kill => Signal::SIGKILL,
        }
    }

    fn pid(raw: u32) -> Pid {
        Pid::from_raw(raw as i32)
    }

    fn delivered(result: nix::Result<()>) -> io::Result<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    pub fn signal_group(pgid: u32, signal: KillSignal) -> io::Result<bool> {
        delivered(signal::killpg(pid(pgid), to_signal(signal)))
    }

    pub fn signal_process(raw: u32, signal: KillSignal) -> io::Result<bool> {
        delivered(signal::kill(pid(raw), to_signal(signal)))
    }

    pub fn group_alive(pgid: u32) -> bool {
        if matches!(signal::killpg(pid(pgid), None), Err(Errno::ESRCH)) {
            return false;
        }
        live_member_in_proc(pgid).unwrap_or(true)
    }

    /// Whether `/proc` lists a group member that is not a zombie. Orphaned
    /// members linger as zombies until their new parent reaps them, and
    /// `killpg` still counts those. `None` when `/proc` is unavailable.
    #[cfg(target_os = "linux")]
    fn live_member_in_proc(pgid: u32) -> Option<bool> {
        let entries = std::fs::read_dir("/proc").ok()?;
        let live = entries.flatten().any(|entry| {
            let is_pid = entry.file_name().to_str().is_some_and(|name| {
                !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
            });
            is_pid
                && std::fs::read_to_string(entry.path().join("stat"))
                    .ok()
                    .and_then(|stat| super::parse_stat(&stat))
                    .is_some_and(|(state, pgrp)| pgrp == pgid && !matches!(state, 'Z' | 'X'))
        });
        Some(live)
    }

    #[cfg(not(target_os = "linux"))]
    fn live_member_in_proc(_pgid: u32) -> Option<bool> {
        None
    }
}

#[cfg(not(unix))]
mod sys {
    use super::KillSignal;
    use std::io;

    pub fn signal_group(_pgid: u32, _signal: KillSignal) -> io::Result<bool> {
        Ok(false)
    }

    pub fn signal_process(_pid: u32, _signal: KillSignal) -> io::Result<bool> {
        Ok(false)
    }

    pub fn group_alive(_pgid: u32) -> bool {
        false
    }
}

/// State and process group from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesized and may itself contain spaces or
/// parentheses, so fields are read after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat(stat: &str) -> Option<(char, u32)> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let _ppid = fields.next()?;
    let pgrp = fields.next()?.parse().ok()?;
    Some((state, pgrp))
}

/// Send `signal` to every member of a process group.
///
/// Returns `Ok(false)` when the group no longer exists.
pub fn signal_group(pgid: u32, signal: KillSignal) -> io::Result<bool> {
    sys::signal_group(pgid, signal)
}

/// Send `signal` to a single process.
///
/// Returns `Ok(false)` when the process no longer exists.
pub fn signal_process(pid: u32, signal: KillSignal) -> io::Result<bool> {
    sys::signal_process(pid, signal)
}

/// Whether any live (non-zombie) member of the group is still around.
pub fn group_alive(pgid: u32) -> bool {
    sys::group_alive(pgid)
}

/// Reap the leader and wait until the group is empty or `grace` expires.
async fn wait_for_group_exit(child: &mut Child, pgid: u32, grace: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        // A zombie leader still counts as a group member until reaped.
        let _ = child.try_wait();
        if !group_alive(pgid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }
}

/// Tear down the process group led by `child`, escalating
/// SIGINT → SIGTERM → SIGKILL with `grace` between steps.
pub async fn terminate_group(child: &mut Child, grace: Duration) -> Termination {
    let Some(pgid) = child.id() else {
        return Termination::AlreadyGone;
    };

    if cfg!(not(unix)) {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Termination::StoppedBy(KillSignal::Kill);
    }

    let mut last = None;
    for signal in ESCALATION {
        match signal_group(pgid, signal) {
            Ok(true) => {
                debug!(pgid, ?signal, "Signalled process group");
                last = Some(signal);
            }
            Ok(false) => break,
            Err(e) => {
                warn!(pgid, ?signal, error = %e, "Failed to signal process group");
                break;
            }
        }
        if wait_for_group_exit(child, pgid, grace).await {
            return Termination::StoppedBy(signal);
        }
    }

    let _ = child.try_wait();
    match last {
        None => Termination::AlreadyGone,
        Some(signal) if !group_alive(pgid) => Termination::StoppedBy(signal),
        Some(_) => {
            warn!(pgid, "Process group survived SIGKILL");
            Termination::Unresponsive
        }
    }
}

/// Bytes read from one child pipe, owned by the session that drains them.
///
/// A reader task copies the pipe into an unbounded channel. The session
/// moves chunks from the channel into `buf` as it polls, so no buffer is
/// ever shared with the reading side.
pub(crate) struct OutputQueue {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pub(crate) buf: Vec<u8>,
    pub(crate) closed: bool,
}

impl OutputQueue {
    /// Start copying `pipe` into a new queue.
    pub(crate) fn spawn<R>(pipe: R, label: &'static str) -> (Self, JoinHandle<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut pipe = pipe;
            let mut chunk = vec![0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(pipe = label, error = %e, "Pipe read failed");
                        break;
                    }
                }
            }
            trace!(pipe = label, "Pipe reader finished");
        });
        (
            Self {
                rx,
                buf: Vec::new(),
                closed: false,
            },
            reader,
        )
    }

    /// Wait for the next chunk. Returns `false` once the pipe is closed.
    pub(crate) async fn fill(&mut self) -> bool {
        match self.rx.recv().await {
            Some(chunk) => {
                self.buf.extend_from_slice(&chunk);
                true
            }
            None => {
                self.closed = true;
                false
            }
        }
    }

    /// Drop everything read so far, including chunks still in the channel.
    pub(crate) fn discard(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.buf.clear();
    }

    /// Take the buffered bytes, decoded lossily.
    pub(crate) fn take_text(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        text
    }
}

/// Position of `needle` in `haystack`.
pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_group(script: &str) -> Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_find_bytes() {
        assert_eq!(find_bytes(b"abc__M__0\n", b"__M__"), Some(3));
        assert_eq!(find_bytes(b"abc", b"__M__"), None);
        assert_eq!(find_bytes(b"abc", b""), None);
    }

    #[tokio::test]
    async fn test_output_queue_collects_until_close() {
        let (mut queue, reader) = OutputQueue::spawn(&b"hello \xffworld"[..], "test");
        while queue.fill().await {}
        reader.await.unwrap();
        assert!(queue.closed);
        assert_eq!(queue.take_text(), "hello \u{fffd}world");
        assert!(queue.buf.is_empty());
    }

    #[test]
    fn test_parse_stat() {
        assert_eq!(
            parse_stat("4242 (sleep) S 1 4240 4240 0 -1 4194560"),
            Some(('S', 4240))
        );
        assert_eq!(
            parse_stat("17 (odd) name)) Z 1 9 9 0"),
            Some(('Z', 9))
        );
        assert_eq!(parse_stat("garbage"), None);
    }

    #[tokio::test]
    async fn test_sigint_stops_plain_sleep() {
        let mut child = spawn_group("exec sleep 30");
        let result = terminate_group(&mut child, ESCALATION_GRACE).await;
        assert_eq!(result, Termination::StoppedBy(KillSignal::Int));
    }

    #[tokio::test]
    async fn test_escalates_past_ignored_signals() {
        let mut child = spawn_group("trap '' INT TERM; while true; do sleep 0.05; done");
        // Let the shell install its traps.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let pgid = child.id().unwrap();

        let result = terminate_group(&mut child, ESCALATION_GRACE).await;

        assert_eq!(result, Termination::StoppedBy(KillSignal::Kill));
        assert!(!group_alive(pgid));
    }

    #[tokio::test]
    async fn test_already_reaped_child() {
        let mut child = spawn_group("true");
        child.wait().await.unwrap();
        assert_eq!(
            terminate_group(&mut child, ESCALATION_GRACE).await,
            Termination::AlreadyGone
        );
    }
}
