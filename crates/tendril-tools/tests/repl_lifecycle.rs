//! Descriptor accounting for the interpreter session.
//!
//! Kept in its own test binary so no other test opens descriptors while
//! this one counts them.

#![cfg(target_os = "linux")]

use std::time::Duration;
use tendril_tools::repl::{ReplSession, DEFAULT_PYTHON};
use tokio_util::sync::CancellationToken;

fn python_available() -> bool {
    std::process::Command::new(DEFAULT_PYTHON)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .map(|entries| entries.count())
        .unwrap_or(0)
}

async fn cycle() {
    let mut session = ReplSession::new(DEFAULT_PYTHON);
    session.start().await.unwrap();
    let out = session
        .execute("print(1)", Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(out.output.trim(), "1");
    session.stop().await.unwrap();
    assert!(!session.is_started());
}

#[tokio::test]
async fn test_stop_releases_descriptors() {
    if !python_available() {
        return;
    }
    // The first spawn sets up process-wide signal plumbing.
    cycle().await;
    let before = open_fds();

    for _ in 0..20 {
        cycle().await;
    }

    let after = open_fds();
    assert!(after <= before, "descriptors grew from {before} to {after}");
}
