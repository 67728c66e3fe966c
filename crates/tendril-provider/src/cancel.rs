//! Racing an opaque operation against a cancellation token.
//!
//! Third-party futures (an HTTP request, for instance) cannot be asked to
//! check a flag. Instead the operation is spawned as its own task and a
//! polling loop watches the token. When the token is seen cancelled the
//! task is aborted and awaited, so nothing keeps running in the background.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often an outstanding request checks for cancellation.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How a raced operation ended.
#[derive(Debug)]
pub enum RaceOutcome<T> {
    /// The operation finished first.
    Completed(T),
    /// The token was cancelled first. The operation has been aborted.
    Cancelled,
    /// The operation's task panicked.
    Panicked(String),
}

/// Run `operation` as a task and poll `cancel` every `poll` until one of
/// them wins.
pub async fn race_with_cancel<F, T>(
    operation: F,
    cancel: &CancellationToken,
    poll: Duration,
) -> RaceOutcome<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(operation);
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            joined = &mut task => {
                return match joined {
                    Ok(value) => RaceOutcome::Completed(value),
                    Err(e) if e.is_panic() => RaceOutcome::Panicked(panic_message(e.into_panic())),
                    Err(_) => RaceOutcome::Cancelled,
                };
            }
            _ = ticker.tick() => {
                if cancel.is_cancelled() {
                    debug!("Cancellation observed, aborting outstanding task");
                    task.abort();
                    // Wait for the abort to land so the task cannot outlive us.
                    let _ = (&mut task).await;
                    return RaceOutcome::Cancelled;
                }
            }
        }
    }
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_completes_without_cancellation() {
        let cancel = CancellationToken::new();
        let outcome = race_with_cancel(async { 42 }, &cancel, Duration::from_millis(10)).await;
        assert!(matches!(outcome, RaceOutcome::Completed(42)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_task() {
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = race_with_cancel(
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(true, Ordering::SeqCst);
            },
            &cancel,
            Duration::from_millis(10),
        )
        .await;

        assert!(matches!(outcome, RaceOutcome::Cancelled));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_wins_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        let outcome = race_with_cancel(
            tokio::time::sleep(Duration::from_secs(5)),
            &cancel,
            CANCEL_POLL_INTERVAL,
        )
        .await;
        assert!(matches!(outcome, RaceOutcome::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let cancel = CancellationToken::new();
        let outcome = race_with_cancel(
            async {
                panic!("kaboom");
            },
            &cancel,
            Duration::from_millis(10),
        )
        .await;
        match outcome {
            RaceOutcome::Panicked(msg) => assert_eq!(msg, "kaboom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
