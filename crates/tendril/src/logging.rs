//! Logging initialization.
//!
//! Chat output owns stdout, so by default logs go to a file in the platform
//! data directory. `--print-logs` sends them to stderr instead.

use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose events pass the default filter.
const CRATES: &[&str] = &[
    "tendril",
    "tendril_core",
    "tendril_provider",
    "tendril_tools",
];

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. Returns the log file path when
/// logging to a file.
pub fn init_logging(level: &str, print_logs: bool) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    if print_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
        return None;
    }

    let log_dir = log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {e}");
        return None;
    }

    let log_file = log_dir.join("tendril.log");
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {e}");
            return None;
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();

    Some(log_file)
}

fn default_filter(level: &str) -> EnvFilter {
    let directives = CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(directives)
}

/// Directory holding `tendril.log`.
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tendril").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".tendril/logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_scopes_to_workspace_crates() {
        let rendered = default_filter("debug").to_string();
        assert!(rendered.contains("tendril_tools=debug"));
        assert!(rendered.contains("tendril_core=debug"));
        assert!(!rendered.contains("reqwest"));
    }

    #[test]
    fn test_log_dir_is_app_scoped() {
        assert!(log_dir().ends_with("tendril/logs"));
    }
}
