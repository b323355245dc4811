//! Tracing subscriber setup.
//!
//! Logs go to `${JARVIS_HOME}/logs/jarvis.log` so they never interleave
//! with streamed replies. `--verbose` sends them to stderr instead.

use anyhow::{Context, Result, anyhow};
use jarvis_core::config::paths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Filter directives, e.g. `JARVIS_LOG=jarvis_core=debug`.
pub const LOG_ENV: &str = "JARVIS_LOG";

const LOG_FILE_NAME: &str = "jarvis.log";

/// Installs the global subscriber.
///
/// The returned guard flushes the background writer on drop; keep it
/// alive until the program exits.
///
/// # Errors
/// Returns an error if the log directory cannot be created or a
/// subscriber is already installed.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
    let (writer, guard) = if verbose {
        tracing_appender::non_blocking(std::io::stderr())
    } else {
        let dir = paths::logs_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create log directory {}", dir.display()))?;
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, LOG_FILE_NAME))
    };

    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("install tracing subscriber: {e}"))?;

    Ok(guard)
}
