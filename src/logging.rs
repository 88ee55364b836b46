//! Tracing subscriber setup.
//!
//! Diagnostics always go to stderr so stdout stays a clean JSON channel for
//! the host binary. An optional daily-rolling file mirrors the same output.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::config::LoggingConfig;
use crate::error::{Result, YumeError};

/// File name prefix for rolling log files.
const LOG_FILE_PREFIX: &str = "yume.log";

/// Build the filter: `RUST_LOG` wins over the configured directive.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Install the global tracing subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the lifetime of the process or buffered lines are lost.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config);

    if !config.log_to_file {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| YumeError::Config(format!("cannot install subscriber: {e}")))?;
        return Ok(None);
    }

    let dir = config.directory();
    std::fs::create_dir_all(&dir)?;
    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr.and(file_writer))
        .with_env_filter(filter)
        .with_ansi(false)
        .try_init()
        .map_err(|e| YumeError::Config(format!("cannot install subscriber: {e}")))?;

    tracing::debug!("file logging enabled in {}", dir.display());
    Ok(Some(guard))
}
