//! Tracing subscriber setup for the host binary.
//!
//! Logs always go to stderr. When a log directory is configured they are
//! also written to daily files named `lipsync.YYYY-MM-DD.log`, keeping at
//! most [`MAX_LOG_FILES`] of them.

use crate::config::LoggingConfig;
use crate::error::{LipSyncError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Maximum number of daily log files to keep.
pub const MAX_LOG_FILES: usize = 10;

const LOG_FILE_PREFIX: &str = "lipsync";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the configured filter. The returned guard flushes
/// the file writer on drop and must live as long as the process logs.
///
/// # Errors
///
/// Returns [`LipSyncError::Config`] if the log directory cannot be used or a
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(dir)?);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| LipSyncError::Config(format!("failed to install tracing subscriber: {e}")))?;

    Ok(guard)
}

/// Daily rolling appender under `dir`, created if missing.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or opened.
pub fn file_appender(dir: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map_err(|e| {
            LipSyncError::Config(format!("cannot open log directory {}: {e}", dir.display()))
        })
}
