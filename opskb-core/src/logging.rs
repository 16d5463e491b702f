//! Logging configuration with rotation support
//!
//! # Example
//!
//! ```rust,no_run
//! use opskb_core::logging::init_logging;
//!
//! init_logging("logs", "opskb.log", "info").unwrap();
//! ```

use crate::error::{Error, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with daily file rotation
///
/// - `directory`: Directory to store logs
/// - `filename_prefix`: Prefix for log files (e.g. "opskb.log")
/// - `level`: Default filter (e.g. "info", "opskb_index=debug")
pub fn init_logging(directory: &str, filename_prefix: &str, level: &str) -> Result<()> {
    // 1. File appender with daily rotation
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(filename_prefix)
        .build(directory)
        .map_err(|e| Error::config(format!("Failed to create log appender: {}", e)))?;

    // 2. Stdout is human readable, the file keeps full targets without colour
    let stdout_layer = fmt::layer().with_target(false).compact();
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);

    // 3. RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::config(format!("Failed to init tracing: {}", e)))?;

    Ok(())
}
