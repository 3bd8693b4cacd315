//! Tracing integration for structured logging.
//!
//! Provides logging setup for the client with:
//! - Configurable verbosity levels
//! - Optional file output
//! - JSON or text format

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::Result;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Initialize the logging system.
///
/// # Arguments
///
/// * `verbosity` - Verbosity level (0=error, 1=warn, 2=info, 3=debug, 4+=trace)
/// * `log_file` - Optional path to write logs to file
/// * `format` - Output format (text or JSON)
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };

    // Build filter with level and allow RUST_LOG override
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("halyard={level},halyard_core={level}")));

    match (log_file, format) {
        (None, LogFormat::Text) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_file(verbosity >= 3)
                        .with_line_number(verbosity >= 3),
                )
                .try_init()
                .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))?;
        }
        (None, LogFormat::Json) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))?;
        }
        (Some(path), LogFormat::Text) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_file(verbosity >= 3)
                        .with_line_number(verbosity >= 3),
                )
                .try_init()
                .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))?;
        }
        (Some(path), LogFormat::Json) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(file))
                .try_init()
                .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))?;
        }
    }

    Ok(())
}

/// Initialize logging with defaults for testing.
///
/// Uses info level with text format to stderr.
/// Silently ignores errors (logging may already be initialized).
pub fn init_test_logging() {
    let _ = init_logging(2, None, LogFormat::Text);
}
