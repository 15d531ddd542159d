//! Logging setup for the sqlgate binary.
//!
//! Everything goes to stderr; stdout carries JSON responses only.

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, SqlGateError};

/// Environment variable holding an `EnvFilter` directive that overrides the flags
pub const LOG_ENV: &str = "SQLGATE_LOG";

/// Level for the verbosity flags (0=INFO, 1=DEBUG, 2+=TRACE, quiet=ERROR)
#[must_use]
pub const fn level_for(verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

/// Initializes structured logging based on verbosity level.
///
/// # Arguments
/// * `verbose` - Verbosity level (0=INFO, 1=DEBUG, 2+=TRACE)
/// * `quiet` - If true, only show ERROR level logs
///
/// `SQLGATE_LOG` takes precedence over both when set.
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(level_for(verbose, quiet)).into())
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| SqlGateError::config_error(format!("Failed to initialize logging: {e}")))
}
