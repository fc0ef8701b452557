//! Logging setup: console on stderr plus a plain-text log file.
//!
//! The level defaults to `info` (`debug` with `--debug`); `RUST_LOG` takes
//! precedence over both.

use std::fs::{File, create_dir_all};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::AppError;

pub const DEFAULT_LOG_FILE: &str = "main.log";

/// Install the global subscriber. Calling it twice keeps the first one.
pub fn init(debug: bool, log_file: Option<&Path>) -> Result<(), AppError> {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                create_dir_all(parent).map_err(|e| {
                    AppError::new(2, format!("Failed to create log directory '{}': {e}", parent.display()))
                })?;
            }
            let file = File::create(path).map_err(|e| {
                AppError::new(2, format!("Failed to create log file '{}': {e}", path.display()))
            })?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed (tests, embedding); keep it.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init();
    Ok(())
}
