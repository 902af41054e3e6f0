//! Logging setup.
//!
//! The TUI owns the terminal, so by default logs go to a file next to the
//! connections file. `--log-stderr` switches to stderr for debugging.

use std::fs::{self, File};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "dbsage.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes logging to `~/.dbsage/dbsage.log`.
///
/// The file is truncated on every start. Failures fall back to no logging
/// rather than writing into the terminal UI.
pub fn init_file_logging() {
    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory: {e}");
            return;
        }
    }

    let log_file = match File::create(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {e}");
            return;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(log_file)
        .with_ansi(false)
        .init();
}

/// Initializes logging to stderr.
pub fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Returns the path for the log file.
///
/// Prefers the application directory, then the platform state directory,
/// then the temp directory.
pub fn get_log_path() -> PathBuf {
    if let Some(app_dir) = crate::config::app_dir() {
        return app_dir.join(LOG_FILE_NAME);
    }

    if let Some(state_dir) = dirs::state_dir() {
        return state_dir.join("dbsage").join(LOG_FILE_NAME);
    }

    std::env::temp_dir().join(LOG_FILE_NAME)
}
