//! Logging system setup and configuration
//!
//! Every event goes to two places: the console, and an append-only log file.
//! The file is also how an external viewer follows presence: it scans for the
//! most recent `Online players:` line. `RUST_LOG` overrides the configured level.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Installs the global subscriber.
///
/// Builds an `EnvFilter` from `RUST_LOG`, falling back to `settings.level`,
/// and attaches a console layer (text, or JSON when `json_format` is set)
/// plus a plain-text layer appending to `settings.file_path`.
///
/// # Errors
///
/// Fails when the log file cannot be opened or a global subscriber is
/// already installed.
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let file = open_log_file(Path::new(&settings.file_path))?;
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file));

    let (json_layer, text_layer) = if settings.json_format {
        (Some(fmt::layer().json().with_target(false)), None)
    } else {
        (None, Some(fmt::layer().with_target(false)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to install the logging subscriber")?;

    tracing::info!("Logging initialized with level: {}", settings.level);
    Ok(())
}

/// Opens the log file for appending, creating it and its directory if needed.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("agent.log");

        let mut first = open_log_file(&path).unwrap();
        writeln!(first, "Online players: [none]").unwrap();
        drop(first);

        let mut second = open_log_file(&path).unwrap();
        writeln!(second, "Online players: Alex").unwrap();
        drop(second);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Online players: [none]\nOnline players: Alex\n");
    }

    #[test]
    fn test_unwritable_log_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as the log file.
        assert!(open_log_file(dir.path()).is_err());
    }
}
