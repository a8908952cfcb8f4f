//! Observability.
//!
//! Installs the process-wide `tracing` subscriber. Metrics are emitted
//! through the `metrics` facade; installing a recorder is left to the
//! embedding application.

mod logging;

pub use logging::{ENV_LOG_FILE, ENV_LOG_FORMAT, LogFormat, LoggingConfig};

use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes logging for the process.
///
/// Logs go to stderr, or are appended to `config.file` when set.
///
/// # Errors
///
/// Returns an error if logging has already been initialized or the log file
/// cannot be opened.
pub fn init(config: LoggingConfig) -> Result<()> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(observability_error("observability already initialized"));
    }

    let to_stderr = config.file.is_none();
    let writer = match &config.file {
        Some(path) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        None => BoxMakeWriter::new(io::stderr),
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(to_stderr)
        .with_target(true)
        .with_thread_ids(true);
    let registry = tracing_subscriber::registry().with(config.filter);

    let installed = match config.format {
        LogFormat::Json => registry.with(layer.json().with_current_span(true)).try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
    };
    installed.map_err(|e| observability_error(e.to_string()))?;

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| observability_error("failed to mark observability initialized"))
}

/// Opens a log file for appending, creating parent directories.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: format!("{}: {e}", parent.display()),
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
}

fn observability_error(cause: impl Into<String>) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: cause.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_log_file_creates_dirs_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("dupreq.log");

        open_log_file(&path).unwrap().write_all(b"first\n").unwrap();
        open_log_file(&path).unwrap().write_all(b"second\n").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn test_open_log_file_under_a_regular_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let err = open_log_file(&blocker.join("dupreq.log")).unwrap_err();
        assert!(matches!(err, Error::OperationFailed { ref operation, .. } if operation == "create_log_dir"));
    }
}
