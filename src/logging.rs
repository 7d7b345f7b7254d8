//! Logging setup: one subscriber writing to stderr and to the configured file.
//!
//! The log file is rotated by size: at most [`LOG_BACKUPS`] copies of up to
//! [`LOG_MAX_BYTES`] each are kept next to it as `<file>.1`, `<file>.2`, ...

use crate::config::LogLevel;
use crate::error::{ReadportError, Result};
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Size at which the log file is rotated
pub const LOG_MAX_BYTES: usize = 10_000_000;

/// Rotated copies kept besides the active log file
pub const LOG_BACKUPS: usize = 5;

/// Open `path` for appending, creating missing parent directories
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(file)
}

/// A writer appending to `path` that rotates it every `max_bytes`
pub fn rotating_log(
    path: &Path,
    max_bytes: usize,
    backups: usize,
) -> Result<FileRotate<AppendCount>> {
    // fail early on an unwritable location; the rotator only reports it on write
    open_log_file(path)?;

    Ok(FileRotate::new(
        path,
        AppendCount::new(backups),
        ContentLimit::Bytes(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(format!(
        "{}={}",
        env!("CARGO_CRATE_NAME"),
        level.to_level_filter()
    ))
}

/// Install the global subscriber.
///
/// The log file receives timestamped lines with level and target; stderr
/// receives the bare message.
pub fn init(level: LogLevel, log_file: &Path) -> Result<()> {
    let file = rotating_log(log_file, LOG_MAX_BYTES, LOG_BACKUPS).map_err(|e| {
        ReadportError::configuration(format!(
            "cannot open log file '{}': {}",
            log_file.display(),
            e
        ))
    })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .with_writer(Mutex::new(file)),
        )
        .with(
            fmt::layer()
                .without_time()
                .with_target(false)
                .with_level(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| ReadportError::configuration(format!("cannot install logger: {}", e)))?;

    debug!("Logging initialized at level: {}", level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_log_file_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("readport_4001.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_rotating_log_keeps_bounded_backups() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("readport_4001.log");
        let backup = |n: usize| temp_dir.path().join(format!("readport_4001.log.{}", n));

        let mut log = rotating_log(&path, 64, 2).unwrap();
        assert!(path.exists());

        log.write_all(&[b'x'; 100]).unwrap();
        log.flush().unwrap();
        assert!(backup(1).exists());
        assert!(fs::metadata(&path).unwrap().len() < 64);

        for _ in 0..5 {
            log.write_all(&[b'y'; 64]).unwrap();
        }
        log.flush().unwrap();
        assert!(backup(2).exists());
        assert!(!backup(3).exists());
    }

    #[test]
    fn test_rotating_log_reports_unusable_path() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        assert!(rotating_log(&blocker.join("readport.log"), 64, 2).is_err());
    }

    #[test]
    fn test_default_filter_uses_crate_target() {
        let filter = default_filter(LogLevel::Warning).to_string();
        assert_eq!(filter, "readport=warn");
    }
}
