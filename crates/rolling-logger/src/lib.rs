//! Rolling Logger
//!
//! File logger with a circular line buffer. On start-up the previous log file
//! is trimmed to its newest `MAX_LOG_LINES` lines, then a `tracing-subscriber`
//! fmt layer appends to it. Records emitted through the `log` facade are
//! bridged into the same subscriber.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

/// Lines kept from the previous session
pub const MAX_LOG_LINES: usize = 5000;

static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Local wall-clock timestamps for log lines
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Initialize the process-wide logger writing to `{log_dir}/{app_name}.log`.
pub fn init_logger(log_dir: impl AsRef<Path>, app_name: &str) -> Result<(), String> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log dir: {}", e))?;

    let path = log_dir.join(format!("{}.log", app_name));
    trim_log_file(&path, MAX_LOG_LINES).map_err(|e| format!("Failed to trim log: {}", e))?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("Failed to open log file: {}", e))?;

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_timer(LocalTimer)
        .with_target(true)
        .try_init()
        .map_err(|e| format!("Failed to install subscriber: {}", e))?;

    let _ = LOG_FILE.set(path);
    Ok(())
}

/// Path of the active log file, if the logger was initialized
pub fn log_file_path() -> Option<&'static Path> {
    LOG_FILE.get().map(PathBuf::as_path)
}

/// Keep only the newest `max_lines` lines of `path`. Returns the number of
/// lines dropped. A missing file is not an error.
pub fn trim_log_file(path: &Path, max_lines: usize) -> io::Result<usize> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let lines = BufReader::new(file).lines().collect::<io::Result<Vec<String>>>()?;
    if lines.len() <= max_lines {
        return Ok(0);
    }

    let dropped = lines.len() - max_lines;
    let mut out = File::create(path)?;
    for line in &lines[dropped..] {
        writeln!(out, "{}", line)?;
    }
    Ok(dropped)
}

fn ensure_initialized() -> Result<(), String> {
    if LOG_FILE.get().is_none() {
        return Err("Logger not initialized".to_string());
    }
    Ok(())
}

pub fn info(message: &str) -> Result<(), String> {
    ensure_initialized()?;
    tracing::info!("{}", message);
    Ok(())
}

pub fn warn(message: &str) -> Result<(), String> {
    ensure_initialized()?;
    tracing::warn!("{}", message);
    Ok(())
}

pub fn error(message: &str) -> Result<(), String> {
    ensure_initialized()?;
    tracing::error!("{}", message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_lines(path: &Path, count: usize) {
        let mut file = File::create(path).unwrap();
        for i in 0..count {
            writeln!(file, "line {}", i).unwrap();
        }
    }

    #[test]
    fn test_trim_keeps_newest_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_lines(&path, 10);

        let dropped = trim_log_file(&path, 4).unwrap();
        assert_eq!(dropped, 6);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["line 6", "line 7", "line 8", "line 9"]);
    }

    #[test]
    fn test_trim_short_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        write_lines(&path, 3);

        assert_eq!(trim_log_file(&path, 10).unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_trim_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(trim_log_file(&dir.path().join("none.log"), 10).unwrap(), 0);
    }

    #[test]
    fn test_helpers_require_init() {
        // Nothing in this test binary installs the logger.
        if log_file_path().is_none() {
            assert!(info("hello").is_err());
        }
    }
}
