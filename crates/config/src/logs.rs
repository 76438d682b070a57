//! Per-session log files.
//!
//! One file per session, named after the session start timestamp. Each line
//! is `[<iso-timestamp>] <message>`; the first and last lines record session
//! start and end plus the total duration.

use crate::ConfigError;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::Instant,
};

/// Append-only log for a single session.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    file: Mutex<File>,
    started: Instant,
}

impl SessionLog {
    /// Opens a fresh session log inside `logs_dir`, creating the directory
    /// if needed, and writes the session-start line.
    pub fn create(logs_dir: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(logs_dir).map_err(|e| ConfigError::io(e, logs_dir))?;

        // ISO timestamp with characters that are unfriendly to filesystems
        // replaced: `:` and `.` become `-`.
        let stamp = now_iso().replace([':', '.'], "-");
        let path = logs_dir.join(format!("{stamp}.log"));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| ConfigError::io(e, &path))?;

        let log = Self { path, file: Mutex::new(file), started: Instant::now() };
        log.line("session started");
        Ok(log)
    }

    /// Appends one `[<iso-timestamp>] <message>` line. Write failures are
    /// reported via tracing rather than bubbled up; losing a log line must
    /// not take down a live session.
    pub fn line(&self, message: impl AsRef<str>) {
        let entry = format!("[{}] {}\n", now_iso(), message.as_ref());
        let mut file = self.file.lock();
        if let Err(err) = file.write_all(entry.as_bytes()) {
            warn!(target: "config::logs", %err, path = ?self.path, "failed to write log line");
        }
    }

    /// Writes the session-end line with the total duration.
    pub fn finish(&self) {
        let secs = self.started.elapsed().as_secs();
        self.line(format!("session ended after {secs}s"));
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_start_lines_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::create(dir.path()).unwrap();
        log.line("wallet 0xabc selected");
        log.finish();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("session started"));
        assert!(lines[1].contains("wallet 0xabc selected"));
        assert!(lines[2].contains("session ended after"));
        for line in &lines {
            assert!(line.starts_with('['), "line missing timestamp prefix: {line}");
            assert!(line.contains("] "), "line missing timestamp close: {line}");
        }
    }

    #[test]
    fn filename_has_no_colons_or_dots_before_extension() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::create(dir.path()).unwrap();
        let name = log.path().file_stem().unwrap().to_str().unwrap();
        assert!(!name.contains(':'));
        assert!(!name.contains('.'));
    }
}
