//! Capped crash log with redaction.
//!
//! Uncaught failures append a structured entry to a small ring persisted as
//! JSON; the oldest entry is dropped first. Messages are sanitized before
//! they are written so an opt-in crash report never carries home-directory
//! paths or token-like secrets.

use crate::defaults;
use crate::error::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

const CRASH_LOG_FILE: &str = "crash-log.json";

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashLogEntry {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    pub platform: String,
}

/// Bounded, persisted crash log.
pub struct CrashLog {
    path: PathBuf,
    capacity: usize,
}

impl CrashLog {
    pub fn new(dir: PathBuf) -> Self {
        Self::with_capacity(dir, defaults::CRASH_LOG_CAPACITY)
    }

    pub fn with_capacity(dir: PathBuf, capacity: usize) -> Self {
        Self {
            path: dir.join(CRASH_LOG_FILE),
            capacity,
        }
    }

    /// Appends a sanitized entry, dropping the oldest past capacity.
    pub fn record(&self, error: &str) -> Result<()> {
        let mut entries = self.entries();
        entries.push(CrashLogEntry {
            timestamp: Utc::now(),
            error: sanitize(error),
            platform: std::env::consts::OS.to_string(),
        });
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&entries)?)?;
        Ok(())
    }

    /// Recorded entries, oldest first. Unreadable logs count as empty.
    pub fn entries(&self) -> Vec<CrashLogEntry> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("ignoring unreadable crash log {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }
}

/// Strips home-directory paths and redacts token-like substrings.
///
/// A token-like substring is a long contiguous alphanumeric run — API keys,
/// session tokens, and the like.
pub fn sanitize(message: &str) -> String {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let token_re = TOKEN_RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9]{20,}").unwrap_or_else(|e| panic!("invalid token regex: {}", e))
    });

    let mut sanitized = message.to_string();
    if let Some(home) = dirs::home_dir() {
        let home = home.to_string_lossy().to_string();
        if !home.is_empty() {
            sanitized = sanitized.replace(&home, "~");
        }
    }
    token_re.replace_all(&sanitized, "[redacted]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_appends_entries_in_order() {
        let dir = tempdir().unwrap();
        let log = CrashLog::new(dir.path().to_path_buf());

        log.record("first failure").unwrap();
        log.record("second failure").unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].error, "first failure");
        assert_eq!(entries[1].error, "second failure");
        assert_eq!(entries[0].platform, std::env::consts::OS);
    }

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let dir = tempdir().unwrap();
        let log = CrashLog::with_capacity(dir.path().to_path_buf(), 3);

        for i in 0..5 {
            log.record(&format!("failure {}", i)).unwrap();
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].error, "failure 2");
        assert_eq!(entries[2].error, "failure 4");
    }

    #[test]
    fn missing_or_corrupt_log_reads_as_empty() {
        let dir = tempdir().unwrap();
        let log = CrashLog::new(dir.path().to_path_buf());
        assert!(log.entries().is_empty());

        std::fs::write(dir.path().join(CRASH_LOG_FILE), b"\xff not json").unwrap();
        assert!(log.entries().is_empty());

        // And recording on top of the corrupt file still works
        log.record("fresh start").unwrap();
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn sanitize_redacts_token_like_runs() {
        let message = "request failed: key sk1234567890abcdefghijklmn rejected";
        let sanitized = sanitize(message);

        assert!(!sanitized.contains("sk1234567890abcdefghijklmn"));
        assert!(sanitized.contains("[redacted]"));
        assert!(sanitized.contains("request failed"));
    }

    #[test]
    fn sanitize_keeps_ordinary_words() {
        let message = "connection reset by peer during keepalive";
        assert_eq!(sanitize(message), message);
    }

    #[test]
    fn sanitize_strips_home_directory_paths() {
        if let Some(home) = dirs::home_dir() {
            let message = format!("failed to open {}/recordings/a.wav", home.display());
            let sanitized = sanitize(&message);
            assert!(!sanitized.contains(&home.to_string_lossy().to_string()));
            assert!(sanitized.contains("~/recordings"));
        }
    }

    #[test]
    fn recorded_entries_are_sanitized() {
        let dir = tempdir().unwrap();
        let log = CrashLog::new(dir.path().to_path_buf());

        log.record("token abcdefghijklmnopqrstuvwxyz0123 leaked")
            .unwrap();

        assert!(log.entries()[0].error.contains("[redacted]"));
    }
}
