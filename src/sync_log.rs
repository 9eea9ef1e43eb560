//! Per-run structured log. One `SyncLog` is created per sync run and passed
//! explicitly through the pipeline; the caller decides where to flush it.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Parse,
    Fallback,
    Categorize,
    Persist,
    Summary,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Fallback => "fallback",
            Self::Categorize => "categorize",
            Self::Persist => "persist",
            Self::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub stage: Stage,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug)]
pub struct SyncLog {
    started_at: DateTime<Utc>,
    entries: Vec<LogEntry>,
}

impl Default for SyncLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncLog {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn record(
        &mut self,
        level: LogLevel,
        stage: Stage,
        message_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let stage_name = stage.as_str();
        let id = message_id.unwrap_or("");
        match level {
            LogLevel::Debug => debug!(stage = stage_name, message_id = id, "{message}"),
            LogLevel::Info => info!(stage = stage_name, message_id = id, "{message}"),
            LogLevel::Warn => warn!(stage = stage_name, message_id = id, "{message}"),
            LogLevel::Error => error!(stage = stage_name, message_id = id, "{message}"),
        }
        self.entries.push(LogEntry {
            at: Utc::now(),
            level,
            stage,
            message,
            message_id: message_id.map(str::to_string),
        });
    }

    pub fn debug(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(LogLevel::Debug, stage, None, message);
    }

    pub fn info(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(LogLevel::Info, stage, None, message);
    }

    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(LogLevel::Warn, stage, None, message);
    }

    pub fn error(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(LogLevel::Error, stage, None, message);
    }

    /// Entry tied to one email.
    pub fn email(
        &mut self,
        level: LogLevel,
        stage: Stage,
        message_id: &str,
        message: impl Into<String>,
    ) {
        self.record(level, stage, Some(message_id), message);
    }

    /// Write the run's entries as JSON lines to `<dir>/sync-<timestamp>.jsonl`.
    pub fn flush_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("sync-{}.jsonl", self.started_at.format("%Y%m%dT%H%M%SZ")));
        let mut file = fs::File::create(&path)?;
        for entry in &self.entries {
            serde_json::to_writer(&mut file, entry)?;
            file.write_all(b"\n")?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entries_are_collected_per_run() {
        let mut log = SyncLog::new();
        log.info(Stage::Fetch, "fetched 3 emails");
        log.email(LogLevel::Warn, Stage::Parse, "m1", "no amount");
        log.error(Stage::Fallback, "batch 2 failed");

        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.count(LogLevel::Warn), 1);
        assert_eq!(log.entries()[1].message_id.as_deref(), Some("m1"));

        let other = SyncLog::new();
        assert!(other.entries().is_empty());
    }

    #[test]
    fn test_flush_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut log = SyncLog::new();
        log.info(Stage::Summary, "done");
        log.email(LogLevel::Debug, Stage::Parse, "abc", "regex ok");

        let path = log.flush_to(&dir.path().join("logs")).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["stage"], "summary");
        assert_eq!(first["level"], "info");
        assert!(first.get("message_id").is_none());
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["message_id"], "abc");
    }
}
