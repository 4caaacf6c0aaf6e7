//! Append-only JSONL event log
//!
//! One file per run under `./artifacts/`, one JSON record per line, flushed
//! on every write so a crashed run leaves a complete trail. Producers on any
//! thread share the log through a mutex.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;

/// Severity of an event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Diagnostic detail
    Debug,
    /// Normal pipeline progress
    Info,
    /// Suspicious but non-fatal (duplicates, heal rewrites)
    Warning,
    /// Per-file or stage failure
    Error,
}

/// Kind of pipeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Scanner discovered a file
    Scan,
    /// Extractor stored metadata
    Meta,
    /// Clusterer assigned a file
    Cluster,
    /// Scorer scored a member
    Score,
    /// Planner produced a plan
    Plan,
    /// Executor finished an attempt
    Execute,
    /// A cluster holds more than one member
    Duplicate,
    /// Auto-healing changed a tag field
    AutoHeal,
    /// Any recorded failure
    Error,
}

/// One line of the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Timestamp; filled at log time when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    /// Severity
    pub level: EventLevel,
    /// Kind
    pub event: EventKind,
    /// Stable file identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    /// Source path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_path: Option<String>,
    /// Cluster identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_key: Option<String>,
    /// Score assigned by the scorer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    /// Whether the scored member won its cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_winner: Option<bool>,
    /// Planned or executed action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Bytes the executor wrote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<u64>,
    /// Wall time of the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Field changed by auto-healing (`field=old=>new`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healed: Option<String>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventRecord {
    /// Empty record of the given level and kind
    #[must_use]
    pub fn new(level: EventLevel, event: EventKind) -> Self {
        Self {
            ts: None,
            level,
            event,
            file_key: None,
            src_path: None,
            cluster_key: None,
            quality_score: None,
            is_winner: None,
            action: None,
            bytes_written: None,
            duration_ms: None,
            healed: None,
            error: None,
        }
    }

    /// Attach the file identity
    #[must_use]
    pub fn file_key(mut self, key: impl Into<String>) -> Self {
        self.file_key = Some(key.into());
        self
    }

    /// Attach the source path
    #[must_use]
    pub fn src_path(mut self, path: &Path) -> Self {
        self.src_path = Some(path.display().to_string());
        self
    }

    /// Attach the cluster identity
    #[must_use]
    pub fn cluster_key(mut self, key: impl Into<String>) -> Self {
        self.cluster_key = Some(key.into());
        self
    }

    /// Attach an error description
    #[must_use]
    pub fn error(mut self, err: impl ToString) -> Self {
        self.error = Some(err.to_string());
        self
    }
}

enum Sink {
    File(BufWriter<File>),
    Null,
}

/// Level-filtered JSONL writer shared across a run
pub struct EventLog {
    sink: Mutex<Sink>,
    min_level: EventLevel,
    path: Option<PathBuf>,
}

impl EventLog {
    /// Create `events-<timestamp>.jsonl` under `dir`
    ///
    /// # Errors
    /// Returns an error when the directory cannot be created or the file
    /// cannot be opened.
    pub fn create(dir: &Path, min_level: EventLevel) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let name = format!("events-{}.jsonl", Local::now().format("%Y%m%d-%H%M%S"));
        let path = dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        log::debug!("Event log opened at {}", path.display());
        Ok(Self {
            sink: Mutex::new(Sink::File(BufWriter::new(file))),
            min_level,
            path: Some(path),
        })
    }

    /// A log that accepts every record and writes nothing
    #[must_use]
    pub fn null() -> Self {
        Self {
            sink: Mutex::new(Sink::Null),
            min_level: EventLevel::Error,
            path: None,
        }
    }

    /// Path of the log file, when one is open
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one record, filling a missing timestamp
    ///
    /// Records below the configured minimum level are dropped. Serialization
    /// or write failures are reported to the process logger and swallowed so
    /// a broken event log never aborts a stage.
    pub fn record(&self, mut record: EventRecord) {
        if record.level < self.min_level {
            return;
        }
        if record.ts.is_none() {
            record.ts = Some(Utc::now());
        }
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        if let Sink::File(writer) = &mut *sink {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
                        log::warn!("Event log write failed: {e}");
                    }
                }
                Err(e) => log::warn!("Event record serialization failed: {e}"),
            }
        }
    }

    /// Shorthand for an error-kind record
    pub fn record_error(&self, src_path: &Path, err: impl ToString) {
        self.record(
            EventRecord::new(EventLevel::Error, EventKind::Error)
                .src_path(src_path)
                .error(err),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_one_json_line_per_event() {
        let dir = tempdir().unwrap();
        let event_log = EventLog::create(dir.path(), EventLevel::Debug).unwrap();
        event_log.record(
            EventRecord::new(EventLevel::Info, EventKind::Scan)
                .file_key("abc")
                .src_path(Path::new("/in/a.flac")),
        );
        event_log.record(EventRecord::new(EventLevel::Warning, EventKind::Duplicate).cluster_key("k"));

        let contents = fs::read_to_string(event_log.path().unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "scan");
        assert_eq!(first["file_key"], "abc");
        assert!(first["ts"].is_string());
        assert!(first.get("error").is_none());
    }

    #[test]
    fn drops_records_below_min_level() {
        let dir = tempdir().unwrap();
        let event_log = EventLog::create(dir.path(), EventLevel::Warning).unwrap();
        event_log.record(EventRecord::new(EventLevel::Info, EventKind::Scan));
        event_log.record(EventRecord::new(EventLevel::Error, EventKind::Error).error("boom"));

        let contents = fs::read_to_string(event_log.path().unwrap()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn null_log_accepts_everything() {
        let event_log = EventLog::null();
        event_log.record(EventRecord::new(EventLevel::Error, EventKind::Error));
        assert!(event_log.path().is_none());
    }
}
