//! Append-only JSONL History Log, one file per domain.
//!
//! Each entry is serialized to a single line and written with one `write_all`
//! on an `O_APPEND` handle, then flushed and synced. Lines are never rewritten;
//! consolidation and analytics read the file out-of-band via [`read_history`].
//! Concurrent writers from several processes rely on the OS append guarantee.

use crate::error::{Result, SentinelError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub const PROCESS_DOMAIN: &str = "process";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub domain: String,
    pub action: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl HistoryEntry {
    pub fn new(domain: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            domain: domain.into(),
            action: action.into(),
            success: true,
            duration_ms: 0,
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Mark failed with a description.
    pub fn failed(mut self, error: impl ToString) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self
    }

    /// Attach a metadata value; values that fail to serialize are stored as null.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.metadata.insert(key.to_string(), v);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    /// `<root>/<domain>/history.jsonl`
    pub fn for_domain(root: &Path, domain: &str) -> Self {
        Self {
            path: root.join(domain).join("history.jsonl"),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> std::io::Result<std::fs::File> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    fn write_failure(&self, action: &str, source: std::io::Error) -> SentinelError {
        SentinelError::LogWriteFailure {
            action: action.to_string(),
            path: self.path.clone(),
            source,
        }
    }

    /// Append one entry as one line.
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.open().map_err(|e| self.write_failure(&entry.action, e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .map_err(|e| self.write_failure(&entry.action, e))
    }

    /// Confirm the log can be opened for append without writing to it.
    pub fn check_writable(&self, action: &str) -> Result<()> {
        self.open()
            .map(|_| ())
            .map_err(|e| self.write_failure(action, e))
    }

    /// Append for read-only operations: failure is reported as a warning and
    /// does not abort the caller. Returns whether the entry was written.
    pub fn record(&self, entry: &HistoryEntry) -> bool {
        match self.append(entry) {
            Ok(()) => true,
            Err(e) => {
                warn!(action = %entry.action, error = %e, "history log append failed");
                false
            }
        }
    }
}

/// Out-of-band reader for consolidation and audits. Blank lines are ignored.
pub fn read_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    let file = std::fs::File::open(path)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}
