//! Process table access: normalized records, the OS seam, snapshot reads and
//! ancestry walks.

mod ancestry;
mod memory;
mod process;
mod reader;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use ancestry::{AncestorChain, AncestryNode, AncestryResolver, ProcessTreeNode, DEFAULT_MAX_DEPTH};
pub use memory::MemoryTable;
pub use process::SysinfoTable;
pub use reader::{ProcessReader, ProcessRecords};

/// Immutable snapshot of one OS process at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
    pub owner: Option<String>,
    pub command_line: Vec<String>,
    /// Usage over the measurement window preceding the read
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub thread_count: Option<u32>,
    pub start_time: DateTime<Utc>,
    pub status: ProcessStatus,
}

impl ProcessRecord {
    /// Seconds between start and `now`, clamped at zero for clock skew.
    pub fn runtime_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_seconds().max(0)
    }

    pub fn command_string(&self) -> String {
        if self.command_line.is_empty() {
            self.name.clone()
        } else {
            self.command_line.join(" ")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Zombie,
    Unknown,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Sleeping => "sleeping",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Unknown => "unknown",
        }
    }
}

/// Predicate over owner and command line used by bulk reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessFilter {
    /// Exact owner username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Case-insensitive substring of the command line or process name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_contains: Option<String>,
}

impl ProcessFilter {
    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.command_contains.is_none()
    }

    pub fn matches(&self, record: &ProcessRecord) -> bool {
        if let Some(ref owner) = self.owner {
            if record.owner.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        if let Some(ref needle) = self.command_contains {
            let needle = needle.to_lowercase();
            let haystack = record.command_string().to_lowercase();
            if !haystack.contains(&needle) && !record.name.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationSignal {
    /// SIGTERM or platform equivalent
    Graceful,
    /// SIGKILL or platform equivalent
    Forceful,
}

/// The OS process table. The live implementation is [`SysinfoTable`]; tests
/// substitute an in-memory table.
///
/// Methods take `&self`; implementations refresh behind interior mutability.
pub trait ProcessTable {
    /// Re-query the full table.
    fn refresh(&self);

    /// Re-query one pid. Returns false when it no longer exists.
    fn refresh_pid(&self, pid: u32) -> bool;

    /// Pids present as of the last refresh.
    fn pids(&self) -> Vec<u32>;

    fn record(&self, pid: u32) -> Option<ProcessRecord>;

    fn parent_of(&self, pid: u32) -> Option<u32>;

    fn children_of(&self, pid: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .pids()
            .into_iter()
            .filter(|&p| p != pid && self.parent_of(p) == Some(pid))
            .collect();
        out.sort_unstable();
        out
    }

    fn exists(&self, pid: u32) -> bool {
        self.record(pid).is_some()
    }

    /// Deliver a termination signal. Returns false when delivery failed.
    fn send_signal(&self, pid: u32, signal: TerminationSignal) -> bool;

    /// Live check after a fresh query; zombies count as gone.
    fn is_alive(&self, pid: u32) -> bool {
        if !self.refresh_pid(pid) {
            return false;
        }
        self.record(pid)
            .map(|r| r.status != ProcessStatus::Zombie)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cmd: &[&str], owner: Option<&str>) -> ProcessRecord {
        ProcessRecord {
            pid: 10,
            parent_pid: Some(1),
            name: "python3".into(),
            owner: owner.map(String::from),
            command_line: cmd.iter().map(|s| s.to_string()).collect(),
            cpu_percent: 0.0,
            memory_bytes: 0,
            thread_count: Some(1),
            start_time: Utc::now(),
            status: ProcessStatus::Running,
        }
    }

    #[test]
    fn filter_matches_owner_and_substring() {
        let r = record(&["python3", "-m", "http.server"], Some("dev"));
        let f = ProcessFilter {
            owner: Some("dev".into()),
            command_contains: Some("HTTP.SERVER".into()),
        };
        assert!(f.matches(&r));
        let f = ProcessFilter {
            owner: Some("root".into()),
            command_contains: None,
        };
        assert!(!f.matches(&r));
        assert!(ProcessFilter::default().matches(&r));
    }

    #[test]
    fn filter_falls_back_to_name_when_command_line_hidden() {
        let r = record(&[], None);
        let f = ProcessFilter {
            owner: None,
            command_contains: Some("python".into()),
        };
        assert!(f.matches(&r));
    }

    #[test]
    fn runtime_never_negative() {
        let mut r = record(&[], None);
        r.start_time = Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(r.runtime_seconds(Utc::now()), 0);
    }
}
