//! ProcessSnapshot reader: single-pid reads and one-pass bulk reads.

use super::{ProcessFilter, ProcessRecord, ProcessTable};
use crate::error::{Result, SentinelError};
use tracing::debug;

pub struct ProcessReader<'a> {
    table: &'a dyn ProcessTable,
}

impl<'a> ProcessReader<'a> {
    pub fn new(table: &'a dyn ProcessTable) -> Self {
        Self { table }
    }

    /// Fresh read of one process.
    pub fn read_one(&self, pid: u32) -> Result<ProcessRecord> {
        if pid == 0 {
            return Err(SentinelError::InvalidPid { pid: 0 });
        }
        if !self.table.refresh_pid(pid) {
            return Err(SentinelError::ProcessNotFound { pid });
        }
        self.table
            .record(pid)
            .ok_or(SentinelError::ProcessNotFound { pid })
    }

    /// Re-query the table and yield matching records lazily. Processes that
    /// exit between listing and detail fetch are skipped.
    pub fn read_all(&self, filter: Option<&ProcessFilter>) -> ProcessRecords<'a> {
        self.table.refresh();
        ProcessRecords {
            table: self.table,
            pids: self.table.pids().into_iter(),
            filter: filter.filter(|f| !f.is_empty()).cloned(),
            skipped: 0,
        }
    }
}

/// One pass over the table as of a single refresh. Not restartable; call
/// [`ProcessReader::read_all`] again for a new pass.
pub struct ProcessRecords<'a> {
    table: &'a dyn ProcessTable,
    pids: std::vec::IntoIter<u32>,
    filter: Option<ProcessFilter>,
    skipped: usize,
}

impl ProcessRecords<'_> {
    /// Pids that vanished before their record could be read.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for ProcessRecords<'_> {
    type Item = ProcessRecord;

    fn next(&mut self) -> Option<ProcessRecord> {
        for pid in self.pids.by_ref() {
            let Some(record) = self.table.record(pid) else {
                debug!(pid, "process exited during read; skipping");
                self.skipped += 1;
                continue;
            };
            if let Some(ref f) = self.filter {
                if !f.matches(&record) {
                    continue;
                }
            }
            return Some(record);
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.pids.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{MemoryTable, ProcessStatus};
    use chrono::Utc;

    fn proc_(pid: u32, owner: &str, cmd: &str) -> ProcessRecord {
        ProcessRecord {
            pid,
            parent_pid: Some(1),
            name: cmd.split_whitespace().next().unwrap_or_default().to_string(),
            owner: Some(owner.to_string()),
            command_line: cmd.split_whitespace().map(String::from).collect(),
            cpu_percent: 1.0,
            memory_bytes: 1024,
            thread_count: Some(1),
            start_time: Utc::now(),
            status: ProcessStatus::Sleeping,
        }
    }

    #[test]
    fn read_one_reports_missing_pid() {
        let table = MemoryTable::from_records([proc_(5, "dev", "bash")]);
        let reader = ProcessReader::new(&table);
        assert_eq!(reader.read_one(5).unwrap().pid, 5);
        assert!(matches!(
            reader.read_one(6),
            Err(SentinelError::ProcessNotFound { pid: 6 })
        ));
        assert!(matches!(reader.read_one(0), Err(SentinelError::InvalidPid { .. })));
    }

    #[test]
    fn read_all_skips_processes_that_exit_mid_read() {
        let table = MemoryTable::from_records([
            proc_(5, "dev", "bash"),
            proc_(6, "dev", "cargo build"),
            proc_(7, "dev", "rustc"),
        ]);
        table.mark_vanishing(6);
        let reader = ProcessReader::new(&table);
        let mut pass = reader.read_all(None);
        let pids: Vec<u32> = pass.by_ref().map(|r| r.pid).collect();
        assert_eq!(pids, vec![5, 7]);
        assert_eq!(pass.skipped(), 1);
    }

    #[test]
    fn read_all_applies_filter() {
        let table = MemoryTable::from_records([
            proc_(5, "dev", "bash"),
            proc_(6, "root", "cargo build"),
            proc_(7, "dev", "cargo test"),
        ]);
        let reader = ProcessReader::new(&table);
        let filter = ProcessFilter {
            owner: Some("dev".into()),
            command_contains: Some("cargo".into()),
        };
        let pids: Vec<u32> = reader.read_all(Some(&filter)).map(|r| r.pid).collect();
        assert_eq!(pids, vec![7]);
    }
}
