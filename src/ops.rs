//! Command surface: status, kill, anomalies, tree, watch, snapshot.
//!
//! Every operation returns a serializable result and writes History Log
//! entries. Read-only operations treat a failed log write as a warning; kill
//! treats it as fatal.

use crate::collectors::{
    AncestryNode, AncestryResolver, ProcessFilter, ProcessReader, ProcessRecord, ProcessStatus, ProcessTable,
    ProcessTreeNode,
};
use crate::config::SentinelConfig;
use crate::control::{CallerContext, Confirmer, KillReport, KillRequest, Terminator};
use crate::error::{Result, SentinelError};
use crate::risk::{AnomalyDetector, AnomalyHit, Thresholds};
use crate::storage::{write_snapshot, HistoryEntry, HistoryLog, PROCESS_DOMAIN};
use crate::watch::{CancelToken, WatchOptions, WatchReport, WatchSample, Watcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StatusScope {
    /// This tool's own process and its descendants
    Current,
    Pid(u32),
    User(String),
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub running: usize,
    pub sleeping: usize,
    pub zombie: usize,
    pub unknown: usize,
    pub total_memory_bytes: u64,
    pub total_cpu_percent: f64,
}

impl StatusSummary {
    fn add(&mut self, r: &ProcessRecord) {
        self.total += 1;
        match r.status {
            ProcessStatus::Running => self.running += 1,
            ProcessStatus::Sleeping => self.sleeping += 1,
            ProcessStatus::Zombie => self.zombie += 1,
            ProcessStatus::Unknown => self.unknown += 1,
        }
        self.total_memory_bytes += r.memory_bytes;
        self.total_cpu_percent += r.cpu_percent;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub scope: StatusScope,
    pub summary: StatusSummary,
    /// Empty for the `all` scope, which reports counts only
    pub processes: Vec<ProcessRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub thresholds: Thresholds,
    pub scanned: usize,
    pub total_hits: usize,
    pub hits: Vec<AnomalyHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeReport {
    pub root: ProcessTreeNode,
    pub ancestors: Vec<AncestryNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub records: Vec<ProcessRecord>,
}

/// Log an operation rejected before it reached a process table (malformed
/// arguments, unreadable replay input). Returns whether the entry was written.
pub fn record_rejected(history_dir: &Path, action: &str, error: &SentinelError) -> bool {
    let entry = HistoryEntry::new(PROCESS_DOMAIN, action).failed(error);
    HistoryLog::for_domain(history_dir, PROCESS_DOMAIN).record(&entry)
}

pub struct Sentinel<T: ProcessTable> {
    config: SentinelConfig,
    table: T,
    history: HistoryLog,
    caller: CallerContext,
}

impl<T: ProcessTable> Sentinel<T> {
    pub fn new(config: SentinelConfig, table: T) -> Self {
        let history = HistoryLog::for_domain(&config.history_dir, PROCESS_DOMAIN);
        Self {
            config,
            table,
            history,
            caller: CallerContext::current(),
        }
    }

    pub fn with_caller(mut self, caller: CallerContext) -> Self {
        self.caller = caller;
        self
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    fn reader(&self) -> ProcessReader<'_> {
        ProcessReader::new(&self.table)
    }

    fn max_depth(&self) -> usize {
        self.config.safety.max_ancestry_depth
    }

    pub fn status(&self, scope: StatusScope) -> Result<StatusReport> {
        let started = Instant::now();
        let entry = HistoryEntry::new(PROCESS_DOMAIN, "status_check").with("scope", &scope);
        let result = self.collect_status(&scope);
        let entry = match &result {
            Ok(report) => entry
                .with("count", report.summary.total)
                .with("total_memory_bytes", report.summary.total_memory_bytes),
            Err(e) => entry.failed(e),
        };
        self.history.record(&entry.duration(started.elapsed()));
        result
    }

    fn collect_status(&self, scope: &StatusScope) -> Result<StatusReport> {
        let mut summary = StatusSummary::default();
        let processes: Vec<ProcessRecord> = match scope {
            StatusScope::Pid(pid) => vec![self.reader().read_one(*pid)?],
            StatusScope::Current => {
                let me = self.caller.self_pid;
                self.table.refresh();
                let tree = AncestryResolver::new(&self.table).descendants(me, self.max_depth());
                if tree.is_empty() {
                    return Err(SentinelError::ProcessNotFound { pid: me });
                }
                tree.iter().filter_map(|n| self.table.record(n.pid)).collect()
            }
            StatusScope::User(user) => {
                let filter = ProcessFilter {
                    owner: Some(user.clone()),
                    command_contains: None,
                };
                self.reader().read_all(Some(&filter)).collect()
            }
            StatusScope::All => {
                for r in self.reader().read_all(None) {
                    summary.add(&r);
                }
                return Ok(StatusReport {
                    scope: scope.clone(),
                    summary,
                    processes: Vec::new(),
                });
            }
        };
        for r in &processes {
            summary.add(r);
        }
        Ok(StatusReport {
            scope: scope.clone(),
            summary,
            processes,
        })
    }

    pub fn kill(&self, request: KillRequest, confirmer: &dyn Confirmer) -> Result<KillReport> {
        Terminator::new(&self.table, &self.history, &self.config.safety, self.caller, confirmer).kill(request)
    }

    pub fn anomalies(&self, thresholds: Thresholds, limit: Option<usize>) -> Result<AnomalyReport> {
        let started = Instant::now();
        let entry = HistoryEntry::new(PROCESS_DOMAIN, "anomaly_scan").with("thresholds", &thresholds);
        let detector = match AnomalyDetector::new(thresholds) {
            Ok(d) => d,
            Err(e) => {
                self.history.record(&entry.failed(&e).duration(started.elapsed()));
                return Err(e);
            }
        };
        let mut pass = self.reader().read_all(None);
        let records: Vec<ProcessRecord> = pass.by_ref().collect();
        let scanned = records.len();
        let skipped = pass.skipped();
        let mut hits = detector.scan(records);
        let total_hits = hits.len();
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        info!(scanned, total_hits, "anomaly scan complete");
        let top: Vec<u32> = hits.iter().map(|h| h.record.pid).collect();
        self.history.record(
            &entry
                .with("scanned", scanned)
                .with("skipped", skipped)
                .with("hits", total_hits)
                .with("reported_pids", top)
                .duration(started.elapsed()),
        );
        Ok(AnomalyReport {
            thresholds: detector.thresholds().clone(),
            scanned,
            total_hits,
            hits,
        })
    }

    pub fn tree(&self, pid: u32, depth: Option<usize>) -> Result<TreeReport> {
        let started = Instant::now();
        let depth = depth.unwrap_or(self.max_depth());
        let entry = HistoryEntry::new(PROCESS_DOMAIN, "tree").with("pid", pid).with("depth", depth);
        self.table.refresh();
        let resolver = AncestryResolver::new(&self.table);
        let result = match resolver.tree(pid, depth) {
            Some(root) => Ok(TreeReport {
                ancestors: resolver.ancestors(pid, self.max_depth()),
                root,
            }),
            None => Err(SentinelError::ProcessNotFound { pid }),
        };
        let entry = match &result {
            Ok(r) => entry.with("children", r.root.children.len()),
            Err(e) => entry.failed(e),
        };
        self.history.record(&entry.duration(started.elapsed()));
        result
    }

    /// Blocks for up to `options.duration`. `on_sample` sees each sample as it
    /// is taken; cancellation returns the partial session.
    pub fn watch(
        &self,
        pid: u32,
        options: WatchOptions,
        cancel: CancelToken,
        on_sample: impl FnMut(&WatchSample),
    ) -> Result<WatchReport> {
        let started = Instant::now();
        let entry = HistoryEntry::new(PROCESS_DOMAIN, "watch")
            .with("pid", pid)
            .with("interval_ms", options.interval.as_millis() as u64)
            .with("duration_ms", options.duration.as_millis() as u64);
        // One full windowed refresh; sample 0 reads from it.
        let check = if pid == 0 {
            Err(SentinelError::InvalidPid { pid: 0 })
        } else {
            self.table.refresh();
            if self.table.exists(pid) {
                Ok(())
            } else {
                Err(SentinelError::ProcessNotFound { pid })
            }
        };
        if let Err(e) = check {
            self.history.record(&entry.failed(&e).duration(started.elapsed()));
            return Err(e);
        }
        let report = Watcher::new(&self.table, options, cancel).watch(pid)?.run(on_sample);
        info!(pid, samples = report.samples.len(), end = report.end.as_str(), "watch finished");
        self.history.record(
            &entry
                .with("end", report.end)
                .with("summary", &report.summary)
                .duration(started.elapsed()),
        );
        Ok(report)
    }

    pub fn snapshot(
        &self,
        filter: Option<&ProcessFilter>,
        limit: Option<usize>,
        output: Option<PathBuf>,
    ) -> Result<SnapshotReport> {
        let started = Instant::now();
        let mut entry = HistoryEntry::new(PROCESS_DOMAIN, "snapshot");
        if let Some(f) = filter {
            entry = entry.with("filter", f);
        }
        let records: Vec<ProcessRecord> = self
            .reader()
            .read_all(filter)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        entry = entry.with("count", records.len());
        if let Some(ref path) = output {
            entry = entry.with("path", path);
            if let Err(e) = write_snapshot(path, &records) {
                self.history.record(&entry.failed(&e).duration(started.elapsed()));
                return Err(e);
            }
        }
        self.history.record(&entry.duration(started.elapsed()));
        Ok(SnapshotReport {
            count: records.len(),
            path: output,
            records,
        })
    }
}
