//! Fixed-cadence watcher. Samples are taken at `start + k * interval` for
//! every `k` with `k * interval <= duration`; the session ends early when the
//! target exits or the cancel token trips, keeping what was collected.

use crate::collectors::{ProcessRecord, ProcessStatus, ProcessTable};
use crate::error::{Result, SentinelError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Granularity at which a sleeping watcher notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Shared stop flag; cloned into signal handlers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub interval: Duration,
    pub duration: Duration,
    /// Keep full command lines in samples
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSample {
    pub sequence_index: u64,
    pub elapsed_ms: u64,
    pub record: ProcessRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEnd {
    Completed,
    TargetExited,
    Cancelled,
}

impl WatchEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEnd::Completed => "completed",
            WatchEnd::TargetExited => "target_exited",
            WatchEnd::Cancelled => "cancelled",
        }
    }
}

pub struct Watcher<'a> {
    table: &'a dyn ProcessTable,
    options: WatchOptions,
    cancel: CancelToken,
}

impl<'a> Watcher<'a> {
    pub fn new(table: &'a dyn ProcessTable, options: WatchOptions, cancel: CancelToken) -> Self {
        Self {
            table,
            options,
            cancel,
        }
    }

    /// Start a fresh session at sample 0. Sampling happens as the session is
    /// iterated; each `next()` blocks until the next tick. Sample 0 reads the
    /// table as last refreshed, so refresh it before watching.
    pub fn watch(&self, pid: u32) -> Result<WatchSession<'a>> {
        if pid == 0 {
            return Err(SentinelError::InvalidPid { pid: 0 });
        }
        Ok(WatchSession {
            table: self.table,
            pid,
            interval: self.options.interval.max(MIN_INTERVAL),
            duration: self.options.duration,
            verbose: self.options.verbose,
            cancel: self.cancel.clone(),
            started: Instant::now(),
            next_index: 0,
            end: None,
        })
    }
}

pub struct WatchSession<'a> {
    table: &'a dyn ProcessTable,
    pid: u32,
    interval: Duration,
    duration: Duration,
    verbose: bool,
    cancel: CancelToken,
    started: Instant,
    next_index: u64,
    end: Option<WatchEnd>,
}

impl WatchSession<'_> {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Why the session stopped; `None` while still running.
    pub fn end(&self) -> Option<WatchEnd> {
        self.end
    }

    /// Drain the session, invoking `on_sample` as each sample arrives.
    pub fn run(mut self, mut on_sample: impl FnMut(&WatchSample)) -> WatchReport {
        let mut samples = Vec::new();
        while let Some(sample) = self.next() {
            on_sample(&sample);
            samples.push(sample);
        }
        let summary = WatchSummary::from_samples(&samples);
        WatchReport {
            pid: self.pid,
            end: self.end.unwrap_or(WatchEnd::Completed),
            summary,
            samples,
        }
    }

    fn finish(&mut self, end: WatchEnd) -> Option<WatchSample> {
        self.end = Some(end);
        None
    }

    /// Sleep until `offset` past start. False when cancelled first.
    fn sleep_until(&self, offset: Duration) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let elapsed = self.started.elapsed();
            if elapsed >= offset {
                return true;
            }
            std::thread::sleep((offset - elapsed).min(CANCEL_POLL));
        }
    }
}

impl Iterator for WatchSession<'_> {
    type Item = WatchSample;

    fn next(&mut self) -> Option<WatchSample> {
        if self.end.is_some() {
            return None;
        }
        let offset = self.interval.saturating_mul(self.next_index.min(u64::from(u32::MAX)) as u32);
        if offset > self.duration {
            return self.finish(WatchEnd::Completed);
        }
        if !self.sleep_until(offset) {
            return self.finish(WatchEnd::Cancelled);
        }
        // Sample 0 uses the table's last full read, which carries a real CPU window.
        if self.next_index > 0 && !self.table.refresh_pid(self.pid) {
            return self.finish(WatchEnd::TargetExited);
        }
        let Some(mut record) = self.table.record(self.pid) else {
            return self.finish(WatchEnd::TargetExited);
        };
        if record.status == ProcessStatus::Zombie {
            return self.finish(WatchEnd::TargetExited);
        }
        if !self.verbose {
            record.command_line.clear();
        }
        let sample = WatchSample {
            sequence_index: self.next_index,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            record,
        };
        self.next_index += 1;
        Some(sample)
    }
}

/// Trend figures over one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchSummary {
    pub samples: usize,
    pub cpu_min: f64,
    pub cpu_max: f64,
    pub cpu_mean: f64,
    pub memory_first: u64,
    pub memory_last: u64,
    pub memory_peak: u64,
    pub span_ms: u64,
}

impl WatchSummary {
    pub fn from_samples(samples: &[WatchSample]) -> Self {
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return Self::default();
        };
        let cpu = samples.iter().map(|s| s.record.cpu_percent);
        Self {
            samples: samples.len(),
            cpu_min: cpu.clone().fold(f64::INFINITY, f64::min),
            cpu_max: cpu.clone().fold(f64::NEG_INFINITY, f64::max),
            cpu_mean: cpu.sum::<f64>() / samples.len() as f64,
            memory_first: first.record.memory_bytes,
            memory_last: last.record.memory_bytes,
            memory_peak: samples.iter().map(|s| s.record.memory_bytes).max().unwrap_or(0),
            span_ms: last.elapsed_ms.saturating_sub(first.elapsed_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchReport {
    pub pid: u32,
    pub end: WatchEnd,
    pub summary: WatchSummary,
    pub samples: Vec<WatchSample>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::MemoryTable;
    use chrono::Utc;

    fn target(pid: u32, cpu: f64, mem: u64) -> ProcessRecord {
        ProcessRecord {
            pid,
            parent_pid: Some(1),
            name: "worker".into(),
            owner: Some("dev".into()),
            command_line: vec!["worker".into(), "--secret-token=abc".into()],
            cpu_percent: cpu,
            memory_bytes: mem,
            thread_count: Some(4),
            start_time: Utc::now(),
            status: ProcessStatus::Running,
        }
    }

    fn options(interval_ms: u64, duration_ms: u64) -> WatchOptions {
        WatchOptions {
            interval: Duration::from_millis(interval_ms),
            duration: Duration::from_millis(duration_ms),
            verbose: false,
        }
    }

    #[test]
    fn completes_with_one_sample_per_tick() {
        let table = MemoryTable::from_records([target(42, 5.0, 100)]);
        let watcher = Watcher::new(&table, options(20, 60), CancelToken::new());
        let report = watcher.watch(42).unwrap().run(|_| {});
        assert_eq!(report.end, WatchEnd::Completed);
        let idx: Vec<u64> = report.samples.iter().map(|s| s.sequence_index).collect();
        assert_eq!(idx, vec![0, 1, 2, 3]);
        assert!(report.samples.windows(2).all(|w| w[0].elapsed_ms <= w[1].elapsed_ms));
    }

    #[test]
    fn command_line_hidden_unless_verbose() {
        let table = MemoryTable::from_records([target(42, 5.0, 100)]);
        let quiet = Watcher::new(&table, options(10, 0), CancelToken::new());
        let s = quiet.watch(42).unwrap().next().unwrap();
        assert!(s.record.command_line.is_empty());

        let mut opts = options(10, 0);
        opts.verbose = true;
        let loud = Watcher::new(&table, opts, CancelToken::new());
        let s = loud.watch(42).unwrap().next().unwrap();
        assert_eq!(s.record.command_line.len(), 2);
    }

    #[test]
    fn cancellation_keeps_partial_samples() {
        let table = MemoryTable::from_records([target(42, 5.0, 100)]);
        let cancel = CancelToken::new();
        let watcher = Watcher::new(&table, options(20, 10_000), cancel.clone());
        let report = watcher.watch(42).unwrap().run(|s| {
            if s.sequence_index == 1 {
                cancel.cancel();
            }
        });
        assert_eq!(report.end, WatchEnd::Cancelled);
        assert_eq!(report.samples.len(), 2);
    }

    #[test]
    fn missing_target_ends_cleanly_with_no_samples() {
        let table = MemoryTable::default();
        let watcher = Watcher::new(&table, options(10, 100), CancelToken::new());
        let mut session = watcher.watch(7).unwrap();
        assert!(session.next().is_none());
        assert_eq!(session.end(), Some(WatchEnd::TargetExited));
        assert!(session.next().is_none());
    }

    #[test]
    fn summary_tracks_trend() {
        let mk = |i: u64, cpu: f64, mem: u64| WatchSample {
            sequence_index: i,
            elapsed_ms: i * 1000,
            record: target(1, cpu, mem),
        };
        let s = WatchSummary::from_samples(&[mk(0, 10.0, 100), mk(1, 30.0, 300), mk(2, 20.0, 200)]);
        assert_eq!(s.samples, 3);
        assert_eq!(s.cpu_min, 10.0);
        assert_eq!(s.cpu_max, 30.0);
        assert!((s.cpu_mean - 20.0).abs() < 1e-9);
        assert_eq!(s.memory_peak, 300);
        assert_eq!(s.memory_last, 200);
        assert_eq!(s.span_ms, 2000);
        assert_eq!(WatchSummary::from_samples(&[]), WatchSummary::default());
    }

    /// Counts single-pid refreshes on top of an in-memory table.
    struct Counting {
        inner: MemoryTable,
        pid_refreshes: std::cell::Cell<usize>,
    }

    impl ProcessTable for Counting {
        fn refresh(&self) {
            self.inner.refresh()
        }
        fn refresh_pid(&self, pid: u32) -> bool {
            self.pid_refreshes.set(self.pid_refreshes.get() + 1);
            self.inner.refresh_pid(pid)
        }
        fn pids(&self) -> Vec<u32> {
            self.inner.pids()
        }
        fn record(&self, pid: u32) -> Option<ProcessRecord> {
            self.inner.record(pid)
        }
        fn parent_of(&self, pid: u32) -> Option<u32> {
            self.inner.parent_of(pid)
        }
        fn send_signal(&self, pid: u32, signal: crate::collectors::TerminationSignal) -> bool {
            self.inner.send_signal(pid, signal)
        }
    }

    #[test]
    fn first_sample_keeps_the_windowed_reading() {
        let table = Counting {
            inner: MemoryTable::from_records([target(42, 37.5, 100)]),
            pid_refreshes: std::cell::Cell::new(0),
        };
        let watcher = Watcher::new(&table, options(10, 10), CancelToken::new());
        let report = watcher.watch(42).unwrap().run(|_| {});
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.samples[0].record.cpu_percent, 37.5);
        // Only sample 1 re-reads the pid.
        assert_eq!(table.pid_refreshes.get(), 1);
    }
}
