//! In-memory process table: replays a snapshot file offline and stands in
//! for the OS in tests (fake "self" pid, scripted exits, recorded signals).

use super::{ProcessRecord, ProcessTable, TerminationSignal};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Default)]
struct Inner {
    procs: BTreeMap<u32, ProcessRecord>,
    /// Exit deadlines; a pid past its deadline is treated as gone
    exits: BTreeMap<u32, Instant>,
    /// Listed by `pids()` but no longer readable
    vanishing: HashSet<u32>,
    /// Signals the process survives
    ignored: HashSet<(u32, TerminationSignal)>,
    signals: Vec<(u32, TerminationSignal)>,
}

#[derive(Default)]
pub struct MemoryTable {
    inner: Mutex<Inner>,
}

impl MemoryTable {
    pub fn from_records(records: impl IntoIterator<Item = ProcessRecord>) -> Self {
        let table = Self::default();
        for r in records {
            table.insert(r);
        }
        table
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, record: ProcessRecord) {
        self.inner().procs.insert(record.pid, record);
    }

    pub fn remove(&self, pid: u32) {
        self.inner().procs.remove(&pid);
    }

    /// The pid disappears once `at` has passed.
    pub fn exit_at(&self, pid: u32, at: Instant) {
        self.inner().exits.insert(pid, at);
    }

    /// Keep the pid in listings but fail detail reads, as if it exited mid-read.
    pub fn mark_vanishing(&self, pid: u32) {
        self.inner().vanishing.insert(pid);
    }

    /// The pid survives this signal.
    pub fn ignore_signal(&self, pid: u32, signal: TerminationSignal) {
        self.inner().ignored.insert((pid, signal));
    }

    /// Every signal delivered so far, in order.
    pub fn signals(&self) -> Vec<(u32, TerminationSignal)> {
        self.inner().signals.clone()
    }

    fn expire(inner: &mut Inner) {
        let now = Instant::now();
        let gone: Vec<u32> = inner
            .exits
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in gone {
            inner.exits.remove(&pid);
            inner.procs.remove(&pid);
        }
    }
}

impl ProcessTable for MemoryTable {
    fn refresh(&self) {
        Self::expire(&mut self.inner());
    }

    fn refresh_pid(&self, pid: u32) -> bool {
        let mut inner = self.inner();
        Self::expire(&mut inner);
        inner.procs.contains_key(&pid) && !inner.vanishing.contains(&pid)
    }

    fn pids(&self) -> Vec<u32> {
        self.inner().procs.keys().copied().collect()
    }

    fn record(&self, pid: u32) -> Option<ProcessRecord> {
        let inner = self.inner();
        if inner.vanishing.contains(&pid) {
            return None;
        }
        inner.procs.get(&pid).cloned()
    }

    fn parent_of(&self, pid: u32) -> Option<u32> {
        self.inner().procs.get(&pid).and_then(|r| r.parent_pid)
    }

    fn send_signal(&self, pid: u32, signal: TerminationSignal) -> bool {
        let mut inner = self.inner();
        if !inner.procs.contains_key(&pid) {
            return false;
        }
        inner.signals.push((pid, signal));
        if !inner.ignored.contains(&(pid, signal)) {
            inner.procs.remove(&pid);
        }
        true
    }
}
