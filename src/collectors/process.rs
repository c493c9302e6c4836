//! Live process table (cross-platform via sysinfo).
//!
//! CPU% is windowed: sysinfo reports usage accumulated since the previous
//! refresh of a process, so construction and [`ProcessTable::refresh`] both
//! refresh twice, `cpu_window` apart. Single-pid refreshes measure since the
//! last refresh of that pid.

use super::{ProcessRecord, ProcessStatus, ProcessTable, TerminationSignal};
use chrono::{TimeZone, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, Signal, System, Users};
use tracing::debug;

pub struct SysinfoTable {
    sys: Mutex<System>,
    users: Users,
    cpu_window: Duration,
}

impl SysinfoTable {
    pub fn new(cpu_window: Duration) -> Self {
        let table = Self {
            sys: Mutex::new(System::new()),
            users: Users::new_with_refreshed_list(),
            cpu_window: cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        };
        table.refresh();
        table
    }

    fn sys(&self) -> MutexGuard<'_, System> {
        self.sys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn to_record(&self, pid: Pid, proc_: &sysinfo::Process) -> ProcessRecord {
        let owner = proc_
            .user_id()
            .and_then(|uid| self.users.get_user_by_id(uid))
            .map(|u| u.name().to_string());
        let start_time = Utc
            .timestamp_opt(proc_.start_time() as i64, 0)
            .single()
            .unwrap_or_default();
        ProcessRecord {
            pid: pid.as_u32(),
            parent_pid: proc_.parent().map(|p| p.as_u32()),
            name: proc_.name().to_string(),
            owner,
            command_line: proc_.cmd().to_vec(),
            cpu_percent: f64::from(proc_.cpu_usage()),
            memory_bytes: proc_.memory(),
            thread_count: proc_.tasks().map(|t| t.len() as u32),
            start_time,
            status: map_status(proc_.status()),
        }
    }
}

fn map_status(status: sysinfo::ProcessStatus) -> ProcessStatus {
    match status {
        sysinfo::ProcessStatus::Run => ProcessStatus::Running,
        sysinfo::ProcessStatus::Sleep | sysinfo::ProcessStatus::Idle => ProcessStatus::Sleeping,
        sysinfo::ProcessStatus::Zombie => ProcessStatus::Zombie,
        _ => ProcessStatus::Unknown,
    }
}

impl ProcessTable for SysinfoTable {
    fn refresh(&self) {
        let mut sys = self.sys();
        sys.refresh_processes();
        std::thread::sleep(self.cpu_window);
        sys.refresh_processes();
    }

    fn refresh_pid(&self, pid: u32) -> bool {
        self.sys().refresh_process(Pid::from_u32(pid))
    }

    fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.sys().processes().keys().map(|p| p.as_u32()).collect();
        pids.sort_unstable();
        pids
    }

    fn record(&self, pid: u32) -> Option<ProcessRecord> {
        let sys = self.sys();
        let pid = Pid::from_u32(pid);
        sys.process(pid).map(|p| self.to_record(pid, p))
    }

    fn parent_of(&self, pid: u32) -> Option<u32> {
        self.sys()
            .process(Pid::from_u32(pid))
            .and_then(|p| p.parent())
            .map(|p| p.as_u32())
    }

    fn children_of(&self, pid: u32) -> Vec<u32> {
        let parent = Pid::from_u32(pid);
        let sys = self.sys();
        let mut out: Vec<u32> = sys
            .processes()
            .iter()
            .filter(|(child, proc_)| **child != parent && proc_.parent() == Some(parent))
            .map(|(child, _)| child.as_u32())
            .collect();
        out.sort_unstable();
        out
    }

    fn exists(&self, pid: u32) -> bool {
        self.sys().process(Pid::from_u32(pid)).is_some()
    }

    fn send_signal(&self, pid: u32, signal: TerminationSignal) -> bool {
        let sys = self.sys();
        let Some(proc_) = sys.process(Pid::from_u32(pid)) else {
            return false;
        };
        let sig = match signal {
            TerminationSignal::Graceful => Signal::Term,
            TerminationSignal::Forceful => Signal::Kill,
        };
        // kill_with is None when the platform has no such signal
        match proc_.kill_with(sig) {
            Some(sent) => sent,
            None => {
                debug!(pid, ?signal, "signal unsupported; falling back to platform kill");
                proc_.kill()
            }
        }
    }
}
