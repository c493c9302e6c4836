//! Termination state machine:
//!
//! ```text
//! Requested -> AncestryChecked -> Blocked
//!                              -> [ConfirmationPending ->] Executed | Aborted
//! ```
//!
//! Every terminal state writes exactly one `kill` entry to the History Log.
//! The terminator fails closed: an unresolvable ancestry, a missing
//! confirmation or an unwritable log all leave the target untouched.

use super::confirm::{Confirmation, ConfirmationPrompt, Confirmer};
use crate::collectors::{AncestryResolver, ProcessRecord, ProcessTable, TerminationSignal};
use crate::config::SafetyConfig;
use crate::error::{Result, SentinelError};
use crate::storage::{HistoryEntry, HistoryLog, PROCESS_DOMAIN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const EXIT_POLL: Duration = Duration::from_millis(100);
const DEFAULT_REASON: &str = "not specified";

/// Identity of the controlling instance. Passed in explicitly so tests can
/// substitute a fake self pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    pub self_pid: u32,
}

impl CallerContext {
    pub fn current() -> Self {
        Self {
            self_pid: std::process::id(),
        }
    }

    pub fn with_pid(self_pid: u32) -> Self {
        Self { self_pid }
    }
}

#[derive(Debug, Clone)]
pub struct KillRequest {
    pub pid: u32,
    /// Skip confirmation and escalate to a forceful signal after the grace period
    pub force: bool,
    pub reason: Option<String>,
}

impl KillRequest {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            force: false,
            reason: None,
        }
    }

    fn reason_text(&self) -> String {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REASON)
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillState {
    Requested,
    AncestryChecked,
    Blocked,
    ConfirmationPending,
    Executed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Target is the calling process
    SelfTarget,
    /// Target supervises the calling process
    AncestorOfCaller,
    /// Kernel/init equivalent or configured protected process
    ProtectedProcess,
    /// The caller's own ancestry could not be fully resolved
    AncestryUnresolved,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockReason::SelfTarget => "target is the calling process",
            BlockReason::AncestorOfCaller => "target is an ancestor of the calling process",
            BlockReason::ProtectedProcess => "target is a protected system process",
            BlockReason::AncestryUnresolved => "ancestry of the calling process could not be resolved",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    Declined,
    ConfirmationTimeout { timeout_secs: u64 },
    /// The pid exited or now belongs to a different process
    TargetChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KillOutcome {
    Executed { terminated: bool, escalated: bool },
    Blocked { reason: BlockReason },
    Aborted { reason: AbortReason },
}

impl KillOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, KillOutcome::Executed { terminated: true, .. })
    }

    fn describe(&self) -> Option<String> {
        match self {
            KillOutcome::Executed { terminated: true, .. } => None,
            KillOutcome::Executed { terminated: false, .. } => Some("process still running after signal".into()),
            KillOutcome::Blocked { reason } => Some(format!("blocked: {reason}")),
            KillOutcome::Aborted { reason: AbortReason::Declined } => Some("aborted: confirmation declined".into()),
            KillOutcome::Aborted {
                reason: AbortReason::ConfirmationTimeout { timeout_secs },
            } => Some(format!("aborted: no confirmation within {timeout_secs}s")),
            KillOutcome::Aborted {
                reason: AbortReason::TargetChanged,
            } => Some("aborted: target exited or pid was reused before signalling".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillReport {
    pub pid: u32,
    pub name: String,
    pub reason: String,
    pub outcome: KillOutcome,
    pub transitions: Vec<KillState>,
    pub duration_ms: u64,
}

impl KillReport {
    /// Convert a safety refusal into its error. Executed outcomes pass.
    pub fn ensure_not_refused(&self) -> Result<()> {
        match self.outcome {
            KillOutcome::Blocked { reason } => Err(SentinelError::UnsafeTerminationBlocked {
                pid: self.pid,
                reason: reason.to_string(),
            }),
            KillOutcome::Aborted {
                reason: AbortReason::ConfirmationTimeout { timeout_secs },
            } => Err(SentinelError::ConfirmationTimeout {
                pid: self.pid,
                timeout_secs,
            }),
            KillOutcome::Aborted {
                reason: AbortReason::Declined,
            } => Err(SentinelError::UnsafeTerminationBlocked {
                pid: self.pid,
                reason: "confirmation declined".into(),
            }),
            KillOutcome::Aborted {
                reason: AbortReason::TargetChanged,
            } => Err(SentinelError::UnsafeTerminationBlocked {
                pid: self.pid,
                reason: "target exited or pid was reused".into(),
            }),
            KillOutcome::Executed { .. } => Ok(()),
        }
    }
}

pub struct Terminator<'a> {
    table: &'a dyn ProcessTable,
    history: &'a HistoryLog,
    safety: &'a SafetyConfig,
    caller: CallerContext,
    confirmer: &'a dyn Confirmer,
}

impl<'a> Terminator<'a> {
    pub fn new(
        table: &'a dyn ProcessTable,
        history: &'a HistoryLog,
        safety: &'a SafetyConfig,
        caller: CallerContext,
        confirmer: &'a dyn Confirmer,
    ) -> Self {
        Self {
            table,
            history,
            safety,
            caller,
            confirmer,
        }
    }

    pub fn kill(&self, request: KillRequest) -> Result<KillReport> {
        let started = Instant::now();
        let pid = request.pid;
        let reason = request.reason_text();
        let mut transitions = vec![KillState::Requested];

        let target = if pid == 0 {
            None
        } else if self.table.refresh_pid(pid) {
            self.table.record(pid)
        } else {
            None
        };
        let Some(target) = target else {
            let err = if pid == 0 {
                SentinelError::InvalidPid { pid: 0 }
            } else {
                SentinelError::ProcessNotFound { pid }
            };
            let entry = HistoryEntry::new(PROCESS_DOMAIN, "kill")
                .duration(started.elapsed())
                .failed(&err)
                .with("pid", pid)
                .with("reason", &reason)
                .with("force", request.force)
                .with("transitions", &transitions);
            self.history.append(&entry)?;
            return Err(err);
        };

        let blocked = self.check_ancestry(&target);
        transitions.push(KillState::AncestryChecked);
        if let Some(block) = blocked {
            warn!(pid, reason = %block, "termination blocked");
            transitions.push(KillState::Blocked);
            return self.finish(&request, &target, reason, KillOutcome::Blocked { reason: block }, transitions, started);
        }

        if !request.force && self.safety.confirmation_required {
            transitions.push(KillState::ConfirmationPending);
            let prompt = ConfirmationPrompt {
                pid,
                name: target.name.clone(),
                command: target.command_string(),
                reason: reason.clone(),
            };
            let timeout_secs = self.safety.confirmation_timeout_secs;
            let abort = match self.confirmer.confirm(&prompt, Duration::from_secs(timeout_secs)) {
                Confirmation::Approved => None,
                Confirmation::Declined => Some(AbortReason::Declined),
                Confirmation::TimedOut => Some(AbortReason::ConfirmationTimeout { timeout_secs }),
            };
            if let Some(abort) = abort {
                info!(pid, ?abort, "termination aborted");
                transitions.push(KillState::Aborted);
                return self.finish(&request, &target, reason, KillOutcome::Aborted { reason: abort }, transitions, started);
            }
        }

        // The confirmation wait can outlive the target; never signal a reused pid.
        if !self.still_same_process(&target) {
            warn!(pid, "target changed before signalling");
            transitions.push(KillState::Aborted);
            let outcome = KillOutcome::Aborted {
                reason: AbortReason::TargetChanged,
            };
            return self.finish(&request, &target, reason, outcome, transitions, started);
        }

        // An un-auditable kill is not allowed: probe the log before signalling.
        self.history.check_writable("kill")?;

        let (terminated, escalated) = self.execute(pid, request.force);
        transitions.push(KillState::Executed);
        info!(pid, terminated, escalated, "termination executed");
        self.finish(
            &request,
            &target,
            reason,
            KillOutcome::Executed { terminated, escalated },
            transitions,
            started,
        )
    }

    fn check_ancestry(&self, target: &ProcessRecord) -> Option<BlockReason> {
        if target.pid == self.caller.self_pid {
            return Some(BlockReason::SelfTarget);
        }
        if self.safety.is_protected(target.pid, &target.name) {
            return Some(BlockReason::ProtectedProcess);
        }
        let chain = AncestryResolver::new(self.table)
            .ancestor_chain(self.caller.self_pid, self.safety.max_ancestry_depth);
        if chain.nodes.is_empty() {
            return Some(BlockReason::AncestryUnresolved);
        }
        if chain.contains_ancestor(target.pid) {
            return Some(BlockReason::AncestorOfCaller);
        }
        if !chain.complete {
            return Some(BlockReason::AncestryUnresolved);
        }
        None
    }

    /// Fresh read of the pid still shows the process that was checked.
    fn still_same_process(&self, target: &ProcessRecord) -> bool {
        if !self.table.refresh_pid(target.pid) {
            return false;
        }
        match self.table.record(target.pid) {
            Some(now) => now.start_time == target.start_time && now.parent_pid == target.parent_pid,
            None => false,
        }
    }

    /// Graceful signal, wait out the grace period, escalate only when forced.
    /// Returns `(terminated, escalated)`.
    fn execute(&self, pid: u32, force: bool) -> (bool, bool) {
        let grace = Duration::from_secs(self.safety.kill_grace_secs);
        if self.table.send_signal(pid, TerminationSignal::Graceful) && self.wait_for_exit(pid, grace) {
            return (true, false);
        }
        if !self.table.is_alive(pid) {
            return (true, false);
        }
        if !force {
            return (false, false);
        }
        let sent = self.table.send_signal(pid, TerminationSignal::Forceful);
        let gone = (sent && self.wait_for_exit(pid, grace)) || !self.table.is_alive(pid);
        (gone, true)
    }

    fn wait_for_exit(&self, pid: u32, within: Duration) -> bool {
        let start = Instant::now();
        loop {
            if !self.table.is_alive(pid) {
                return true;
            }
            if start.elapsed() >= within {
                return false;
            }
            std::thread::sleep(EXIT_POLL);
        }
    }

    fn finish(
        &self,
        request: &KillRequest,
        target: &ProcessRecord,
        reason: String,
        outcome: KillOutcome,
        transitions: Vec<KillState>,
        started: Instant,
    ) -> Result<KillReport> {
        let mut entry = HistoryEntry::new(PROCESS_DOMAIN, "kill")
            .duration(started.elapsed())
            .success(outcome.is_success())
            .with("pid", target.pid)
            .with("name", &target.name)
            .with("reason", &reason)
            .with("force", request.force)
            .with("outcome", outcome)
            .with("transitions", &transitions);
        if let Some(problem) = outcome.describe() {
            entry = entry.failed(problem);
        }
        self.history.append(&entry)?;
        Ok(KillReport {
            pid: target.pid,
            name: target.name.clone(),
            reason,
            outcome,
            transitions,
            duration_ms: entry.duration_ms,
        })
    }
}
