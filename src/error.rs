//! Error taxonomy shared by every component.

use std::path::PathBuf;

/// Unified error type for process telemetry and control.
///
/// Read-only operations degrade on most of these; destructive operations fail
/// closed on all of them.
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    /// Target pid does not exist at read time.
    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    /// Pid outside the accepted range (must be positive).
    #[error("invalid pid {pid}: must be a positive integer")]
    InvalidPid { pid: i64 },

    /// OS-reported process graph contains a cycle. Recovered internally by
    /// truncating the walk; never surfaced to the user.
    #[error("ancestry cycle detected at pid {pid}")]
    AncestryCycleDetected { pid: u32 },

    /// The terminator refused to act.
    #[error("refusing to terminate pid {pid}: {reason}")]
    UnsafeTerminationBlocked { pid: u32, reason: String },

    /// No confirmation arrived in time.
    #[error("termination of pid {pid} aborted: no confirmation within {timeout_secs}s")]
    ConfirmationTimeout { pid: u32, timeout_secs: u64 },

    /// Appending to the History Log failed.
    #[error("history log write failed for action '{action}' at {}: {source}", path.display())]
    LogWriteFailure {
        action: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot file could not be opened or holds a malformed line.
    #[error("snapshot read failed at {}: {source}", path.display())]
    SnapshotRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Threshold input is malformed or non-finite.
    #[error("invalid threshold configuration: {0}")]
    InvalidThresholdConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SentinelError>;

/// Validate a caller-supplied pid. Zero and negative values are rejected.
pub fn validate_pid(pid: i64) -> Result<u32> {
    if pid <= 0 || pid > i64::from(u32::MAX) {
        return Err(SentinelError::InvalidPid { pid });
    }
    Ok(pid as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_pid_rejects_non_positive() {
        assert!(matches!(validate_pid(0), Err(SentinelError::InvalidPid { pid: 0 })));
        assert!(matches!(validate_pid(-4), Err(SentinelError::InvalidPid { pid: -4 })));
        assert_eq!(validate_pid(42).unwrap(), 42);
    }

    #[test]
    fn messages_name_the_pid() {
        let e = SentinelError::UnsafeTerminationBlocked {
            pid: 7,
            reason: "ancestor of caller".into(),
        };
        assert_eq!(e.to_string(), "refusing to terminate pid 7: ancestor of caller");
    }
}
