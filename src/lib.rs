//! CodeSentinel agent: process telemetry and safety-gated process control.
//!
//! Modular structure:
//! - [`collectors`]: Process table access, snapshot reads, ancestry walks
//! - [`risk`]: Threshold anomaly detection
//! - [`watch`]: Bounded, cancellable sampling of one process
//! - [`storage`]: Append-only history log and snapshot export
//! - [`control`]: Safety-gated termination
//! - [`ops`]: Command surface tying the above together
//! - [`logging`]: Structured diagnostic logging

pub mod config;
pub mod error;
pub mod collectors;
pub mod risk;
pub mod watch;
pub mod storage;
pub mod control;
pub mod ops;
pub mod logging;

pub use config::SentinelConfig;
pub use error::{Result, SentinelError};
pub use collectors::{MemoryTable, ProcessRecord, ProcessTable, SysinfoTable};
pub use risk::{AnomalyDetector, Thresholds};
pub use storage::{HistoryEntry, HistoryLog};
pub use control::{CallerContext, KillRequest, Terminator};
pub use ops::{Sentinel, StatusScope};
pub use logging::StructuredLogger;
