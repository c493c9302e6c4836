//! Bounded, cancellable sampling of a single process over time.

mod sampler;

pub use sampler::{CancelToken, WatchEnd, WatchOptions, WatchReport, WatchSample, WatchSession, WatchSummary, Watcher};
