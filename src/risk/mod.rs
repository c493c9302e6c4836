//! Threshold-based anomaly detection over process snapshots.

mod engine;

pub use engine::{parse_size, AnomalyDetector, AnomalyHit, Dimension, Severity, SeverityRule, Thresholds};
