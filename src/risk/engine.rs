//! Compares process records against configurable CPU/memory/runtime thresholds
//! and ranks the offenders.
//!
//! A record is a hit when it exceeds *any* enabled threshold. Hits are ordered
//! by the number of violated dimensions, then by overshoot (`value / limit - 1`)
//! according to the configured [`SeverityRule`].

use crate::collectors::ProcessRecord;
use crate::error::{Result, SentinelError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Cpu,
    Memory,
    Runtime,
}

/// How overshoots on different dimensions combine into one rank key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityRule {
    /// Worst single relative overshoot
    #[default]
    LargestOvershoot,
    /// Sum of relative overshoots over violated dimensions
    TotalOvershoot,
}

/// Zero or negative values disable a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu_percent: f64,
    pub memory_bytes: i64,
    pub min_runtime_seconds: i64,
    pub severity_rule: SeverityRule,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_bytes: 1 << 30,
            min_runtime_seconds: 0,
            severity_rule: SeverityRule::LargestOvershoot,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        if !self.cpu_percent.is_finite() {
            return Err(SentinelError::InvalidThresholdConfiguration(format!(
                "cpu_percent must be a finite number, got {}",
                self.cpu_percent
            )));
        }
        Ok(())
    }

    /// Active limit for a dimension, `None` when disabled.
    pub fn limit(&self, dim: Dimension) -> Option<f64> {
        let v = match dim {
            Dimension::Cpu => self.cpu_percent,
            Dimension::Memory => self.memory_bytes as f64,
            Dimension::Runtime => self.min_runtime_seconds as f64,
        };
        (v > 0.0).then_some(v)
    }

    pub fn any_enabled(&self) -> bool {
        [Dimension::Cpu, Dimension::Memory, Dimension::Runtime]
            .iter()
            .any(|d| self.limit(*d).is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Severity {
    pub violations: usize,
    pub overshoot: f64,
}

impl Severity {
    /// Descending rank order: more violations first, then larger overshoot.
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .violations
            .cmp(&self.violations)
            .then_with(|| other.overshoot.total_cmp(&self.overshoot))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyHit {
    pub record: ProcessRecord,
    pub violated_thresholds: BTreeSet<Dimension>,
    pub severity: Severity,
}

pub struct AnomalyDetector {
    thresholds: Thresholds,
}

impl AnomalyDetector {
    /// Fails fast on malformed thresholds, before any scan.
    pub fn new(thresholds: Thresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn scan(&self, records: impl IntoIterator<Item = ProcessRecord>) -> Vec<AnomalyHit> {
        self.scan_at(records, Utc::now())
    }

    /// Scan with runtime measured against `now`.
    pub fn scan_at(
        &self,
        records: impl IntoIterator<Item = ProcessRecord>,
        now: DateTime<Utc>,
    ) -> Vec<AnomalyHit> {
        let mut hits: Vec<AnomalyHit> = records
            .into_iter()
            .filter_map(|r| self.evaluate(r, now))
            .collect();
        // Stable; equal severities keep pid order for repeatable output.
        hits.sort_by(|a, b| {
            a.severity
                .rank_cmp(&b.severity)
                .then_with(|| a.record.pid.cmp(&b.record.pid))
        });
        hits
    }

    fn evaluate(&self, record: ProcessRecord, now: DateTime<Utc>) -> Option<AnomalyHit> {
        let observed = [
            (Dimension::Cpu, record.cpu_percent),
            (Dimension::Memory, record.memory_bytes as f64),
            (Dimension::Runtime, record.runtime_seconds(now) as f64),
        ];
        let mut violated = BTreeSet::new();
        let mut overshoots = Vec::new();
        for (dim, value) in observed {
            let Some(limit) = self.thresholds.limit(dim) else {
                continue;
            };
            if value > limit {
                violated.insert(dim);
                overshoots.push(value / limit - 1.0);
            }
        }
        if violated.is_empty() {
            return None;
        }
        let overshoot = match self.thresholds.severity_rule {
            SeverityRule::LargestOvershoot => overshoots.iter().copied().fold(0.0, f64::max),
            SeverityRule::TotalOvershoot => overshoots.iter().sum(),
        };
        Some(AnomalyHit {
            record,
            severity: Severity {
                violations: violated.len(),
                overshoot,
            },
            violated_thresholds: violated,
        })
    }
}

/// Parse a human size: `2048`, `500MB`, `1.5GiB`, `64k`. Decimal suffixes
/// (`KB`, `MB`, `GB`, `TB`) are powers of 1000; binary suffixes (`KiB`..., or a
/// bare `K`/`M`/`G`/`T`) are powers of 1024.
pub fn parse_size(input: &str) -> Result<i64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let malformed = || SentinelError::InvalidThresholdConfiguration(format!("malformed size '{input}'"));
    let value: f64 = num.parse().map_err(|_| malformed())?;
    if !value.is_finite() {
        return Err(malformed());
    }
    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" => 1e3,
        "mb" => 1e6,
        "gb" => 1e9,
        "tb" => 1e12,
        "k" | "kib" => 1024.0,
        "m" | "mib" => 1024.0 * 1024.0,
        "g" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "t" | "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return Err(malformed()),
    };
    Ok((value * multiplier).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::ProcessStatus;

    const MB: u64 = 1_000_000;

    fn rec(pid: u32, cpu: f64, mem: u64, age_secs: i64, now: DateTime<Utc>) -> ProcessRecord {
        ProcessRecord {
            pid,
            parent_pid: Some(1),
            name: format!("p{pid}"),
            owner: None,
            command_line: Vec::new(),
            cpu_percent: cpu,
            memory_bytes: mem,
            thread_count: Some(1),
            start_time: now - chrono::Duration::seconds(age_secs),
            status: ProcessStatus::Running,
        }
    }

    fn only(cpu: f64, mem: i64, runtime: i64) -> Thresholds {
        Thresholds {
            cpu_percent: cpu,
            memory_bytes: mem,
            min_runtime_seconds: runtime,
            severity_rule: SeverityRule::LargestOvershoot,
        }
    }

    #[test]
    fn memory_threshold_scenario() {
        let now = Utc::now();
        let records = vec![
            rec(1, 0.0, 100 * MB, 0, now),
            rec(2, 0.0, 600 * MB, 0, now),
            rec(3, 0.0, 1200 * MB, 0, now),
        ];
        let d = AnomalyDetector::new(only(0.0, 500 * MB as i64, 0)).unwrap();
        let hits = d.scan_at(records, now);
        let mems: Vec<u64> = hits.iter().map(|h| h.record.memory_bytes).collect();
        assert_eq!(mems, vec![1200 * MB, 600 * MB]);
        assert!(hits
            .iter()
            .all(|h| h.violated_thresholds == BTreeSet::from([Dimension::Memory])));
    }

    #[test]
    fn any_threshold_is_enough() {
        let now = Utc::now();
        let d = AnomalyDetector::new(only(50.0, 500 * MB as i64, 0)).unwrap();
        let hits = d.scan_at(vec![rec(1, 90.0, 10 * MB, 0, now)], now);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].violated_thresholds, BTreeSet::from([Dimension::Cpu]));
    }

    #[test]
    fn disabled_dimensions_never_flag() {
        let now = Utc::now();
        for disabled in [0.0, -5.0] {
            let d = AnomalyDetector::new(only(disabled, disabled as i64, disabled as i64)).unwrap();
            let hits = d.scan_at(vec![rec(1, 400.0, u64::MAX / 2, 86_400, now)], now);
            assert!(hits.is_empty());
        }
    }

    #[test]
    fn more_violations_outrank_bigger_overshoot() {
        let now = Utc::now();
        let d = AnomalyDetector::new(only(50.0, 100 * MB as i64, 0)).unwrap();
        let hits = d.scan_at(
            vec![
                rec(1, 500.0, 0, 0, now),      // one dimension, 9x over
                rec(2, 60.0, 110 * MB, 0, now), // two dimensions, slightly over
            ],
            now,
        );
        assert_eq!(hits[0].record.pid, 2);
        assert_eq!(hits[0].severity.violations, 2);
        assert_eq!(hits[1].record.pid, 1);
    }

    #[test]
    fn runtime_threshold_uses_age() {
        let now = Utc::now();
        let d = AnomalyDetector::new(only(0.0, 0, 3600)).unwrap();
        let hits = d.scan_at(vec![rec(1, 0.0, 0, 60, now), rec(2, 0.0, 0, 7200, now)], now);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.pid, 2);
        assert!((hits[0].severity.overshoot - 1.0).abs() < 1e-9);
    }

    #[test]
    fn total_overshoot_rule_sums_dimensions() {
        let now = Utc::now();
        let mut t = only(50.0, 100 * MB as i64, 0);
        t.severity_rule = SeverityRule::TotalOvershoot;
        let d = AnomalyDetector::new(t).unwrap();
        let hits = d.scan_at(vec![rec(1, 100.0, 200 * MB, 0, now)], now);
        assert!((hits[0].severity.overshoot - 2.0).abs() < 1e-9);
    }

    #[test]
    fn non_finite_cpu_threshold_is_rejected() {
        let t = only(f64::NAN, 0, 0);
        assert!(matches!(
            AnomalyDetector::new(t),
            Err(SentinelError::InvalidThresholdConfiguration(_))
        ));
    }

    #[test]
    fn sizes_parse_with_units() {
        assert_eq!(parse_size("2048").unwrap(), 2048);
        assert_eq!(parse_size("500MB").unwrap(), 500_000_000);
        assert_eq!(parse_size("1.5GiB").unwrap(), 1_610_612_736);
        assert_eq!(parse_size("64k").unwrap(), 65_536);
        assert_eq!(parse_size(" 0 ").unwrap(), 0);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("12 parsecs").is_err());
        assert!(parse_size("").is_err());
    }
}
