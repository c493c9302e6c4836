//! Monitor configuration. Handed to each operation at call time; the policy
//! loader that produces the file is external.

use crate::error::{Result, SentinelError};
use crate::risk::Thresholds;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Root of the per-domain history logs (`<history_dir>/<domain>/history.jsonl`)
    pub history_dir: PathBuf,
    /// Anomaly thresholds and severity ordering
    pub thresholds: Thresholds,
    /// Terminator guards
    pub safety: SafetyConfig,
    /// CPU windowing and watch defaults
    pub sampling: SamplingConfig,
    /// Diagnostic logging
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Require an explicit confirmation before a non-forced kill
    pub confirmation_required: bool,
    pub confirmation_timeout_secs: u64,
    /// Bound on ancestry walks in either direction
    pub max_ancestry_depth: usize,
    /// Wait between SIGTERM and the forced follow-up (seconds)
    pub kill_grace_secs: u64,
    /// Pids that are never terminated (kernel/init equivalents)
    pub protected_pids: Vec<u32>,
    /// Process names that are never terminated
    pub protected_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// CPU% measurement window for one-shot reads (milliseconds)
    pub cpu_window_ms: u64,
    pub watch_interval_secs: u64,
    pub watch_duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            thresholds: Thresholds::default(),
            safety: SafetyConfig::default(),
            sampling: SamplingConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            confirmation_required: true,
            confirmation_timeout_secs: 30,
            max_ancestry_depth: 10,
            kill_grace_secs: 5,
            protected_pids: vec![0, 1],
            protected_names: ["init", "systemd", "launchd", "kernel_task"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            cpu_window_ms: 200,
            watch_interval_secs: 1,
            watch_duration_secs: 10,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

fn default_history_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".codesentinel"))
        .unwrap_or_else(|| PathBuf::from(".codesentinel"))
        .join("history")
}

impl SentinelConfig {
    /// Load from JSON file if present; otherwise return default. A file that
    /// exists but does not parse is an error rather than a silent fallback.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let mut value: serde_json::Value = serde_json::from_str(&data)?;
        // Thresholds are parsed on their own so a bad value is reported as such.
        let thresholds = match value.as_object_mut().and_then(|o| o.remove("thresholds")) {
            Some(raw) => serde_json::from_value::<Thresholds>(raw)
                .map_err(|e| SentinelError::InvalidThresholdConfiguration(e.to_string()))?,
            None => Thresholds::default(),
        };
        thresholds.validate()?;
        let mut config: SentinelConfig = serde_json::from_value(value)?;
        config.thresholds = thresholds;
        Ok(config)
    }

    /// Resolve the config path: explicit flag, then `CODESENTINEL_CONFIG`, then cwd.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        std::env::var("CODESENTINEL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("codesentinel.json"))
    }
}

impl SafetyConfig {
    pub fn is_protected(&self, pid: u32, name: &str) -> bool {
        self.protected_pids.contains(&pid)
            || self
                .protected_names
                .iter()
                .any(|n| n.eq_ignore_ascii_case(name))
    }
}

impl From<&SentinelConfig> for crate::watch::WatchOptions {
    fn from(c: &SentinelConfig) -> Self {
        Self {
            interval: std::time::Duration::from_secs(c.sampling.watch_interval_secs),
            duration: std::time::Duration::from_secs(c.sampling.watch_duration_secs),
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let c = SentinelConfig::load(Path::new("does-not-exist.json")).unwrap();
        assert!(c.safety.confirmation_required);
        assert_eq!(c.safety.max_ancestry_depth, 10);
        assert_eq!(c.thresholds.cpu_percent, 80.0);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, r#"{"safety":{"kill_grace_secs":1}}"#).unwrap();
        let c = SentinelConfig::load(&path).unwrap();
        assert_eq!(c.safety.kill_grace_secs, 1);
        assert_eq!(c.safety.confirmation_timeout_secs, 30);
        assert_eq!(c.sampling.watch_interval_secs, 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, r#"{"thresholds":{"cpu_percent":"lots"}}"#).unwrap();
        assert!(matches!(
            SentinelConfig::load(&path),
            Err(SentinelError::InvalidThresholdConfiguration(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SentinelConfig::load(&path),
            Err(SentinelError::Serialization(_))
        ));
    }

    #[test]
    fn protected_names_ignore_case() {
        let s = SafetyConfig::default();
        assert!(s.is_protected(1, "anything"));
        assert!(s.is_protected(4242, "SystemD"));
        assert!(!s.is_protected(4242, "cargo"));
    }
}
