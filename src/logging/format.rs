//! Diagnostic logging via tracing, plus one-JSON-object-per-line result output.

use crate::config::LogConfig;
use serde::Serialize;
use std::io::{IsTerminal, Write};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub struct StructuredLogger;

impl StructuredLogger {
    /// Install the global subscriber. Diagnostics always go to stderr so that
    /// stdout carries only results. `RUST_LOG` overrides the configured level;
    /// a second call is a no-op.
    pub fn init(config: &LogConfig) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json {
            // Flat objects: event fields sit next to level/target, no span nesting.
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr);
            registry.with(fmt).try_init()
        } else {
            let fmt = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr);
            registry.with(fmt).try_init()
        };
        if result.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    }

    /// Emit a single value as one JSON line.
    pub fn emit_json(event: &impl Serialize, w: &mut impl Write) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        writeln!(w, "{}", line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        let config = LogConfig {
            level: "warn".into(),
            json: true,
        };
        StructuredLogger::init(&config);
        StructuredLogger::init(&LogConfig::default());
    }

    #[test]
    fn emit_json_writes_one_line() {
        let mut buf = Vec::new();
        StructuredLogger::emit_json(&serde_json::json!({"pid": 1, "ok": true}), &mut buf).unwrap();
        StructuredLogger::emit_json(&serde_json::json!({"pid": 2}), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "{\"pid\":1,\"ok\":true}\n{\"pid\":2}\n");
    }
}
