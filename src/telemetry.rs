//! Logging bootstrap.
//!
//! - Text or JSON output, RFC3339 UTC timestamps.
//! - `EnvFilter` from an explicit directive string, else `RUST_LOG`, else `info`.
//! - `log` records are forwarded into `tracing`.

use std::env;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::Telemetry;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// e.g. "info,launchpad_orchestrator=debug"; `None` reads `RUST_LOG`.
    pub env_filter: Option<String>,
    pub json: bool,
    /// Print target, file and line.
    pub with_targets_and_lines: bool,
    pub with_threads: bool,
    /// Text format only.
    pub ansi: bool,
}

/// Returned by [`init`]; keep it alive for the life of the process.
#[derive(Debug)]
pub struct LoggingGuard {
    _private: (),
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            json: true,
            with_targets_and_lines: true,
            with_threads: false,
            ansi: false,
        }
    }
}

impl From<&Telemetry> for LoggingConfig {
    fn from(t: &Telemetry) -> Self {
        Self {
            env_filter: Some(t.log_filter.clone()).filter(|s| !s.trim().is_empty()),
            json: t.json,
            ansi: !t.json,
            ..Self::default()
        }
    }
}

fn build_filter(directive: Option<&str>) -> EnvFilter {
    match directive {
        Some(s) => EnvFilter::try_new(s).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Install the global subscriber. Call once at process start.
pub fn init(cfg: LoggingConfig) -> anyhow::Result<LoggingGuard> {
    // Already set when another subscriber bridged `log` first.
    let _ = tracing_log::LogTracer::init();

    let filter = build_filter(cfg.env_filter.as_deref());

    let base = fmt::layer()
        .with_target(cfg.with_targets_and_lines)
        .with_file(cfg.with_targets_and_lines)
        .with_line_number(cfg.with_targets_and_lines)
        .with_thread_ids(cfg.with_threads)
        .with_thread_names(cfg.with_threads)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let fmt_layer = if cfg.json {
        base.json()
            .with_ansi(false)
            .with_current_span(true)
            .with_span_list(true)
            .flatten_event(true)
            .boxed()
    } else {
        base.with_ansi(cfg.ansi).boxed()
    };

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber already installed: {e}"))?;

    Ok(LoggingGuard { _private: () })
}

/// `LOG_JSON`, `LOG_ANSI`, `LOG_THREADS` (each `true|false`) plus `RUST_LOG`.
pub fn init_from_env() -> anyhow::Result<LoggingGuard> {
    let flag = |name: &str, default: bool| env::var(name).map(|v| v == "true").unwrap_or(default);

    init(LoggingConfig {
        env_filter: None,
        json: flag("LOG_JSON", true),
        with_targets_and_lines: true,
        with_threads: flag("LOG_THREADS", false),
        ansi: flag("LOG_ANSI", false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_config_from_telemetry_section() {
        let t = Telemetry { log_filter: "  ".into(), json: false };
        let cfg = LoggingConfig::from(&t);
        assert!(cfg.env_filter.is_none());
        assert!(cfg.ansi);
    }

    #[test]
    fn init_text_then_refuse_second_install() {
        init(LoggingConfig {
            env_filter: Some("debug".into()),
            json: false,
            with_targets_and_lines: true,
            with_threads: true,
            ansi: false,
        })
        .expect("first init");
        tracing::info!(target: "launchpad::test", "hello from test");
        assert!(init(LoggingConfig::default()).is_err());
    }
}
