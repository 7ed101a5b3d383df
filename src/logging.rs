//! # Structured Logging
//!
//! Console logging through `tracing-subscriber`, initialised once per process.
//!
//! - `RUST_LOG` or `LOG_LEVEL` pick the filter; otherwise `APP_ENV=production`
//!   logs at `info` and every other environment at `debug`
//! - `LOG_FORMAT=json` switches to one JSON object per line
//! - ANSI colours only when stdout is a terminal

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output encoding of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initialise the global subscriber; later calls are no-ops
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let explicit_level = std::env::var("RUST_LOG")
            .or_else(|_| std::env::var("LOG_LEVEL"))
            .ok();
        let log_level = resolve_log_level(&environment, explicit_level.as_deref());
        let format = LogFormat::parse(std::env::var("LOG_FORMAT").ok().as_deref());

        // Determine if we're in a TTY for ANSI color support
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer = match format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed(),
        };

        let subscriber = tracing_subscriber::registry().with(console_layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                format = ?format,
                ansi_colors = use_ansi,
                "Logging initialized"
            );
        }
    });
}

fn get_environment() -> String {
    std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string())
}

fn resolve_log_level(environment: &str, explicit: Option<&str>) -> String {
    if let Some(level) = explicit.filter(|l| !l.trim().is_empty()) {
        return level.to_lowercase();
    }

    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(resolve_log_level("production", None), "info");
        assert_eq!(resolve_log_level("development", None), "debug");
        assert_eq!(resolve_log_level("test", None), "debug");
        assert_eq!(resolve_log_level("production", Some("WARN")), "warn");
        assert_eq!(resolve_log_level("production", Some(" ")), "info");
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("text")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
