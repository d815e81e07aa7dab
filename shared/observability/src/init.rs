//! Tracing bootstrap.
//!
//! One subscriber for the whole process: JSON lines in production, pretty
//! output in development, filtered through `RUST_LOG`. The service never
//! varies these per call site, so the knobs resolve from the environment
//! once at startup.

use std::env;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for development
    Pretty,
    /// One JSON object per line, for production log pipelines
    Json,
}

impl LogFormat {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("json") => Self::Json,
            _ => Self::Pretty,
        }
    }

    fn from_env() -> Self {
        Self::parse(env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Resolved tracing options for one service process.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name for log attribution
    pub service_name: String,
    pub format: LogFormat,
    /// Level filter, `RUST_LOG` syntax (e.g. "info", "answer_engine=debug,info")
    pub filter: String,
    /// Whether to emit span enter/close events (`LOG_SPANS=true`)
    pub log_spans: bool,
}

impl TracingConfig {
    /// Resolve configuration for a service from the environment.
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            format: LogFormat::from_env(),
            filter: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_spans: env::var("LOG_SPANS").map(|v| v == "true").unwrap_or(false),
        }
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(config: TracingConfig) {
    let filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let span_events = if config.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_events(span_events);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer().pretty().with_span_events(span_events);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }

    tracing::info!(
        service = %config.service_name,
        format = ?config.format,
        "tracing initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_resolves_service_name_and_defaults() {
        let config = TracingConfig::for_service("test-service");
        assert_eq!(config.service_name, "test-service");
        assert!(!config.filter.is_empty());
    }

    #[test]
    fn only_the_json_literal_selects_json() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("logfmt")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
    }
}
