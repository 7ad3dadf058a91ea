//! Structured logging with tracing and OpenTelemetry attributes.
//!
//! Engine events (stream lifecycle, parse failures, dropped deliveries,
//! incomplete exchanges) go through [`EventLogger::log_event`] so they share
//! one span name and can be filtered as a group.

use opentelemetry::KeyValue;
use tracing::info_span;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// Unknown names fall back to `Pretty`.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` wins over `default_level`.
    pub fn init(
        default_level: &str,
        format: LogFormat,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        let builder = fmt().with_env_filter(filter).with_thread_names(true);
        match format {
            LogFormat::Pretty => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        }
    }

    pub fn log_event(event_type: &str, metadata: Vec<KeyValue>) {
        let span = info_span!(
            "capture_event",
            event_type = event_type,
            otel.kind = "INTERNAL"
        );

        span.in_scope(|| {
            tracing::info!(metadata = %render(&metadata), "Capture event");
        });
    }
}

fn render(metadata: &[KeyValue]) -> String {
    metadata
        .iter()
        .map(|kv| format!("{}={}", kv.key, kv.value))
        .collect::<Vec<_>>()
        .join(" ")
}
