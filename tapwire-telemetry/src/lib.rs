//! # Tapwire Telemetry
//!
//! Subscriber setup, structured engine events and Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use logging::{EventLogger, LogFormat};
pub use metrics::MetricsRecorder;
