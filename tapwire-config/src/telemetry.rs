use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

/// Logging and metrics configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TelemetryConfig {
    /// Fallback filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty` or `json`.
    #[validate(custom(function = validation::validate_log_format))]
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Dump Prometheus metrics on shutdown.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics: true,
        }
    }
}
