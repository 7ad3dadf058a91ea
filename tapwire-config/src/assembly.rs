//! TCP reassembly policy.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// How strictly TCP options and windows are checked before a segment is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionCheck {
    /// Reject segments with inconsistent window scaling or out-of-window sequence numbers.
    Strict,
    #[default]
    Lenient,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct AssemblyConfig {
    /// Accept connections whose handshake was never observed.
    #[serde(default = "default_true")]
    pub allow_missing_init: bool,

    #[serde(default)]
    pub option_check: OptionCheck,

    /// Connections idle this long are closed.
    #[validate(range(min = 1, max = 86400))]
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often idle connections are looked for.
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Out-of-order bytes buffered per direction before the gap is skipped.
    #[validate(range(min = 1024))]
    #[serde(
        default = "default_max_buffered",
        deserialize_with = "crate::capture::deserialize_size"
    )]
    pub max_buffered_bytes: usize,
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout() -> u64 {
    120
}

fn default_flush_interval() -> u64 {
    10
}

fn default_max_buffered() -> usize {
    4 * 1024 * 1024
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            allow_missing_init: default_true(),
            option_check: OptionCheck::default(),
            idle_timeout_secs: default_idle_timeout(),
            flush_interval_secs: default_flush_interval(),
            max_buffered_bytes: default_max_buffered(),
        }
    }
}
