//! Parsing and entry post-processing.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tapwire_core::{BodyMasker, StaticResolver};
use validator::Validate;

use crate::{validation, ConfigError};

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct EngineConfig {
    /// When off, every flow is tracked for lifecycle and links only.
    #[serde(default = "default_true")]
    pub parse_http: bool,

    /// Largest message a reader accumulates before giving up on its direction.
    #[validate(range(min = 4096))]
    #[serde(
        default = "default_max_message_bytes",
        deserialize_with = "crate::capture::deserialize_size"
    )]
    pub max_message_bytes: usize,

    /// Regexes redacted from `text/plain` bodies.
    #[validate(custom(function = validation::validate_patterns))]
    #[serde(default)]
    pub mask_patterns: Vec<String>,

    /// Trace-level hex dumps of every delivered segment.
    #[serde(default)]
    pub hexdump: bool,

    /// Static address labels attached to entries.
    #[serde(default)]
    pub names: HashMap<IpAddr, String>,
}

fn default_true() -> bool {
    true
}

fn default_max_message_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parse_http: true,
            max_message_bytes: default_max_message_bytes(),
            mask_patterns: Vec::new(),
            hexdump: false,
            names: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn masker(&self) -> Result<BodyMasker, ConfigError> {
        Ok(BodyMasker::from_patterns(&self.mask_patterns)?)
    }

    pub fn resolver(&self) -> StaticResolver {
        StaticResolver::new(self.names.clone())
    }
}
