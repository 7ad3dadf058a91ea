//! Packet source configuration.

use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::validation;

/// Live capture parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CaptureConfig {
    /// Network interface for live capture.
    #[validate(custom(function = validation::validate_interface))]
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Run in promiscuous mode?
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// Bytes captured per packet.
    #[validate(range(min = 128, max = 262144))]
    #[serde(default = "default_snaplen", deserialize_with = "deserialize_size")]
    pub snaplen: usize,

    /// Poll interval of the capture handle (milliseconds).
    #[validate(range(min = 1, max = 5000))]
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u32,

    /// Kernel-side BPF expression.
    #[serde(default = "default_bpf_filter")]
    pub bpf_filter: Option<String>,
}

fn default_interface() -> String {
    "any".into()
}

fn default_promiscuous() -> bool {
    true
}

fn default_snaplen() -> usize {
    65536
}

fn default_read_timeout() -> u32 {
    100
}

fn default_bpf_filter() -> Option<String> {
    Some("tcp".into())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Num(usize),
    Str(String),
}

/// Accepts human-friendly sizes (e.g. "64KiB") or plain numbers.
pub(crate) fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match SizeValue::deserialize(deserializer)? {
        SizeValue::Num(n) => Ok(n),
        SizeValue::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(split);
    let number: f64 = num_part
        .parse()
        .map_err(|_| format!("invalid size {s:?}"))?;
    let multiplier = match unit_part.trim().to_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" | "kib" => 1024.0,
        "mb" | "mib" => 1024.0 * 1024.0,
        "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
        unit => return Err(format!("unknown size unit {unit:?}")),
    };
    Ok((number * multiplier) as usize)
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            promiscuous: default_promiscuous(),
            snaplen: default_snaplen(),
            read_timeout_ms: default_read_timeout(),
            bpf_filter: default_bpf_filter(),
        }
    }
}
