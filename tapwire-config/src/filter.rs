//! Capture-target selection and outbound-link reporting.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tapwire_core::outbound::default_private_ranges;
use tapwire_core::{
    Authority, CaptureDirection, CaptureMode, FilterSettings, OutboundLinkDetector,
};
use validator::Validate;

use crate::{validation, ConfigError};

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct FilterConfig {
    /// `host` captures a whole subnet by authority, `single` one host by port.
    #[serde(default)]
    pub mode: CaptureMode,

    /// `in` captures inbound flows only, `any` adds outgoing ones.
    #[serde(default)]
    pub direction: CaptureDirection,

    /// Allow-listed `ip` / `ip:port` entries for host mode.
    #[validate(custom(function = validation::validate_authorities))]
    #[serde(default)]
    pub authorities: Vec<String>,

    /// Extra tapped ports for single-host mode; 80 is always tapped.
    #[validate(custom(function = validation::validate_ports))]
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Addresses of the observed host.
    #[serde(default)]
    pub own_addresses: Vec<IpAddr>,

    /// Destination ports whose flows are reported as outbound links.
    #[validate(custom(function = validation::validate_ports))]
    #[serde(default = "default_remote_only_ports")]
    pub remote_only_ports: Vec<u16>,

    /// Destinations never reported as outbound links.
    #[validate(custom(function = validation::validate_cidr_list))]
    #[serde(default = "default_private_ranges")]
    pub private_ranges: Vec<IpNetwork>,
}

fn default_remote_only_ports() -> Vec<u16> {
    vec![443]
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::default(),
            direction: CaptureDirection::default(),
            authorities: Vec::new(),
            ports: Vec::new(),
            own_addresses: Vec::new(),
            remote_only_ports: default_remote_only_ports(),
            private_ranges: default_private_ranges(),
        }
    }
}

impl FilterConfig {
    pub fn to_settings(&self) -> Result<FilterSettings, ConfigError> {
        let authorities = self
            .authorities
            .iter()
            .map(|a| a.parse::<Authority>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FilterSettings {
            mode: self.mode,
            direction: self.direction,
            authorities,
            ports: self.ports.clone(),
            own_addresses: self.own_addresses.iter().copied().collect(),
        })
    }

    pub fn outbound_detector(&self) -> OutboundLinkDetector {
        OutboundLinkDetector::new(
            self.remote_only_ports.iter().copied(),
            self.own_addresses.iter().copied(),
            self.private_ranges.clone(),
        )
    }
}
