//! Capture-target selection.
//!
//! The filter is built once from configuration and is immutable afterwards.
//! It is consulted exactly once per new flow.

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::FilterError;

/// Port that is always tapped in single-host mode.
pub const HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Whole-subnet capture: targets are selected by authority allow-list.
    Host,
    /// Single-host capture: targets are selected by destination port.
    #[default]
    Single,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureDirection {
    /// Inbound traffic only.
    #[default]
    In,
    /// Inbound and outbound traffic.
    Any,
}

/// An `ip` or `ip:port` allow-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Authority {
    pub ip: IpAddr,
    pub port: Option<u16>,
}

impl Authority {
    /// Destination match: the address must agree, and the port too when the
    /// entry names one.
    pub fn matches(&self, ip: IpAddr, port: u16) -> bool {
        self.ip == ip && self.port.map_or(true, |p| p == port)
    }
}

impl FromStr for Authority {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self {
                ip: addr.ip(),
                port: Some(addr.port()),
            });
        }
        s.parse::<IpAddr>()
            .map(|ip| Self { ip, port: None })
            .map_err(|_| FilterError::InvalidAuthority(s.to_string()))
    }
}

impl TryFrom<String> for Authority {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Authority> for String {
    fn from(value: Authority) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}", SocketAddr::new(self.ip, port)),
            None => write!(f, "{}", self.ip),
        }
    }
}

/// Immutable inputs of the [`FlowFilter`].
#[derive(Debug, Clone, Default)]
pub struct FilterSettings {
    pub mode: CaptureMode,
    pub direction: CaptureDirection,
    /// Allow-listed authorities (host mode).
    pub authorities: Vec<Authority>,
    /// Allow-listed destination ports (single-host mode), in addition to 80.
    pub ports: Vec<u16>,
    /// Addresses owned by the observed host.
    pub own_addresses: HashSet<IpAddr>,
}

/// Verdict for one flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamProps {
    pub is_target: bool,
    pub is_outgoing: bool,
}

impl StreamProps {
    const IGNORED: Self = Self {
        is_target: false,
        is_outgoing: false,
    };
}

#[derive(Debug, Clone)]
pub struct FlowFilter {
    settings: FilterSettings,
}

impl FlowFilter {
    pub fn new(settings: FilterSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub fn is_own_address(&self, ip: IpAddr) -> bool {
        self.settings.own_addresses.contains(&ip)
    }

    /// Decides whether a new flow is a capture target and whether it is
    /// outgoing relative to the observed host set.
    pub fn decide(&self, src_ip: IpAddr, dst_ip: IpAddr, dst_port: u16) -> StreamProps {
        let props = match self.settings.mode {
            CaptureMode::Host => self.decide_host(src_ip, dst_ip, dst_port),
            CaptureMode::Single => self.decide_single(dst_ip, dst_port),
        };
        trace!(
            %src_ip, %dst_ip, dst_port,
            is_target = props.is_target,
            is_outgoing = props.is_outgoing,
            "flow filter verdict"
        );
        props
    }

    fn decide_host(&self, src_ip: IpAddr, dst_ip: IpAddr, dst_port: u16) -> StreamProps {
        let authorities = &self.settings.authorities;
        if authorities.iter().any(|a| a.matches(dst_ip, dst_port)) {
            return StreamProps {
                is_target: true,
                is_outgoing: false,
            };
        }
        // The source port of an originating flow is ephemeral, so only the
        // address part of an entry is compared.
        if self.settings.direction == CaptureDirection::Any
            && authorities.iter().any(|a| a.ip == src_ip)
        {
            return StreamProps {
                is_target: true,
                is_outgoing: true,
            };
        }
        StreamProps::IGNORED
    }

    fn decide_single(&self, dst_ip: IpAddr, dst_port: u16) -> StreamProps {
        let tapped = dst_port == HTTP_PORT || self.settings.ports.contains(&dst_port);
        if !tapped {
            return StreamProps::IGNORED;
        }

        let is_outgoing = !self.is_own_address(dst_ip);
        if is_outgoing && self.settings.direction == CaptureDirection::In {
            return StreamProps {
                is_target: false,
                is_outgoing,
            };
        }
        StreamProps {
            is_target: true,
            is_outgoing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn single(ports: Vec<u16>, own: &[&str], direction: CaptureDirection) -> FlowFilter {
        FlowFilter::new(FilterSettings {
            mode: CaptureMode::Single,
            direction,
            authorities: Vec::new(),
            ports,
            own_addresses: own.iter().map(|s| ip(s)).collect(),
        })
    }

    fn host(authorities: &[&str], direction: CaptureDirection) -> FlowFilter {
        FlowFilter::new(FilterSettings {
            mode: CaptureMode::Host,
            direction,
            authorities: authorities.iter().map(|a| a.parse().unwrap()).collect(),
            ports: Vec::new(),
            own_addresses: HashSet::new(),
        })
    }

    #[test]
    fn parses_authorities() {
        assert_eq!(
            "10.0.0.9:80".parse::<Authority>().unwrap(),
            Authority {
                ip: ip("10.0.0.9"),
                port: Some(80)
            }
        );
        assert_eq!("10.0.0.9".parse::<Authority>().unwrap().port, None);
        assert_eq!("[fd00::1]:8080".parse::<Authority>().unwrap().port, Some(8080));
        assert!(matches!(
            "pod-a:80".parse::<Authority>(),
            Err(FilterError::InvalidAuthority(_))
        ));
    }

    #[test]
    fn single_host_inbound_to_allow_listed_port() {
        let filter = single(vec![80], &["10.0.0.5"], CaptureDirection::In);
        assert_eq!(
            filter.decide(ip("10.0.0.9"), ip("10.0.0.5"), 80),
            StreamProps {
                is_target: true,
                is_outgoing: false
            }
        );
    }

    #[test]
    fn single_host_port_not_allow_listed() {
        let filter = single(vec![80], &["10.0.0.5"], CaptureDirection::In);
        assert!(!filter.decide(ip("10.0.0.5"), ip("10.0.0.9"), 9090).is_target);
        assert!(!filter.decide(ip("10.0.0.9"), ip("10.0.0.5"), 9090).is_target);
    }

    #[test]
    fn single_host_outgoing_is_demoted_when_inbound_only() {
        let inbound = single(vec![], &["10.0.0.5"], CaptureDirection::In);
        assert_eq!(
            inbound.decide(ip("10.0.0.5"), ip("10.0.0.9"), 80),
            StreamProps {
                is_target: false,
                is_outgoing: true
            }
        );

        let any = single(vec![], &["10.0.0.5"], CaptureDirection::Any);
        assert_eq!(
            any.decide(ip("10.0.0.5"), ip("10.0.0.9"), 80),
            StreamProps {
                is_target: true,
                is_outgoing: true
            }
        );
    }

    #[test]
    fn single_host_own_client_to_remote_port_80_is_outgoing() {
        // The destination is not an own address.
        let filter = single(vec![80], &["10.0.0.5"], CaptureDirection::In);
        assert_eq!(
            filter.decide(ip("10.0.0.5"), ip("10.0.0.9"), 80),
            StreamProps {
                is_target: false,
                is_outgoing: true
            }
        );
    }

    #[test]
    fn single_host_extra_ports_are_tapped() {
        let filter = single(vec![8080, 3000], &["10.0.0.5"], CaptureDirection::In);
        assert!(filter.decide(ip("10.0.0.7"), ip("10.0.0.5"), 3000).is_target);
    }

    #[test]
    fn host_mode_destination_and_source_matches() {
        let filter = host(&["10.0.0.9:80"], CaptureDirection::Any);
        assert_eq!(
            filter.decide(ip("10.0.0.2"), ip("10.0.0.9"), 80),
            StreamProps {
                is_target: true,
                is_outgoing: false
            }
        );
        assert_eq!(
            filter.decide(ip("10.0.0.9"), ip("10.0.0.2"), 55000),
            StreamProps {
                is_target: true,
                is_outgoing: true
            }
        );
        assert!(!filter.decide(ip("10.0.0.2"), ip("10.0.0.9"), 443).is_target);
    }

    #[test]
    fn host_mode_bare_ip_matches_any_port() {
        let filter = host(&["10.0.0.9"], CaptureDirection::In);
        assert!(filter.decide(ip("10.0.0.2"), ip("10.0.0.9"), 8443).is_target);
        // Source matches need any-direction capture.
        assert!(!filter.decide(ip("10.0.0.9"), ip("10.0.0.2"), 55000).is_target);
    }

    fn arb_ip() -> impl Strategy<Value = IpAddr> {
        prop_oneof![
            (0u8..4).prop_map(|last| IpAddr::from([10, 0, 0, last])),
            any::<[u8; 4]>().prop_map(IpAddr::from),
        ]
    }

    proptest! {
        #[test]
        fn decide_is_deterministic(
            src in arb_ip(),
            dst in arb_ip(),
            port in prop_oneof![Just(80u16), Just(8080u16), any::<u16>()],
            host_mode in any::<bool>(),
            any_direction in any::<bool>(),
        ) {
            let settings = FilterSettings {
                mode: if host_mode { CaptureMode::Host } else { CaptureMode::Single },
                direction: if any_direction { CaptureDirection::Any } else { CaptureDirection::In },
                authorities: vec!["10.0.0.1:80".parse().unwrap(), "10.0.0.2".parse().unwrap()],
                ports: vec![8080],
                own_addresses: [IpAddr::from([10, 0, 0, 3])].into_iter().collect(),
            };
            let first = FlowFilter::new(settings.clone()).decide(src, dst, port);
            let filter = FlowFilter::new(settings);
            prop_assert_eq!(filter.decide(src, dst, port), first);
            prop_assert_eq!(filter.decide(src, dst, port), first);
        }
    }
}
