//! Dependency-edge detection for the service-topology collaborator.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Serialize;

use crate::flow::FlowId;

/// An edge from the observed host to a remote destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OutboundLink {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

impl From<&FlowId> for OutboundLink {
    fn from(flow: &FlowId) -> Self {
        Self {
            src_ip: flow.src_ip,
            dst_ip: flow.dst_ip,
            dst_port: flow.dst_port,
        }
    }
}

/// Ranges that never count as remote: loopback, RFC 1918, link-local and ULA.
pub fn default_private_ranges() -> Vec<IpNetwork> {
    [
        "127.0.0.0/8",
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "169.254.0.0/16",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
}

#[derive(Debug, Clone)]
pub struct OutboundLinkDetector {
    remote_only_ports: HashSet<u16>,
    own_addresses: HashSet<IpAddr>,
    private_ranges: Vec<IpNetwork>,
}

impl OutboundLinkDetector {
    pub fn new(
        remote_only_ports: impl IntoIterator<Item = u16>,
        own_addresses: impl IntoIterator<Item = IpAddr>,
        private_ranges: Vec<IpNetwork>,
    ) -> Self {
        Self {
            remote_only_ports: remote_only_ports.into_iter().collect(),
            own_addresses: own_addresses.into_iter().collect(),
            private_ranges,
        }
    }

    pub fn should_report(&self, dst_ip: IpAddr, dst_port: u16) -> bool {
        self.remote_only_ports.contains(&dst_port)
            && !self.own_addresses.contains(&dst_ip)
            && !self.is_private(dst_ip)
    }

    /// Evaluates a new flow, yielding the link to emit when it qualifies.
    pub fn detect(&self, flow: &FlowId) -> Option<OutboundLink> {
        self.should_report(flow.dst_ip, flow.dst_port)
            .then(|| OutboundLink::from(flow))
    }

    fn is_private(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        self.private_ranges.iter().any(|range| range.contains(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn reports_only_remote_destinations() {
        let detector = OutboundLinkDetector::new(
            [443],
            [ip("10.0.0.5")],
            vec!["192.168.0.0/16".parse().unwrap()],
        );
        assert!(detector.should_report(ip("10.0.0.9"), 443));
        assert!(!detector.should_report(ip("10.0.0.5"), 443));
        assert!(!detector.should_report(ip("192.168.1.4"), 443));
        assert!(!detector.should_report(ip("10.0.0.9"), 80));
    }

    #[test]
    fn default_ranges_cover_common_private_space() {
        let detector = OutboundLinkDetector::new([443], [], default_private_ranges());
        assert!(!detector.should_report(ip("10.0.0.9"), 443));
        assert!(!detector.should_report(ip("172.20.1.1"), 443));
        assert!(!detector.should_report(ip("fd12::1"), 443));
        assert!(!detector.should_report(ip("::ffff:192.168.1.1"), 443));
        assert!(detector.should_report(ip("93.184.216.34"), 443));
    }

    #[test]
    fn detect_carries_flow_endpoints() {
        let detector = OutboundLinkDetector::new([443], [], Vec::new());
        let flow = FlowId::new(
            "10.0.0.5:41000".parse().unwrap(),
            "1.1.1.1:443".parse().unwrap(),
        );
        assert_eq!(
            detector.detect(&flow),
            Some(OutboundLink {
                src_ip: ip("10.0.0.5"),
                dst_ip: ip("1.1.1.1"),
                dst_port: 443,
            })
        );
        assert!(detector.detect(&flow.reverse()).is_none());
    }
}
