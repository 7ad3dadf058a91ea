//! Connection identity.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

/// The 4-tuple of one TCP connection, oriented as first observed.
///
/// Derived once per connection and never mutated; it keys the dispatcher's
/// stream registry and ties both directional readers to one correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowId {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowId {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            src_ip: src.ip(),
            dst_ip: dst.ip(),
            src_port: src.port(),
            dst_port: dst.port(),
        }
    }

    /// The same connection seen from the other end.
    #[inline]
    pub fn reverse(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    pub fn src(&self) -> SocketAddr {
        SocketAddr::new(self.src_ip, self.src_port)
    }

    pub fn dst(&self) -> SocketAddr {
        SocketAddr::new(self.dst_ip, self.dst_port)
    }

    pub fn involves_port(&self, port: u16) -> bool {
        self.src_port == port || self.dst_port == port
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src(), self.dst())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_is_an_involution() {
        let flow = FlowId::new(
            "10.0.0.2:51000".parse().unwrap(),
            "10.0.0.9:80".parse().unwrap(),
        );
        let back = flow.reverse();
        assert_eq!(back.src_port, 80);
        assert_eq!(back.dst_ip, flow.src_ip);
        assert_eq!(back.reverse(), flow);
    }

    #[test]
    fn display_brackets_ipv6() {
        let flow = FlowId::new("[::1]:4000".parse().unwrap(), "[::1]:80".parse().unwrap());
        assert_eq!(flow.to_string(), "[::1]:4000 -> [::1]:80");
        assert!(flow.involves_port(80));
        assert!(!flow.involves_port(53));
    }
}
