//! Link, IP and TCP header decoding.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use etherparse::{NetSlice, SlicedPacket, TcpOptionElement, TransportSlice};

use crate::error::{CaptureError, DecodeError};

/// Framing of the captured frames, as reported by the capture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    /// Linux cooked capture, used by the `any` device.
    LinuxSll,
    /// Bare IPv4/IPv6 packets.
    Raw,
    /// BSD loopback: a 4-byte address-family header, then IP.
    Null,
}

impl LinkType {
    pub fn from_datalink(linktype: i32) -> Result<Self, CaptureError> {
        match linktype {
            1 => Ok(LinkType::Ethernet),
            113 => Ok(LinkType::LinuxSll),
            12 | 14 | 101 | 228 | 229 => Ok(LinkType::Raw),
            0 | 108 => Ok(LinkType::Null),
            other => Err(CaptureError::UnsupportedLinkType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// One decoded TCP segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpSegment {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
    /// Window-scale shift, present only on SYN segments that negotiate it.
    pub window_scale: Option<u8>,
    pub payload: Bytes,
    pub observed_at: DateTime<Utc>,
}

pub fn decode(
    link: LinkType,
    data: &[u8],
    observed_at: DateTime<Utc>,
) -> Result<TcpSegment, DecodeError> {
    let sliced = match link {
        LinkType::Ethernet => SlicedPacket::from_ethernet(data),
        LinkType::LinuxSll => SlicedPacket::from_linux_sll(data),
        LinkType::Raw => SlicedPacket::from_ip(data),
        LinkType::Null => {
            let ip = data.get(4..).ok_or(DecodeError::NotIp)?;
            SlicedPacket::from_ip(ip)
        }
    }
    .map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let (src_ip, dst_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        _ => return Err(DecodeError::NotIp),
    };

    let Some(TransportSlice::Tcp(tcp)) = &sliced.transport else {
        return Err(DecodeError::NotTcp);
    };

    let window_scale = if tcp.syn() {
        tcp.options_iterator().find_map(|option| match option {
            Ok(TcpOptionElement::WindowScale(shift)) => Some(shift),
            _ => None,
        })
    } else {
        None
    };

    Ok(TcpSegment {
        src: SocketAddr::new(src_ip, tcp.source_port()),
        dst: SocketAddr::new(dst_ip, tcp.destination_port()),
        seq: tcp.sequence_number(),
        ack: tcp.acknowledgment_number(),
        flags: TcpFlags {
            syn: tcp.syn(),
            ack: tcp.ack(),
            fin: tcp.fin(),
            rst: tcp.rst(),
        },
        window: tcp.window_size(),
        window_scale,
        payload: Bytes::copy_from_slice(tcp.payload()),
        observed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn ethernet_tcp(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 2], [10, 0, 0, 9], 64)
            .tcp(51000, 80, 1000, 64240)
            .ack(77)
            .psh();
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    #[test]
    fn decodes_ethernet_ipv4_tcp() {
        let frame = ethernet_tcp(b"GET / HTTP/1.1\r\n\r\n");
        let segment = decode(LinkType::Ethernet, &frame, Utc::now()).unwrap();
        assert_eq!(segment.src, "10.0.0.2:51000".parse().unwrap());
        assert_eq!(segment.dst, "10.0.0.9:80".parse().unwrap());
        assert_eq!(segment.seq, 1000);
        assert_eq!(segment.ack, 77);
        assert!(segment.flags.ack && !segment.flags.syn);
        assert_eq!(&segment.payload[..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn decodes_raw_ipv6() {
        let builder = PacketBuilder::ipv6([0xfd; 16], [0xfe; 16], 64)
            .tcp(40000, 8080, 1, 1024)
            .syn();
        let mut out = Vec::new();
        builder.write(&mut out, &[]).unwrap();

        let segment = decode(LinkType::Raw, &out, Utc::now()).unwrap();
        assert!(segment.src.is_ipv6());
        assert!(segment.flags.syn);
        assert!(segment.payload.is_empty());
    }

    #[test]
    fn rejects_udp_and_garbage() {
        let builder = PacketBuilder::ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64).udp(53, 53);
        let mut out = Vec::new();
        builder.write(&mut out, b"x").unwrap();
        assert_eq!(decode(LinkType::Raw, &out, Utc::now()), Err(DecodeError::NotTcp));

        assert!(decode(LinkType::Ethernet, &[0u8; 3], Utc::now()).is_err());
        assert_eq!(
            decode(LinkType::Null, &[0u8; 2], Utc::now()),
            Err(DecodeError::NotIp)
        );
    }

    #[test]
    fn datalink_mapping() {
        assert_eq!(LinkType::from_datalink(1).unwrap(), LinkType::Ethernet);
        assert_eq!(LinkType::from_datalink(113).unwrap(), LinkType::LinuxSll);
        assert!(matches!(
            LinkType::from_datalink(127),
            Err(CaptureError::UnsupportedLinkType(127))
        ));
    }
}
