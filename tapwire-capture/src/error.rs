use thiserror::Error;

/// Fatal errors of a packet source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Unsupported link type {0}")]
    UnsupportedLinkType(i32),
}

/// Per-packet decode failures. These never stop a capture.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed headers: {0}")]
    Malformed(String),

    #[error("not an IP packet")]
    NotIp,

    #[error("not a TCP segment")]
    NotTcp,
}
