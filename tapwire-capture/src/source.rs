//! Live and offline packet sources backed by libpcap.

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use pcap::{Activated, Capture, Device};
use tapwire_config::CaptureConfig;
use tracing::{info, trace, warn};

use crate::error::CaptureError;
use crate::packet::{decode, LinkType, TcpSegment};

/// What a source hands to the capture loop.
#[derive(Debug)]
pub enum SourceEvent {
    Segment(TcpSegment),
    /// The read timeout expired without a packet.
    Idle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub packets: u64,
    pub undecodable: u64,
}

pub struct PacketSource {
    capture: Capture<dyn Activated>,
    link: LinkType,
    name: String,
}

impl PacketSource {
    /// Opens a live capture on the configured interface.
    pub fn open_live(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let device = find_device(&config.interface)?;
        let mut capture = Capture::from_device(device)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen as i32)
            .timeout(config.read_timeout_ms as i32)
            .open()?;
        if let Some(filter) = &config.bpf_filter {
            capture.filter(filter, true)?;
        }
        info!(interface = %config.interface, "Opened live capture");
        Self::from_capture(capture.into(), config.interface.clone())
    }

    /// Opens a pcap file for replay.
    pub fn open_file(path: &Path, bpf_filter: Option<&str>) -> Result<Self, CaptureError> {
        let mut capture = Capture::from_file(path)?;
        if let Some(filter) = bpf_filter {
            capture.filter(filter, true)?;
        }
        info!(file = %path.display(), "Opened capture file");
        Self::from_capture(capture.into(), path.display().to_string())
    }

    fn from_capture(capture: Capture<dyn Activated>, name: String) -> Result<Self, CaptureError> {
        let link = LinkType::from_datalink(capture.get_datalink().0)?;
        Ok(Self { capture, link, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link_type(&self) -> LinkType {
        self.link
    }

    /// Reads until `terminate` is set or the source is exhausted.
    ///
    /// Undecodable packets are skipped.
    pub fn run<F>(&mut self, terminate: &AtomicBool, mut on_event: F) -> Result<SourceStats, CaptureError>
    where
        F: FnMut(SourceEvent),
    {
        let mut stats = SourceStats::default();

        while !terminate.load(Ordering::Relaxed) {
            match self.capture.next_packet() {
                Ok(packet) => {
                    stats.packets += 1;
                    let ts = packet.header.ts;
                    let observed_at = DateTime::<Utc>::from_timestamp(
                        ts.tv_sec as i64,
                        (ts.tv_usec as u32).saturating_mul(1000),
                    )
                    .unwrap_or_else(Utc::now);

                    match decode(self.link, packet.data, observed_at) {
                        Ok(segment) => on_event(SourceEvent::Segment(segment)),
                        Err(e) => {
                            stats.undecodable += 1;
                            trace!(error = %e, len = packet.data.len(), "skipping packet");
                        }
                    }
                }
                Err(pcap::Error::TimeoutExpired) => on_event(SourceEvent::Idle),
                Err(pcap::Error::NoMorePackets) => break,
                Err(e) => {
                    warn!(source = %self.name, error = %e, "capture failed");
                    return Err(e.into());
                }
            }
        }
        Ok(stats)
    }
}

fn find_device(name: &str) -> Result<Device, CaptureError> {
    Device::list()?
        .into_iter()
        .find(|d| d.name == name)
        .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))
}

/// Addresses assigned to an interface, used when none are configured.
pub fn interface_addresses(name: &str) -> Result<Vec<IpAddr>, CaptureError> {
    if name == "any" {
        return Ok(Device::list()?
            .into_iter()
            .flat_map(|d| d.addresses.into_iter().map(|a| a.addr))
            .collect());
    }
    Ok(find_device(name)?
        .addresses
        .into_iter()
        .map(|a| a.addr)
        .collect())
}
