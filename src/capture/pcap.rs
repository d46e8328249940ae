//! Live capture through libpcap.

use pcap::{Active, Capture, Device};

use super::iface::NetworkInterface;
use super::record::LinkType;
use super::{CaptureError, FrameSource, RawFrame};
use crate::config::CaptureConfig;

/// An open libpcap handle on one interface.
pub struct LiveSource {
    capture: Capture<Active>,
    link: LinkType,
}

impl LiveSource {
    /// Opens `name` with the configured snap length, promiscuity and read
    /// timeout. Immediate mode keeps per-frame latency low.
    pub fn open(name: &str, cfg: &CaptureConfig) -> Result<Self, CaptureError> {
        let open_err = |e: pcap::Error| CaptureError::Open {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let timeout_ms = i32::try_from(cfg.read_timeout.as_millis())
            .unwrap_or(i32::MAX)
            .max(1);

        let capture = Capture::from_device(name)
            .map_err(open_err)?
            .promisc(cfg.promiscuous)
            .snaplen(i32::from(cfg.snaplen))
            .timeout(timeout_ms)
            .immediate_mode(true)
            .open()
            .map_err(open_err)?;

        let dlt = capture.get_datalink().0;
        let link = LinkType::from_dlt(dlt).ok_or_else(|| CaptureError::UnsupportedLink {
            name: name.to_string(),
            dlt,
        })?;

        tracing::info!(
            interface = name,
            link = %link,
            snaplen = cfg.snaplen,
            promiscuous = cfg.promiscuous,
            "opened live capture",
        );

        Ok(Self { capture, link })
    }
}

impl FrameSource for LiveSource {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame<'_>>, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => Ok(Some(RawFrame {
                data: packet.data,
                wire_len: packet.header.len,
            })),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(pcap::Error::NoMorePackets) => Err(CaptureError::Exhausted),
            Err(e) => Err(CaptureError::Read(e.to_string())),
        }
    }

    fn dropped(&mut self) -> Option<u64> {
        self.capture.stats().ok().map(|s| u64::from(s.dropped))
    }
}

/// Lists every device libpcap can open.
pub fn list_interfaces() -> Result<Vec<NetworkInterface>, CaptureError> {
    let devices = Device::list().map_err(|e| CaptureError::List(e.to_string()))?;

    Ok(devices
        .into_iter()
        .map(|d| NetworkInterface {
            is_up: d.flags.is_up(),
            is_loopback: d.flags.is_loopback(),
            addresses: d.addresses.iter().map(|a| a.addr).collect(),
            description: d.desc,
            name: d.name,
        })
        .collect())
}
