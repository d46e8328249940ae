use std::fmt;
use std::time::Instant;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// TCP flag bits as found in byte 13 of the TCP header.
pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_ACK: u8 = 0x10;

/// Link-layer framing of a capture handle.
/// Values follow the libpcap `DLT_*` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// BSD loopback, address family in host byte order.
    Null,
    /// Ethernet II with optional 802.1Q/802.1ad tags.
    Ethernet,
    /// Raw IP, no link header.
    Raw,
    /// OpenBSD loopback, address family in network byte order.
    Loop,
    /// Linux cooked capture v1.
    LinuxSll,
    /// Linux cooked capture v2.
    LinuxSll2,
}

impl LinkType {
    /// Maps a libpcap data-link type to a supported framing.
    pub const fn from_dlt(dlt: i32) -> Option<Self> {
        match dlt {
            0 => Some(Self::Null),
            1 => Some(Self::Ethernet),
            12 | 14 | 101 => Some(Self::Raw),
            108 => Some(Self::Loop),
            113 => Some(Self::LinuxSll),
            276 => Some(Self::LinuxSll2),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Ethernet => "en10mb",
            Self::Raw => "raw",
            Self::Loop => "loop",
            Self::LinuxSll => "linux_sll",
            Self::LinuxSll2 => "linux_sll2",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed frame, produced by the capture pump and consumed by the
/// aggregator.
///
/// Addresses are IPv4 addresses in host byte order. IPv6 addresses are folded
/// into the same 32-bit space with FNV-1a, so they only serve as flow keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketRecord {
    pub timestamp: Instant,
    pub captured_len: u32,
    pub wire_len: u32,
    pub ip_version: u8,
    pub src_ip: u32,
    pub dst_ip: u32,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_flags: u8,
    pub is_arp: bool,
    pub is_dns: bool,
    pub is_icmp: bool,
}

impl PacketRecord {
    /// A record with only timing and length filled in.
    pub fn new(timestamp: Instant, captured_len: u32, wire_len: u32) -> Self {
        Self {
            timestamp,
            captured_len,
            wire_len,
            ip_version: 0,
            src_ip: 0,
            dst_ip: 0,
            protocol: 0,
            src_port: 0,
            dst_port: 0,
            tcp_flags: 0,
            is_arp: false,
            is_dns: false,
            is_icmp: false,
        }
    }

    pub fn is_rst(&self) -> bool {
        self.tcp_flags & TCP_RST != 0
    }

    /// Whether parsing got far enough for the record to identify a flow.
    pub fn is_classified(&self) -> bool {
        self.protocol != 0 || self.is_arp || self.is_dns || self.is_icmp
    }
}
