//! Header parsing for captured frames.
//!
//! Every field read goes through [`Cursor`], which checks the bytes that
//! remain before touching them. Truncated or malformed frames stop the walk
//! early and leave the remaining record fields zeroed; they never produce an
//! error.

use std::time::Instant;

use super::record::{
    LinkType, PacketRecord, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP,
};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_QINQ: u16 = 0x88A8;
pub const ETHERTYPE_QINQ_LEGACY: u16 = 0x9100;

const ETHERNET_HEADER_LEN: usize = 14;
const SLL_HEADER_LEN: usize = 16;
const SLL2_HEADER_LEN: usize = 20;
const NULL_HEADER_LEN: usize = 4;
const VLAN_TAG_LEN: usize = 4;
const MAX_VLAN_TAGS: usize = 2;

const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

const IPV6_HOP_BY_HOP: u8 = 0;
const IPV6_ROUTING: u8 = 43;
const IPV6_FRAGMENT: u8 = 44;
const IPV6_DEST_OPTIONS: u8 = 60;
const IPV6_FRAGMENT_HEADER_LEN: usize = 8;
const MAX_IPV6_EXTENSIONS: usize = 8;

const AF_INET: u32 = 2;
/// AF_INET6 on Linux, NetBSD/OpenBSD, FreeBSD, and macOS respectively.
const AF_INET6_VALUES: [u32; 4] = [10, 24, 28, 30];

const DNS_PORT: u16 = 53;
const MDNS_PORT: u16 = 5353;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// How far parsing got before the frame ran out or stopped making sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Complete,
    Partial,
}

/// Parses one captured frame into a [`PacketRecord`].
///
/// `data` holds the captured bytes (at most the snap length) and `wire_len`
/// the original length on the wire.
pub fn parse_frame(
    link: LinkType,
    data: &[u8],
    wire_len: u32,
    timestamp: Instant,
) -> (PacketRecord, ParseOutcome) {
    let captured_len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    let mut record = PacketRecord::new(timestamp, captured_len, wire_len);

    let outcome = match parse_link(link, Cursor::new(data), &mut record) {
        Some(()) => ParseOutcome::Complete,
        None => ParseOutcome::Partial,
    };

    (record, outcome)
}

/// Folds a 128-bit IPv6 address into a 32-bit flow-key component.
pub fn fold_ipv6(addr: &[u8; 16]) -> u32 {
    addr.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Read-only view over captured bytes with a moving start offset.
#[derive(Debug, Clone, Copy)]
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let start = self.pos.checked_add(offset)?;
        let end = start.checked_add(N)?;
        self.data.get(start..end)?.try_into().ok()
    }

    fn u8(&self, offset: usize) -> Option<u8> {
        self.array::<1>(offset).map(|b| b[0])
    }

    fn be16(&self, offset: usize) -> Option<u16> {
        self.array(offset).map(u16::from_be_bytes)
    }

    fn be32(&self, offset: usize) -> Option<u32> {
        self.array(offset).map(u32::from_be_bytes)
    }

    fn advance(&mut self, n: usize) -> Option<()> {
        if n > self.remaining() {
            return None;
        }
        self.pos += n;
        Some(())
    }
}

fn parse_link(link: LinkType, mut cur: Cursor<'_>, record: &mut PacketRecord) -> Option<()> {
    let ethertype = match link {
        LinkType::Ethernet => {
            let ethertype = cur.be16(12)?;
            cur.advance(ETHERNET_HEADER_LEN)?;
            strip_vlan_tags(&mut cur, ethertype)?
        }
        LinkType::LinuxSll => {
            let ethertype = cur.be16(14)?;
            cur.advance(SLL_HEADER_LEN)?;
            strip_vlan_tags(&mut cur, ethertype)?
        }
        LinkType::LinuxSll2 => {
            let ethertype = cur.be16(0)?;
            cur.advance(SLL2_HEADER_LEN)?;
            strip_vlan_tags(&mut cur, ethertype)?
        }
        LinkType::Null => {
            let raw = cur.array::<4>(0)?;
            cur.advance(NULL_HEADER_LEN)?;
            // Host byte order of the capturing machine, which may not be ours.
            family_ethertype(u32::from_ne_bytes(raw))
                .or_else(|| family_ethertype(u32::from_ne_bytes(raw).swap_bytes()))?
        }
        LinkType::Loop => {
            let family = cur.be32(0)?;
            cur.advance(NULL_HEADER_LEN)?;
            family_ethertype(family)?
        }
        LinkType::Raw => match cur.u8(0)? >> 4 {
            4 => ETHERTYPE_IPV4,
            6 => ETHERTYPE_IPV6,
            _ => return None,
        },
    };

    match ethertype {
        ETHERTYPE_ARP => {
            record.is_arp = true;
            Some(())
        }
        ETHERTYPE_IPV4 => parse_ipv4(cur, record),
        ETHERTYPE_IPV6 => parse_ipv6(cur, record),
        // Other ethertypes are valid frames we simply do not classify.
        _ => Some(()),
    }
}

fn is_vlan(ethertype: u16) -> bool {
    matches!(
        ethertype,
        ETHERTYPE_VLAN | ETHERTYPE_QINQ | ETHERTYPE_QINQ_LEGACY
    )
}

/// Skips up to two stacked tags, returning the innermost ethertype.
fn strip_vlan_tags(cur: &mut Cursor<'_>, mut ethertype: u16) -> Option<u16> {
    for _ in 0..MAX_VLAN_TAGS {
        if !is_vlan(ethertype) {
            break;
        }
        // Tag layout: 2-byte TCI, then the encapsulated ethertype.
        ethertype = cur.be16(2)?;
        cur.advance(VLAN_TAG_LEN)?;
    }
    Some(ethertype)
}

fn family_ethertype(family: u32) -> Option<u16> {
    if family == AF_INET {
        Some(ETHERTYPE_IPV4)
    } else if AF_INET6_VALUES.contains(&family) {
        Some(ETHERTYPE_IPV6)
    } else {
        None
    }
}

fn parse_ipv4(mut cur: Cursor<'_>, record: &mut PacketRecord) -> Option<()> {
    if cur.remaining() < IPV4_MIN_HEADER_LEN {
        return None;
    }

    let version_ihl = cur.u8(0)?;
    if version_ihl >> 4 != 4 {
        return None;
    }
    let header_len = usize::from(version_ihl & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || header_len > cur.remaining() {
        return None;
    }

    record.ip_version = 4;
    record.protocol = cur.u8(9)?;
    record.src_ip = cur.be32(12)?;
    record.dst_ip = cur.be32(16)?;

    if record.protocol == IPPROTO_ICMP {
        record.is_icmp = true;
        return Some(());
    }

    // Only the first fragment carries the transport header.
    let fragment_offset = cur.be16(6)? & 0x1fff;
    if fragment_offset != 0 {
        return Some(());
    }

    cur.advance(header_len)?;
    parse_transport(cur, record)
}

fn is_ipv6_extension(next_header: u8) -> bool {
    matches!(
        next_header,
        IPV6_HOP_BY_HOP | IPV6_ROUTING | IPV6_FRAGMENT | IPV6_DEST_OPTIONS
    )
}

fn parse_ipv6(mut cur: Cursor<'_>, record: &mut PacketRecord) -> Option<()> {
    if cur.remaining() < IPV6_HEADER_LEN || cur.u8(0)? >> 4 != 6 {
        return None;
    }

    record.ip_version = 6;
    record.src_ip = fold_ipv6(&cur.array::<16>(8)?);
    record.dst_ip = fold_ipv6(&cur.array::<16>(24)?);

    let mut next_header = cur.u8(6)?;
    cur.advance(IPV6_HEADER_LEN)?;

    for _ in 0..MAX_IPV6_EXTENSIONS {
        if !is_ipv6_extension(next_header) {
            break;
        }
        let following = cur.u8(0)?;
        let len = if next_header == IPV6_FRAGMENT {
            IPV6_FRAGMENT_HEADER_LEN
        } else {
            (usize::from(cur.u8(1)?) + 1) * 8
        };
        cur.advance(len)?;
        next_header = following;
    }

    if is_ipv6_extension(next_header) {
        return None;
    }

    record.protocol = next_header;
    parse_transport(cur, record)
}

fn parse_transport(cur: Cursor<'_>, record: &mut PacketRecord) -> Option<()> {
    match record.protocol {
        IPPROTO_TCP => {
            if cur.remaining() < TCP_MIN_HEADER_LEN {
                return None;
            }
            record.src_port = cur.be16(0)?;
            record.dst_port = cur.be16(2)?;
            record.tcp_flags = cur.u8(13)?;
            record.is_dns = record.src_port == DNS_PORT || record.dst_port == DNS_PORT;
        }
        IPPROTO_UDP => {
            if cur.remaining() < UDP_HEADER_LEN {
                return None;
            }
            record.src_port = cur.be16(0)?;
            record.dst_port = cur.be16(2)?;
            record.is_dns = [record.src_port, record.dst_port]
                .iter()
                .any(|port| *port == DNS_PORT || *port == MDNS_PORT);
        }
        IPPROTO_ICMP | IPPROTO_ICMPV6 => record.is_icmp = true,
        _ => {}
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::{TCP_ACK, TCP_RST, TCP_SYN};

    fn ipv4_header(protocol: u8, payload_len: usize) -> Vec<u8> {
        let total = (20 + payload_len) as u16;
        let mut h = vec![0x45, 0x00];
        h.extend_from_slice(&total.to_be_bytes());
        h.extend_from_slice(&[0, 0, 0x40, 0, 64, protocol, 0, 0]);
        h.extend_from_slice(&[10, 0, 0, 1]);
        h.extend_from_slice(&[10, 0, 0, 2]);
        h
    }

    fn tcp_header(sport: u16, dport: u16, flags: u8) -> Vec<u8> {
        let mut h = Vec::with_capacity(20);
        h.extend_from_slice(&sport.to_be_bytes());
        h.extend_from_slice(&dport.to_be_bytes());
        h.extend_from_slice(&[0; 8]);
        h.push(0x50);
        h.push(flags);
        h.extend_from_slice(&[0; 6]);
        h
    }

    fn udp_header(sport: u16, dport: u16) -> Vec<u8> {
        let mut h = Vec::with_capacity(8);
        h.extend_from_slice(&sport.to_be_bytes());
        h.extend_from_slice(&dport.to_be_bytes());
        h.extend_from_slice(&[0, 8, 0, 0]);
        h
    }

    fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![0xaa; 12];
        f.extend_from_slice(&ethertype.to_be_bytes());
        f.extend_from_slice(payload);
        f
    }

    fn parse(link: LinkType, data: &[u8]) -> (PacketRecord, ParseOutcome) {
        parse_frame(link, data, data.len() as u32, Instant::now())
    }

    fn ipv4_tcp(sport: u16, dport: u16, flags: u8) -> Vec<u8> {
        let mut p = ipv4_header(IPPROTO_TCP, 20);
        p.extend(tcp_header(sport, dport, flags));
        p
    }

    #[test]
    fn test_ethernet_ipv4_tcp() {
        let frame = ethernet(ETHERTYPE_IPV4, &ipv4_tcp(51000, 443, TCP_SYN | TCP_ACK));
        let (rec, outcome) = parse(LinkType::Ethernet, &frame);

        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(rec.ip_version, 4);
        assert_eq!(rec.src_ip, 0x0a00_0001);
        assert_eq!(rec.dst_ip, 0x0a00_0002);
        assert_eq!(rec.protocol, IPPROTO_TCP);
        assert_eq!(rec.src_port, 51000);
        assert_eq!(rec.dst_port, 443);
        assert_eq!(rec.tcp_flags, TCP_SYN | TCP_ACK);
        assert!(!rec.is_dns);
        assert!(!rec.is_rst());
        assert_eq!(rec.captured_len, frame.len() as u32);
    }

    #[test]
    fn test_wire_len_kept_separately() {
        let frame = ethernet(ETHERTYPE_IPV4, &ipv4_tcp(1, 2, 0));
        let (rec, _) = parse_frame(LinkType::Ethernet, &frame, 1514, Instant::now());
        assert_eq!(rec.captured_len, 54);
        assert_eq!(rec.wire_len, 1514);
    }

    #[test]
    fn test_vlan_tag_stripped() {
        let payload = ipv4_tcp(40000, 80, TCP_RST);
        let plain = ethernet(ETHERTYPE_IPV4, &payload);

        let mut tagged_payload = vec![0x00, 0x64];
        tagged_payload.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        tagged_payload.extend_from_slice(&payload);
        let tagged = ethernet(ETHERTYPE_VLAN, &tagged_payload);

        let (a, _) = parse(LinkType::Ethernet, &plain);
        let (b, outcome) = parse(LinkType::Ethernet, &tagged);

        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(
            (a.src_ip, a.dst_ip, a.src_port, a.dst_port, a.protocol, a.tcp_flags),
            (b.src_ip, b.dst_ip, b.src_port, b.dst_port, b.protocol, b.tcp_flags)
        );
        assert!(b.is_rst());
    }

    #[test]
    fn test_qinq_two_tags_stripped() {
        let payload = ipv4_tcp(40000, 80, 0);
        let mut inner = vec![0x00, 0x0a];
        inner.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        inner.extend_from_slice(&[0x00, 0x14]);
        inner.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        inner.extend_from_slice(&payload);
        let frame = ethernet(ETHERTYPE_QINQ, &inner);

        let (rec, outcome) = parse(LinkType::Ethernet, &frame);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(rec.dst_port, 80);
    }

    #[test]
    fn test_third_vlan_tag_not_stripped() {
        let mut inner = Vec::new();
        for _ in 0..2 {
            inner.extend_from_slice(&[0x00, 0x0a]);
            inner.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
        }
        inner.extend_from_slice(&[0x00, 0x0a]);
        inner.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        inner.extend(ipv4_tcp(1, 2, 0));
        let frame = ethernet(ETHERTYPE_VLAN, &inner);

        let (rec, _) = parse(LinkType::Ethernet, &frame);
        assert_eq!(rec.ip_version, 0);
        assert!(!rec.is_classified());
    }

    #[test]
    fn test_arp() {
        let frame = ethernet(ETHERTYPE_ARP, &[0u8; 28]);
        let (rec, outcome) = parse(LinkType::Ethernet, &frame);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert!(rec.is_arp);
        assert_eq!(rec.protocol, 0);
    }

    #[test]
    fn test_icmp_classified_without_transport() {
        let mut packet = ipv4_header(IPPROTO_ICMP, 8);
        packet.extend_from_slice(&[3, 1, 0, 0]);
        let (rec, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert!(rec.is_icmp);
        assert_eq!(rec.src_port, 0);
    }

    #[test]
    fn test_udp_dns_and_mdns() {
        let mut dns = ipv4_header(IPPROTO_UDP, 8);
        dns.extend(udp_header(33000, 53));
        let (rec, _) = parse(LinkType::Raw, &dns);
        assert!(rec.is_dns);

        let mut mdns = ipv4_header(IPPROTO_UDP, 8);
        mdns.extend(udp_header(5353, 5353));
        let (rec, _) = parse(LinkType::Raw, &mdns);
        assert!(rec.is_dns);

        let mut other = ipv4_header(IPPROTO_UDP, 8);
        other.extend(udp_header(33000, 443));
        let (rec, _) = parse(LinkType::Raw, &other);
        assert!(!rec.is_dns);
    }

    #[test]
    fn test_tcp_dns_port() {
        let (rec, _) = parse(LinkType::Raw, &ipv4_tcp(53, 40000, 0));
        assert!(rec.is_dns);
    }

    #[test]
    fn test_truncated_tcp_keeps_network_fields() {
        let mut packet = ipv4_header(IPPROTO_TCP, 20);
        packet.extend_from_slice(&tcp_header(1234, 443, 0)[..10]);

        let (rec, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Partial);
        assert_eq!(rec.protocol, IPPROTO_TCP);
        assert_eq!(rec.src_ip, 0x0a00_0001);
        assert_eq!(rec.src_port, 0);
        assert_eq!(rec.dst_port, 0);
    }

    #[test]
    fn test_ihl_beyond_capture_rejected() {
        let mut packet = ipv4_header(IPPROTO_TCP, 0);
        packet[0] = 0x4f; // 60-byte header, only 20 captured
        let (rec, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Partial);
        assert_eq!(rec.ip_version, 0);
        assert_eq!(rec.src_ip, 0);
    }

    #[test]
    fn test_ihl_too_small_rejected() {
        let mut packet = ipv4_tcp(1, 2, 0);
        packet[0] = 0x44;
        let (_, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Partial);
    }

    #[test]
    fn test_non_first_fragment_has_no_ports() {
        let mut packet = ipv4_tcp(1234, 443, 0);
        packet[6] = 0x00;
        packet[7] = 0x10;
        let (rec, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(rec.protocol, IPPROTO_TCP);
        assert_eq!(rec.dst_port, 0);
    }

    #[test]
    fn test_every_truncation_is_safe() {
        let frame = ethernet(ETHERTYPE_IPV4, &ipv4_tcp(1234, 443, TCP_SYN));
        for len in 0..frame.len() {
            let (rec, outcome) = parse(LinkType::Ethernet, &frame[..len]);
            assert_eq!(outcome, ParseOutcome::Partial, "len {len}");
            assert_eq!(rec.captured_len, len as u32);
        }
    }

    fn ipv6_header(next_header: u8, payload_len: u16) -> Vec<u8> {
        let mut h = vec![0x60, 0, 0, 0];
        h.extend_from_slice(&payload_len.to_be_bytes());
        h.push(next_header);
        h.push(64);
        let mut src = [0u8; 16];
        src[0] = 0x20;
        src[1] = 0x01;
        src[15] = 1;
        let mut dst = src;
        dst[15] = 2;
        h.extend_from_slice(&src);
        h.extend_from_slice(&dst);
        h
    }

    #[test]
    fn test_ipv6_hop_by_hop_then_tcp() {
        let mut packet = ipv6_header(IPV6_HOP_BY_HOP, 28);
        // Hop-by-Hop: next header TCP, length 0 (8 bytes total).
        packet.extend_from_slice(&[IPPROTO_TCP, 0, 1, 4, 0, 0, 0, 0]);
        packet.extend(tcp_header(50000, 443, TCP_SYN));
        let frame = ethernet(ETHERTYPE_IPV6, &packet);

        let (rec, outcome) = parse(LinkType::Ethernet, &frame);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(rec.ip_version, 6);
        assert_eq!(rec.protocol, IPPROTO_TCP);
        assert_eq!(rec.src_port, 50000);
        assert_eq!(rec.dst_port, 443);
        assert_ne!(rec.src_ip, rec.dst_ip);
    }

    #[test]
    fn test_ipv6_fragment_length_fixed() {
        let mut packet = ipv6_header(IPV6_FRAGMENT, 16);
        // Reserved length byte set to garbage; the header is still 8 bytes.
        packet.extend_from_slice(&[IPPROTO_UDP, 0xff, 0, 0, 0, 0, 0, 1]);
        packet.extend(udp_header(5353, 5353));

        let (rec, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(rec.protocol, IPPROTO_UDP);
        assert!(rec.is_dns);
    }

    #[test]
    fn test_ipv6_chained_extensions() {
        let mut packet = ipv6_header(IPV6_DEST_OPTIONS, 0);
        // Destination options with length 1 (16 bytes), then routing (8 bytes).
        packet.push(IPV6_ROUTING);
        packet.push(1);
        packet.extend_from_slice(&[0; 14]);
        packet.extend_from_slice(&[IPPROTO_ICMPV6, 0, 0, 0, 0, 0, 0, 0]);
        packet.extend_from_slice(&[1, 4, 0, 0]);

        let (rec, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(rec.protocol, IPPROTO_ICMPV6);
        assert!(rec.is_icmp);
    }

    #[test]
    fn test_ipv6_truncated_extension() {
        let mut packet = ipv6_header(IPV6_HOP_BY_HOP, 8);
        packet.extend_from_slice(&[IPPROTO_TCP, 2, 0, 0]);

        let (rec, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Partial);
        assert_eq!(rec.ip_version, 6);
        assert_eq!(rec.protocol, 0);
    }

    #[test]
    fn test_ipv6_extension_loop_bounded() {
        let mut packet = ipv6_header(IPV6_DEST_OPTIONS, 0);
        for _ in 0..(MAX_IPV6_EXTENSIONS + 2) {
            packet.extend_from_slice(&[IPV6_DEST_OPTIONS, 0, 0, 0, 0, 0, 0, 0]);
        }
        let (rec, outcome) = parse(LinkType::Raw, &packet);
        assert_eq!(outcome, ParseOutcome::Partial);
        assert_eq!(rec.protocol, 0);
    }

    #[test]
    fn test_fold_ipv6_fnv1a() {
        // FNV-1a over sixteen zero bytes.
        let mut expected = FNV_OFFSET_BASIS;
        for _ in 0..16 {
            expected = expected.wrapping_mul(FNV_PRIME);
        }
        assert_eq!(fold_ipv6(&[0u8; 16]), expected);

        let mut a = [0u8; 16];
        a[15] = 1;
        let mut b = [0u8; 16];
        b[0] = 1;
        assert_ne!(fold_ipv6(&a), fold_ipv6(&b));
    }

    #[test]
    fn test_linux_sll() {
        let mut frame = vec![0u8; 14];
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame.extend(ipv4_tcp(1234, 443, 0));
        let (rec, outcome) = parse(LinkType::LinuxSll, &frame);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(rec.dst_port, 443);
    }

    #[test]
    fn test_linux_sll2() {
        let mut frame = ETHERTYPE_IPV4.to_be_bytes().to_vec();
        frame.extend_from_slice(&[0u8; 18]);
        frame.extend(ipv4_tcp(1234, 443, 0));
        let (rec, outcome) = parse(LinkType::LinuxSll2, &frame);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert_eq!(rec.src_port, 1234);
    }

    #[test]
    fn test_null_family_either_byte_order() {
        for family in [2u32.to_le_bytes(), 2u32.to_be_bytes()] {
            let mut frame = family.to_vec();
            frame.extend(ipv4_tcp(1234, 443, 0));
            let (rec, outcome) = parse(LinkType::Null, &frame);
            assert_eq!(outcome, ParseOutcome::Complete);
            assert_eq!(rec.ip_version, 4);
        }

        let mut v6 = 30u32.to_ne_bytes().to_vec();
        let mut packet = ipv6_header(IPPROTO_UDP, 8);
        packet.extend(udp_header(1000, 53));
        v6.extend(packet);
        let (rec, _) = parse(LinkType::Null, &v6);
        assert_eq!(rec.ip_version, 6);
        assert!(rec.is_dns);
    }

    #[test]
    fn test_loop_network_order() {
        let mut frame = 2u32.to_be_bytes().to_vec();
        frame.extend(ipv4_tcp(1234, 443, 0));
        let (rec, _) = parse(LinkType::Loop, &frame);
        assert_eq!(rec.ip_version, 4);
    }

    #[test]
    fn test_unknown_ethertype_is_unclassified() {
        let frame = ethernet(0x88cc, &[0u8; 40]);
        let (rec, outcome) = parse(LinkType::Ethernet, &frame);
        assert_eq!(outcome, ParseOutcome::Complete);
        assert!(!rec.is_classified());
    }

    #[test]
    fn test_link_type_from_dlt() {
        assert_eq!(LinkType::from_dlt(1), Some(LinkType::Ethernet));
        assert_eq!(LinkType::from_dlt(113), Some(LinkType::LinuxSll));
        assert_eq!(LinkType::from_dlt(0), Some(LinkType::Null));
        assert_eq!(LinkType::from_dlt(127), None);
    }
}
