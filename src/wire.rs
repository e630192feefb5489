//! Header parsing for the frames the engine is willing to look at:
//! Ethernet (optionally 802.1Q tagged) or raw IP, carrying IPv4 without
//! options or IPv6 without extension headers, carrying TCP.

use crate::checksum::{
    checksum, checksum_no_fold, checksum_no_fold_parts, fold, pseudo_header_checksum_no_fold,
};
use crate::flow::FlowKey;
use crate::seq::SeqNumber;
use bitflags::bitflags;
use bytes::Bytes;
use byteorder::{BigEndian, ByteOrder};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::Range;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;
pub const ETHERTYPE_VLAN: u16 = 0x8100;

const ETHER_HDR_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_HDR_LEN: usize = 20;
const IPV6_HDR_LEN: usize = 40;
const TCP_HDR_LEN: usize = 20;
const IPV4_SRC_ADDR_OFFSET: usize = 12;
const IPV6_SRC_ADDR_OFFSET: usize = 8;
const IPV4_CSUM_OFFSET: usize = 10;
const IPV4_FLAG_DF: u16 = 0x4000;
const IPV4_FLAG_MF: u16 = 0x2000;
const IPV4_FRAG_OFFSET_MASK: u16 = 0x1fff;
const IPV6_NEXT_HEADER_FRAGMENT: u8 = 44;
const IPV6_EXTENSION_HEADERS: [u8; 6] = [0, 43, 50, 51, 60, 135];
const TCP_SEQ_OFFSET: usize = 4;
const TCP_ACK_OFFSET: usize = 8;
const TCP_FLAGS_OFFSET: usize = 13;
const TCP_WINDOW_OFFSET: usize = 14;
const TCP_CSUM_OFFSET: usize = 16;
/// NOP, NOP, TIMESTAMP, length 10: the only option layout that may be merged.
const TCP_TS_OPTION_PREFIX: u32 = 0x0101_080a;
const TCP_TS_OPTIONS_LEN: usize = 12;
const IPPROTO_TCP: u8 = libc::IPPROTO_TCP as u8;

/// Link layer of the frames handed to the engine.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub enum Layer {
    /// Ethernet frames, optionally carrying one 802.1Q tag.
    #[default]
    L2,
    /// Bare IP datagrams, as read from a TUN device.
    L3,
}

bitflags! {
    /// TCP header control bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
        const ECE = 0x40;
        const CWR = 0x80;
    }
}

impl TcpFlags {
    /// Bits that must reach the stack on their own segment.
    pub const CONTROL: TcpFlags = TcpFlags::SYN
        .union(TcpFlags::FIN)
        .union(TcpFlags::RST)
        .union(TcpFlags::URG);
}

/// Value and echo reply of the TCP timestamp option (RFC 7323).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct TcpTimestamp {
    pub value: u32,
    pub echo: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TcpOptions {
    None,
    Timestamp(TcpTimestamp),
    /// Anything else (SACK, window scale, MSS, odd padding, ...).
    Other,
}

impl TcpOptions {
    pub fn timestamp(&self) -> Option<TcpTimestamp> {
        match self {
            TcpOptions::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// Why a frame was not considered for aggregation.
#[derive(thiserror::Error, Clone, Copy, Debug, Eq, PartialEq)]
pub enum Ineligible {
    #[error("frame too short for its headers")]
    Truncated,
    #[error("not an IP datagram")]
    NotIp,
    #[error("not a TCP segment")]
    NotTcp,
    #[error("IP fragment")]
    Fragment,
    #[error("IPv4 header carries options")]
    IpOptions,
    #[error("IPv6 extension header present")]
    ExtensionHeader,
    #[error("inconsistent length fields")]
    BadLength,
    #[error("checksum mismatch")]
    BadChecksum,
}

/// The IP header fields that must match between two segments before their
/// payloads can share one header.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct IpSignature {
    /// TOS (IPv4) or traffic class (IPv6), including the ECN bits.
    pub codepoint: u8,
    /// TTL (IPv4) or hop limit (IPv6).
    pub ttl: u8,
    pub dont_fragment: bool,
}

/// Offsets of the headers inside a frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderLayout {
    pub l3_offset: usize,
    pub l4_offset: usize,
    pub tcp_header_len: usize,
    pub is_v6: bool,
}

impl HeaderLayout {
    /// Length of all headers up to the TCP payload.
    pub fn header_len(&self) -> usize {
        self.l4_offset + self.tcp_header_len
    }

    fn addrs<'a>(&self, frame: &'a [u8]) -> (&'a [u8], &'a [u8]) {
        let (offset, len) = if self.is_v6 {
            (self.l3_offset + IPV6_SRC_ADDR_OFFSET, 16)
        } else {
            (self.l3_offset + IPV4_SRC_ADDR_OFFSET, 4)
        };
        (
            &frame[offset..offset + len],
            &frame[offset + len..offset + 2 * len],
        )
    }

    /// Rewrites the IP length field(s) for a TCP payload of `payload_len`
    /// bytes, refreshing the IPv4 header checksum.
    pub(crate) fn set_payload_len(&self, frame: &mut [u8], payload_len: usize) {
        let l3 = self.l3_offset;
        let tcp_len = self.tcp_header_len + payload_len;
        if self.is_v6 {
            BigEndian::write_u16(&mut frame[l3 + 4..l3 + 6], tcp_len as u16);
        } else {
            let total = (self.l4_offset - l3) + tcp_len;
            BigEndian::write_u16(&mut frame[l3 + 2..l3 + 4], total as u16);
            frame[l3 + IPV4_CSUM_OFFSET] = 0;
            frame[l3 + IPV4_CSUM_OFFSET + 1] = 0;
            let csum = !checksum(&frame[l3..self.l4_offset], 0);
            BigEndian::write_u16(&mut frame[l3 + IPV4_CSUM_OFFSET..], csum);
        }
    }

    pub(crate) fn set_ack_window(&self, frame: &mut [u8], ack: SeqNumber, window: u16) {
        let l4 = self.l4_offset;
        BigEndian::write_u32(&mut frame[l4 + TCP_ACK_OFFSET..], ack.0);
        BigEndian::write_u16(&mut frame[l4 + TCP_WINDOW_OFFSET..], window);
    }

    pub(crate) fn set_timestamp(&self, frame: &mut [u8], ts: TcpTimestamp) {
        if self.tcp_header_len != TCP_HDR_LEN + TCP_TS_OPTIONS_LEN {
            return;
        }
        let at = self.l4_offset + TCP_HDR_LEN + 4;
        BigEndian::write_u32(&mut frame[at..], ts.value);
        BigEndian::write_u32(&mut frame[at + 4..], ts.echo);
    }

    pub(crate) fn add_flags(&self, frame: &mut [u8], flags: TcpFlags) {
        frame[self.l4_offset + TCP_FLAGS_OFFSET] |= flags.bits();
    }

    /// Recomputes the TCP checksum. `frame` holds the headers and the first
    /// payload; `rest` is the remaining payload, `payload_len` the total.
    pub(crate) fn set_tcp_checksum(&self, frame: &mut [u8], rest: &[Bytes], payload_len: usize) {
        let l4 = self.l4_offset;
        frame[l4 + TCP_CSUM_OFFSET] = 0;
        frame[l4 + TCP_CSUM_OFFSET + 1] = 0;
        let tcp_len = (self.tcp_header_len + payload_len) as u16;
        let (src, dst) = self.addrs(frame);
        let pseudo = pseudo_header_checksum_no_fold(IPPROTO_TCP, src, dst, tcp_len);
        let parts = std::iter::once(&frame[l4..]).chain(rest.iter().map(|part| part.as_ref()));
        let sum = checksum_no_fold_parts(parts, pseudo);
        BigEndian::write_u16(&mut frame[l4 + TCP_CSUM_OFFSET..], !fold(sum));
    }
}

/// A classified TCP segment: its flow and the header fields the engine
/// decides on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub key: FlowKey,
    pub layout: HeaderLayout,
    /// Length of the frame up to the end of the IP datagram. Link-layer
    /// padding beyond it is not part of the segment.
    pub frame_len: usize,
    pub seq: SeqNumber,
    pub ack: SeqNumber,
    pub window: u16,
    pub flags: TcpFlags,
    pub options: TcpOptions,
    pub ip: IpSignature,
    pub payload_len: usize,
}

impl Segment {
    pub fn payload_range(&self) -> Range<usize> {
        self.layout.header_len()..self.frame_len
    }

    /// No payload and nothing but acknowledgement-class flags.
    pub fn is_pure_ack(&self) -> bool {
        self.payload_len == 0
            && self.flags.contains(TcpFlags::ACK)
            && (TcpFlags::ACK | TcpFlags::PSH | TcpFlags::ECE | TcpFlags::CWR).contains(self.flags)
    }

    /// Whether the segment may take part in any aggregation at all.
    pub fn is_mergeable(&self) -> bool {
        self.flags.contains(TcpFlags::ACK)
            && !self.flags.intersects(TcpFlags::CONTROL)
            && self.options != TcpOptions::Other
    }

    pub fn next_seq(&self) -> SeqNumber {
        self.seq + self.payload_len
    }

    /// Verifies the IPv4 header checksum and the TCP checksum.
    pub fn checksums_valid(&self, frame: &[u8]) -> bool {
        let l3 = self.layout.l3_offset;
        let l4 = self.layout.l4_offset;
        if !self.layout.is_v6 && checksum(&frame[l3..l4], 0) != 0xffff {
            return false;
        }
        let (src, dst) = self.layout.addrs(frame);
        let tcp_len = (self.frame_len - l4) as u16;
        let pseudo = pseudo_header_checksum_no_fold(IPPROTO_TCP, src, dst, tcp_len);
        fold(checksum_no_fold(&frame[l4..self.frame_len], pseudo)) == 0xffff
    }
}

/// Classifies a frame into a TCP segment, or says why it cannot be one the
/// engine handles.
pub fn classify(frame: &[u8], layer: Layer) -> Result<Segment, Ineligible> {
    let (l3, ether_type, vlan) = match layer {
        Layer::L2 => {
            if frame.len() < ETHER_HDR_LEN {
                return Err(Ineligible::Truncated);
            }
            let ether_type = BigEndian::read_u16(&frame[12..]);
            if ether_type == ETHERTYPE_VLAN {
                if frame.len() < ETHER_HDR_LEN + VLAN_TAG_LEN {
                    return Err(Ineligible::Truncated);
                }
                let tci = BigEndian::read_u16(&frame[14..]);
                let inner = BigEndian::read_u16(&frame[16..]);
                (ETHER_HDR_LEN + VLAN_TAG_LEN, inner, Some(tci & 0x0fff))
            } else {
                (ETHER_HDR_LEN, ether_type, None)
            }
        }
        Layer::L3 => match frame.first().map(|b| b >> 4) {
            None => return Err(Ineligible::Truncated),
            Some(4) => (0, ETHERTYPE_IPV4, None),
            Some(6) => (0, ETHERTYPE_IPV6, None),
            Some(_) => return Err(Ineligible::NotIp),
        },
    };

    let (ip, frame_len, l4, src, dst) = match ether_type {
        ETHERTYPE_IPV4 => parse_ipv4(frame, l3)?,
        ETHERTYPE_IPV6 => parse_ipv6(frame, l3)?,
        _ => return Err(Ineligible::NotIp),
    };
    let is_v6 = ether_type == ETHERTYPE_IPV6;

    if frame_len < l4 + TCP_HDR_LEN {
        return Err(Ineligible::Truncated);
    }
    let tcp = &frame[l4..frame_len];
    let tcp_header_len = ((tcp[12] >> 4) as usize) * 4;
    if tcp_header_len < TCP_HDR_LEN {
        return Err(Ineligible::BadLength);
    }
    if tcp_header_len > tcp.len() {
        return Err(Ineligible::Truncated);
    }
    let options = match tcp_header_len - TCP_HDR_LEN {
        0 => TcpOptions::None,
        TCP_TS_OPTIONS_LEN if BigEndian::read_u32(&tcp[TCP_HDR_LEN..]) == TCP_TS_OPTION_PREFIX => {
            TcpOptions::Timestamp(TcpTimestamp {
                value: BigEndian::read_u32(&tcp[TCP_HDR_LEN + 4..]),
                echo: BigEndian::read_u32(&tcp[TCP_HDR_LEN + 8..]),
            })
        }
        _ => TcpOptions::Other,
    };

    Ok(Segment {
        key: FlowKey {
            ether_type,
            vlan,
            src_addr: src,
            dst_addr: dst,
            src_port: BigEndian::read_u16(&tcp[0..]),
            dst_port: BigEndian::read_u16(&tcp[2..]),
        },
        layout: HeaderLayout {
            l3_offset: l3,
            l4_offset: l4,
            tcp_header_len,
            is_v6,
        },
        frame_len,
        seq: SeqNumber(BigEndian::read_u32(&tcp[TCP_SEQ_OFFSET..])),
        ack: SeqNumber(BigEndian::read_u32(&tcp[TCP_ACK_OFFSET..])),
        window: BigEndian::read_u16(&tcp[TCP_WINDOW_OFFSET..]),
        flags: TcpFlags::from_bits_retain(tcp[TCP_FLAGS_OFFSET]),
        options,
        ip,
        payload_len: tcp.len() - tcp_header_len,
    })
}

type IpParse = (IpSignature, usize, usize, IpAddr, IpAddr);

fn parse_ipv4(frame: &[u8], l3: usize) -> Result<IpParse, Ineligible> {
    if frame.len() < l3 + IPV4_HDR_LEN {
        return Err(Ineligible::Truncated);
    }
    let iph = &frame[l3..];
    if iph[0] >> 4 != 4 {
        return Err(Ineligible::NotIp);
    }
    let ihl = ((iph[0] & 0x0f) as usize) * 4;
    if ihl < IPV4_HDR_LEN {
        return Err(Ineligible::BadLength);
    }
    if ihl != IPV4_HDR_LEN {
        return Err(Ineligible::IpOptions);
    }
    if iph[9] != IPPROTO_TCP {
        return Err(Ineligible::NotTcp);
    }
    let frag = BigEndian::read_u16(&iph[6..]);
    if frag & IPV4_FLAG_MF != 0 || frag & IPV4_FRAG_OFFSET_MASK != 0 {
        return Err(Ineligible::Fragment);
    }
    let total_len = BigEndian::read_u16(&iph[2..]) as usize;
    if total_len < ihl {
        return Err(Ineligible::BadLength);
    }
    if l3 + total_len > frame.len() {
        return Err(Ineligible::Truncated);
    }
    let src = Ipv4Addr::new(iph[12], iph[13], iph[14], iph[15]);
    let dst = Ipv4Addr::new(iph[16], iph[17], iph[18], iph[19]);
    let ip = IpSignature {
        codepoint: iph[1],
        ttl: iph[8],
        dont_fragment: frag & IPV4_FLAG_DF != 0,
    };
    Ok((ip, l3 + total_len, l3 + ihl, src.into(), dst.into()))
}

fn parse_ipv6(frame: &[u8], l3: usize) -> Result<IpParse, Ineligible> {
    if frame.len() < l3 + IPV6_HDR_LEN {
        return Err(Ineligible::Truncated);
    }
    let iph = &frame[l3..];
    if iph[0] >> 4 != 6 {
        return Err(Ineligible::NotIp);
    }
    match iph[6] {
        IPPROTO_TCP => {}
        IPV6_NEXT_HEADER_FRAGMENT => return Err(Ineligible::Fragment),
        nh if IPV6_EXTENSION_HEADERS.contains(&nh) => return Err(Ineligible::ExtensionHeader),
        _ => return Err(Ineligible::NotTcp),
    }
    let payload_len = BigEndian::read_u16(&iph[4..]) as usize;
    if l3 + IPV6_HDR_LEN + payload_len > frame.len() {
        return Err(Ineligible::Truncated);
    }
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&iph[8..24]);
    dst.copy_from_slice(&iph[24..40]);
    let ip = IpSignature {
        codepoint: (iph[0] << 4) | (iph[1] >> 4),
        ttl: iph[7],
        dont_fragment: false,
    };
    Ok((
        ip,
        l3 + IPV6_HDR_LEN + payload_len,
        l3 + IPV6_HDR_LEN,
        Ipv6Addr::from(src).into(),
        Ipv6Addr::from(dst).into(),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::FrameSpec;

    #[test]
    fn classify_ipv4_data_segment() {
        let frame = FrameSpec::v4(1000, 100).build();
        let seg = classify(&frame, Layer::L2).unwrap();
        assert_eq!(seg.key.ether_type, ETHERTYPE_IPV4);
        assert_eq!(seg.key.src_port, 40000);
        assert_eq!(seg.key.dst_port, 80);
        assert_eq!(seg.seq, SeqNumber(1000));
        assert_eq!(seg.payload_len, 100);
        assert_eq!(seg.layout.l4_offset, 34);
        assert_eq!(seg.options, TcpOptions::None);
        assert!(seg.is_mergeable());
        assert!(!seg.is_pure_ack());
        assert!(seg.checksums_valid(&frame));
    }

    #[test]
    fn classify_timestamped_ipv6_over_vlan() {
        let mut spec = FrameSpec::v6(7, 10);
        spec.vlan = Some(42);
        spec.timestamp = Some(TcpTimestamp { value: 5, echo: 9 });
        let frame = spec.build();
        let seg = classify(&frame, Layer::L2).unwrap();
        assert_eq!(seg.key.vlan, Some(42));
        assert_eq!(seg.key.ether_type, ETHERTYPE_IPV6);
        assert_eq!(seg.layout.l3_offset, 18);
        assert_eq!(seg.layout.tcp_header_len, 32);
        assert_eq!(seg.options.timestamp(), Some(TcpTimestamp { value: 5, echo: 9 }));
        assert!(seg.checksums_valid(&frame));
    }

    #[test]
    fn trailing_padding_is_not_payload() {
        let mut frame = FrameSpec::v4(1, 0).build();
        frame.extend_from_slice(&[0u8; 6]);
        let seg = classify(&frame, Layer::L2).unwrap();
        assert_eq!(seg.payload_len, 0);
        assert_eq!(seg.frame_len, frame.len() - 6);
        assert!(seg.is_pure_ack());
    }

    #[test]
    fn rejects() {
        let frame = FrameSpec::v4(1, 10).build();
        assert_eq!(classify(&frame[..30], Layer::L2), Err(Ineligible::Truncated));
        assert_eq!(classify(&[], Layer::L3), Err(Ineligible::Truncated));

        let mut udp = frame.clone();
        udp[14 + 9] = libc::IPPROTO_UDP as u8;
        assert_eq!(classify(&udp, Layer::L2), Err(Ineligible::NotTcp));

        let mut frag = frame.clone();
        frag[14 + 6] |= 0x20;
        assert_eq!(classify(&frag, Layer::L2), Err(Ineligible::Fragment));

        let mut opts = frame.clone();
        opts[14] = 0x46;
        assert_eq!(classify(&opts, Layer::L2), Err(Ineligible::IpOptions));

        let mut arp = frame.clone();
        arp[12] = 0x08;
        arp[13] = 0x06;
        assert_eq!(classify(&arp, Layer::L2), Err(Ineligible::NotIp));

        let mut v6 = FrameSpec::v6(1, 10).build();
        v6[14 + 6] = 0;
        assert_eq!(classify(&v6, Layer::L2), Err(Ineligible::ExtensionHeader));
    }

    #[test]
    fn unsupported_tcp_options_are_classified_but_not_mergeable() {
        let mut spec = FrameSpec::v4(1, 10);
        spec.raw_options = Some(vec![2, 4, 0x05, 0xb4]);
        let seg = classify(&spec.build(), Layer::L2).unwrap();
        assert_eq!(seg.options, TcpOptions::Other);
        assert!(!seg.is_mergeable());
    }

    #[test]
    fn control_flags_are_not_mergeable() {
        let mut spec = FrameSpec::v4(1, 10);
        spec.flags = TcpFlags::ACK | TcpFlags::FIN;
        assert!(!classify(&spec.build(), Layer::L2).unwrap().is_mergeable());
        spec.flags = TcpFlags::ACK | TcpFlags::PSH;
        assert!(classify(&spec.build(), Layer::L2).unwrap().is_mergeable());
        spec.flags = TcpFlags::ACK | TcpFlags::URG;
        assert!(!classify(&spec.build(), Layer::L2).unwrap().is_mergeable());
    }

    #[test]
    fn raw_ip_frames() {
        let mut spec = FrameSpec::v4(1, 10);
        spec.layer = Layer::L3;
        let frame = spec.build();
        let seg = classify(&frame, Layer::L3).unwrap();
        assert_eq!(seg.layout.l3_offset, 0);
        assert_eq!(seg.layout.l4_offset, 20);
        assert_eq!(classify(&[0x10], Layer::L3), Err(Ineligible::NotIp));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut frame = FrameSpec::v4(1, 10).build();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let seg = classify(&frame, Layer::L2).unwrap();
        assert!(!seg.checksums_valid(&frame));
    }
}
