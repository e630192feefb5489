//! Frame construction for unit tests.

use crate::checksum::{checksum, checksum_no_fold, fold, pseudo_header_checksum_no_fold};
use crate::wire::{Layer, TcpFlags, TcpTimestamp, ETHERTYPE_IPV4, ETHERTYPE_IPV6, ETHERTYPE_VLAN};
use byteorder::{BigEndian, ByteOrder};

pub(crate) const SRC_V4: [u8; 4] = [10, 0, 0, 1];
pub(crate) const DST_V4: [u8; 4] = [10, 0, 0, 2];
pub(crate) const SRC_V6: [u8; 16] = [0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
pub(crate) const DST_V6: [u8; 16] = [0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2];

/// A TCP segment to be serialised with valid IP and TCP checksums. Payload
/// byte `i` is `seq + i`, so merged payloads can be checked for order.
#[derive(Clone, Debug)]
pub(crate) struct FrameSpec {
    pub(crate) v6: bool,
    pub(crate) layer: Layer,
    pub(crate) vlan: Option<u16>,
    pub(crate) src_port: u16,
    pub(crate) dst_port: u16,
    pub(crate) seq: u32,
    pub(crate) ack: u32,
    pub(crate) window: u16,
    pub(crate) flags: TcpFlags,
    pub(crate) tos: u8,
    pub(crate) ttl: u8,
    pub(crate) timestamp: Option<TcpTimestamp>,
    /// Options written verbatim instead of the timestamp; padded to a
    /// multiple of four with end-of-list.
    pub(crate) raw_options: Option<Vec<u8>>,
    pub(crate) payload_len: usize,
}

impl FrameSpec {
    pub(crate) fn v4(seq: u32, payload_len: usize) -> Self {
        FrameSpec {
            v6: false,
            layer: Layer::L2,
            vlan: None,
            src_port: 40000,
            dst_port: 80,
            seq,
            ack: 5000,
            window: 512,
            flags: TcpFlags::ACK,
            tos: 0,
            ttl: 64,
            timestamp: None,
            raw_options: None,
            payload_len,
        }
    }

    pub(crate) fn v6(seq: u32, payload_len: usize) -> Self {
        FrameSpec {
            v6: true,
            ..FrameSpec::v4(seq, payload_len)
        }
    }

    fn options(&self) -> Vec<u8> {
        if let Some(raw) = &self.raw_options {
            let mut opts = raw.clone();
            opts.resize(raw.len().div_ceil(4) * 4, 0);
            return opts;
        }
        match self.timestamp {
            Some(ts) => {
                let mut opts = vec![1, 1, 8, 10, 0, 0, 0, 0, 0, 0, 0, 0];
                BigEndian::write_u32(&mut opts[4..], ts.value);
                BigEndian::write_u32(&mut opts[8..], ts.echo);
                opts
            }
            None => Vec::new(),
        }
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut frame = Vec::new();
        if self.layer == Layer::L2 {
            frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0x02, 0x02, 0, 0, 0, 0, 0x01]);
            if let Some(vid) = self.vlan {
                frame.extend_from_slice(&ETHERTYPE_VLAN.to_be_bytes());
                frame.extend_from_slice(&vid.to_be_bytes());
            }
            let ether_type = if self.v6 { ETHERTYPE_IPV6 } else { ETHERTYPE_IPV4 };
            frame.extend_from_slice(&ether_type.to_be_bytes());
        }

        let opts = self.options();
        let tcp_len = 20 + opts.len() + self.payload_len;
        let l3 = frame.len();
        if self.v6 {
            let mut iph = [0u8; 40];
            iph[0] = 0x60 | (self.tos >> 4);
            iph[1] = self.tos << 4;
            BigEndian::write_u16(&mut iph[4..], tcp_len as u16);
            iph[6] = libc::IPPROTO_TCP as u8;
            iph[7] = self.ttl;
            iph[8..24].copy_from_slice(&SRC_V6);
            iph[24..40].copy_from_slice(&DST_V6);
            frame.extend_from_slice(&iph);
        } else {
            let mut iph = [0u8; 20];
            iph[0] = 0x45;
            iph[1] = self.tos;
            BigEndian::write_u16(&mut iph[2..], (20 + tcp_len) as u16);
            BigEndian::write_u16(&mut iph[6..], 0x4000);
            iph[8] = self.ttl;
            iph[9] = libc::IPPROTO_TCP as u8;
            iph[12..16].copy_from_slice(&SRC_V4);
            iph[16..20].copy_from_slice(&DST_V4);
            let csum = !checksum(&iph, 0);
            BigEndian::write_u16(&mut iph[10..], csum);
            frame.extend_from_slice(&iph);
        }

        let l4 = frame.len();
        let mut tcph = [0u8; 20];
        BigEndian::write_u16(&mut tcph[0..], self.src_port);
        BigEndian::write_u16(&mut tcph[2..], self.dst_port);
        BigEndian::write_u32(&mut tcph[4..], self.seq);
        BigEndian::write_u32(&mut tcph[8..], self.ack);
        tcph[12] = (((20 + opts.len()) / 4) as u8) << 4;
        tcph[13] = self.flags.bits();
        BigEndian::write_u16(&mut tcph[14..], self.window);
        frame.extend_from_slice(&tcph);
        frame.extend_from_slice(&opts);
        frame.extend((0..self.payload_len).map(|i| self.seq.wrapping_add(i as u32) as u8));

        let (src, dst): (&[u8], &[u8]) = if self.v6 {
            (&SRC_V6, &DST_V6)
        } else {
            (&SRC_V4, &DST_V4)
        };
        let pseudo =
            pseudo_header_checksum_no_fold(libc::IPPROTO_TCP as u8, src, dst, tcp_len as u16);
        let csum = !fold(checksum_no_fold(&frame[l4..], pseudo));
        BigEndian::write_u16(&mut frame[l4 + 16..], csum);
        debug_assert_eq!(frame.len(), l3 + (l4 - l3) + tcp_len);
        frame
    }
}
