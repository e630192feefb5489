#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::tcp::TcpPacket;
use tcp_lro::{Delivery, Layer, LroBuilder, LroCtrl, Packet, TcpFlags, TcpTimestamp};

pub const SRC_V4: Ipv4Addr = Ipv4Addr::new(10, 26, 1, 100);
pub const DST_V4: Ipv4Addr = Ipv4Addr::new(10, 26, 1, 101);
pub const SRC_V6: Ipv6Addr = Ipv6Addr::new(0xcdcd, 0x910a, 0x2222, 0x5498, 0x8475, 0x1112, 0x1900, 0x2025);
pub const DST_V6: Ipv6Addr = Ipv6Addr::new(0xcdcd, 0x910a, 0x2222, 0x5498, 0x8475, 0x1112, 0x1900, 0x2024);

/// A raw IP TCP segment, as read from a TUN device.
#[derive(Clone, Debug)]
pub struct Tcp {
    pub v6: bool,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
    pub flags: TcpFlags,
    pub tos: u8,
    pub timestamp: Option<TcpTimestamp>,
    pub payload_len: usize,
}

impl Tcp {
    pub fn v4(src_port: u16, seq: u32, payload_len: usize) -> Self {
        Tcp {
            v6: false,
            src_port,
            dst_port: 8080,
            seq,
            ack: 1,
            window: 1024,
            flags: TcpFlags::ACK,
            tos: 0,
            timestamp: None,
            payload_len,
        }
    }

    pub fn v6(src_port: u16, seq: u32, payload_len: usize) -> Self {
        Tcp {
            v6: true,
            ..Tcp::v4(src_port, seq, payload_len)
        }
    }

    pub fn pure_ack(src_port: u16, ack: u32) -> Self {
        Tcp {
            ack,
            ..Tcp::v4(src_port, 0, 0)
        }
    }

    /// Payload byte `i` is the low byte of `seq + i`.
    pub fn payload(&self) -> Vec<u8> {
        (0..self.payload_len)
            .map(|i| self.seq.wrapping_add(i as u32) as u8)
            .collect()
    }

    pub fn build(&self) -> Vec<u8> {
        let opts_len = if self.timestamp.is_some() { 12 } else { 0 };
        let tcp_len = 20 + opts_len + self.payload_len;
        let mut tcp = vec![0u8; tcp_len];
        BigEndian::write_u16(&mut tcp[0..], self.src_port);
        BigEndian::write_u16(&mut tcp[2..], self.dst_port);
        BigEndian::write_u32(&mut tcp[4..], self.seq);
        BigEndian::write_u32(&mut tcp[8..], self.ack);
        tcp[12] = (((20 + opts_len) / 4) as u8) << 4;
        tcp[13] = self.flags.bits();
        BigEndian::write_u16(&mut tcp[14..], self.window);
        if let Some(ts) = self.timestamp {
            tcp[20..24].copy_from_slice(&[1, 1, 8, 10]);
            BigEndian::write_u32(&mut tcp[24..], ts.value);
            BigEndian::write_u32(&mut tcp[28..], ts.echo);
        }
        tcp[20 + opts_len..].copy_from_slice(&self.payload());

        let mut frame = if self.v6 {
            let mut iph = vec![0u8; 40];
            iph[0] = 0x60 | (self.tos >> 4);
            iph[1] = self.tos << 4;
            BigEndian::write_u16(&mut iph[4..], tcp_len as u16);
            iph[6] = libc::IPPROTO_TCP as u8;
            iph[7] = 64;
            iph[8..24].copy_from_slice(&SRC_V6.octets());
            iph[24..40].copy_from_slice(&DST_V6.octets());
            let csum = pnet_packet::tcp::ipv6_checksum(
                &TcpPacket::new(&tcp).expect("tcp header"),
                &SRC_V6,
                &DST_V6,
            );
            BigEndian::write_u16(&mut tcp[16..], csum);
            iph
        } else {
            let mut iph = vec![0u8; 20];
            iph[0] = 0x45;
            iph[1] = self.tos;
            BigEndian::write_u16(&mut iph[2..], (20 + tcp_len) as u16);
            BigEndian::write_u16(&mut iph[6..], 0x4000);
            iph[8] = 64;
            iph[9] = libc::IPPROTO_TCP as u8;
            iph[12..16].copy_from_slice(&SRC_V4.octets());
            iph[16..20].copy_from_slice(&DST_V4.octets());
            let csum = pnet_packet::ipv4::checksum(&Ipv4Packet::new(&iph).expect("ip header"));
            BigEndian::write_u16(&mut iph[10..], csum);
            let csum = pnet_packet::tcp::ipv4_checksum(
                &TcpPacket::new(&tcp).expect("tcp header"),
                &SRC_V4,
                &DST_V4,
            );
            BigEndian::write_u16(&mut tcp[16..], csum);
            iph
        };
        frame.extend_from_slice(&tcp);
        frame
    }

    pub fn packet(&self) -> Packet {
        Packet::from(self.build())
    }
}

pub fn lro(builder: LroBuilder) -> LroCtrl<Vec<Delivery>> {
    let _ = env_logger::builder().is_test(true).try_init();
    builder.layer(Layer::L3).build(Vec::new()).unwrap()
}
