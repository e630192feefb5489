use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use tcp_lro::checksum::{checksum, checksum_no_fold, fold, pseudo_header_checksum_no_fold};
use tcp_lro::{BoxError, Delivery, DeliverFn, Layer, LroBuilder, Packet, TcpFlags};

const SRC: [u8; 4] = [10, 0, 0, 12];
const DST: [u8; 4] = [10, 0, 0, 13];

/// A raw IPv4 TCP segment as a TUN device would hand it over.
fn segment(src_port: u16, seq: u32, ack: u32, flags: TcpFlags, payload_len: usize) -> Vec<u8> {
    let tcp_len = 20 + payload_len;
    let mut frame = vec![0u8; 20 + tcp_len];
    frame[0] = 0x45;
    let frame_len = frame.len() as u16;
    BigEndian::write_u16(&mut frame[2..], frame_len);
    BigEndian::write_u16(&mut frame[6..], 0x4000);
    frame[8] = 64;
    frame[9] = libc::IPPROTO_TCP as u8;
    frame[12..16].copy_from_slice(&SRC);
    frame[16..20].copy_from_slice(&DST);
    let csum = !checksum(&frame[..20], 0);
    BigEndian::write_u16(&mut frame[10..], csum);

    let tcp = &mut frame[20..];
    BigEndian::write_u16(&mut tcp[0..], src_port);
    BigEndian::write_u16(&mut tcp[2..], 443);
    BigEndian::write_u32(&mut tcp[4..], seq);
    BigEndian::write_u32(&mut tcp[8..], ack);
    tcp[12] = 5 << 4;
    tcp[13] = flags.bits();
    BigEndian::write_u16(&mut tcp[14..], 65535);
    for (i, b) in tcp[20..].iter_mut().enumerate() {
        *b = i as u8;
    }
    let pseudo = pseudo_header_checksum_no_fold(frame[9], &SRC, &DST, tcp_len as u16);
    let csum = !fold(checksum_no_fold(&frame[20..], pseudo));
    BigEndian::write_u16(&mut frame[36..], csum);
    frame
}

fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let mut lro = LroBuilder::new()
        .entries(4)
        .layer(Layer::L3)
        .ack_limit(16)
        .build(DeliverFn(|delivery: Delivery| match delivery {
            Delivery::Segment(agg) => println!(
                "segment {}:{} seq {} ack {} {} bytes from {} frames",
                agg.key.src_addr, agg.key.src_port, agg.seq, agg.ack, agg.payload_len, agg.segments
            ),
            Delivery::Acks(batch) => println!(
                "acks {}:{} x{} up to {:?}",
                batch.key.src_addr,
                batch.key.src_port,
                batch.len(),
                batch.last_ack()
            ),
            Delivery::Unmodified(pkt) => println!("unmodified {} bytes", pkt.len()),
        }))?;

    let mss = 1448;
    let start = Instant::now();
    let mut now = start;
    let mut seqs = [0u32; 3];
    for round in 0..24u32 {
        for (flow, seq) in seqs.iter_mut().enumerate() {
            let port = 50000 + flow as u16;
            let frame = if flow == 2 {
                segment(port, 1, round + 1, TcpFlags::ACK, 0)
            } else {
                segment(port, *seq, 1, TcpFlags::ACK, mss)
            };
            *seq = seq.wrapping_add(mss as u32);
            if let tcp_lro::Disposition::NotEligible(_) = lro.rx_at(Packet::from(frame), now) {
                println!("not eligible");
            }
        }
        if round == 11 {
            // Loss on the first flow: a segment from the future.
            let frame = segment(50000, seqs[0].wrapping_add(10 * mss as u32), 1, TcpFlags::ACK, mss);
            let _ = lro.rx_at(Packet::from(frame), now);
        }
        now += Duration::from_micros(100);
        lro.flush_inactive(now);
    }
    let fin = segment(50001, seqs[1], 1, TcpFlags::ACK | TcpFlags::FIN, 0);
    let _ = lro.rx_at(Packet::from(fin), now);
    lro.flush_all();

    let stats = lro.stats();
    println!("{stats:?}");
    println!("replayed in {:?}", start.elapsed());
    Ok(())
}
