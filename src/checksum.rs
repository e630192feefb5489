//! Internet checksum (RFC 1071) helpers used to verify incoming segments and
//! to re-synthesise the headers of a merged aggregate.

use byteorder::{BigEndian, ByteOrder};

/// Sums `b` as big-endian 16-bit words on top of `initial` without folding.
///
/// A trailing odd byte is treated as the high half of a zero-padded word.
pub fn checksum_no_fold(b: &[u8], initial: u64) -> u64 {
    let mut ac = initial;
    let mut words = b.chunks_exact(4);
    for word in &mut words {
        ac += BigEndian::read_u32(word) as u64;
    }
    let rest = words.remainder();
    if rest.len() >= 2 {
        ac += BigEndian::read_u16(rest) as u64;
    }
    if rest.len() % 2 == 1 {
        ac += (rest[rest.len() - 1] as u64) << 8;
    }
    ac
}

/// Like [`checksum_no_fold`], but over a chain of buffers whose boundaries
/// may fall on odd offsets.
pub fn checksum_no_fold_parts<'a, I>(parts: I, initial: u64) -> u64
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut ac = initial;
    let mut carry: Option<u8> = None;
    for mut part in parts {
        if part.is_empty() {
            continue;
        }
        if let Some(high) = carry.take() {
            ac += ((high as u64) << 8) | part[0] as u64;
            part = &part[1..];
        }
        let even = part.len() & !1;
        ac = checksum_no_fold(&part[..even], ac);
        if even != part.len() {
            carry = Some(part[even]);
        }
    }
    if let Some(high) = carry {
        ac += (high as u64) << 8;
    }
    ac
}

/// Folds a 64-bit accumulator into the 16-bit one's complement sum.
pub fn fold(mut ac: u64) -> u16 {
    while ac > 0xffff {
        ac = (ac >> 16) + (ac & 0xffff);
    }
    ac as u16
}

pub fn checksum(b: &[u8], initial: u64) -> u16 {
    fold(checksum_no_fold(b, initial))
}

pub fn pseudo_header_checksum_no_fold(
    protocol: u8,
    src_addr: &[u8],
    dst_addr: &[u8],
    total_len: u16,
) -> u64 {
    let mut sum = checksum_no_fold(src_addr, 0);
    sum = checksum_no_fold(dst_addr, sum);
    sum += protocol as u64;
    sum + total_len as u64
}
