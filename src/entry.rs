use crate::ack::{AckAccum, TimestampProvenance};
use crate::builder::{LroConfig, MergePolicy};
use crate::deliver::Aggregate;
use crate::flow::FlowKey;
use crate::list::{Link, Membership};
use crate::packet::{ConnId, Packet, PacketMeta, TimestampSource};
use crate::seq::{tstmp_lt, SeqNumber};
use crate::wire::{HeaderLayout, IpSignature, Segment, TcpFlags, TcpTimestamp};
use bytes::{Bytes, BytesMut};
use std::time::Instant;

/// Index of an entry in the controller's arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct EntryId(u32);

impl EntryId {
    pub(crate) fn new(index: usize) -> Self {
        EntryId(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One slot of the aggregation pool.
pub(crate) struct LroEntry {
    /// Set while the entry is active.
    pub(crate) key: Option<FlowKey>,
    pub(crate) hash: u32,
    pub(crate) conn: Option<ConnId>,
    pub(crate) accum: Accum,
    pub(crate) touched: Option<Instant>,
    /// Creation order, for [`EvictionPolicy::OldestCreated`](crate::EvictionPolicy).
    pub(crate) created: u64,
    queue_link: Link,
    bucket_link: Link,
}

impl LroEntry {
    pub(crate) fn new() -> Self {
        LroEntry {
            key: None,
            hash: 0,
            conn: None,
            accum: Accum::Idle,
            touched: None,
            created: 0,
            queue_link: Link::default(),
            bucket_link: Link::default(),
        }
    }

    pub(crate) fn link(&self, m: Membership) -> &Link {
        match m {
            Membership::Queue => &self.queue_link,
            Membership::Bucket => &self.bucket_link,
        }
    }

    pub(crate) fn link_mut(&mut self, m: Membership) -> &mut Link {
        match m {
            Membership::Queue => &mut self.queue_link,
            Membership::Bucket => &mut self.bucket_link,
        }
    }

    /// Forgets the flow. Links are managed by the owning lists.
    pub(crate) fn clear(&mut self) {
        debug_assert!(
            matches!(self.accum, Accum::Idle),
            "releasing an entry that still holds unflushed data"
        );
        self.key = None;
        self.hash = 0;
        self.conn = None;
        self.accum = Accum::Idle;
        self.touched = None;
    }
}

/// What an entry is accumulating. Data and compressed ACKs never mix.
#[derive(Default)]
pub(crate) enum Accum {
    #[default]
    Idle,
    Data(DataAccum),
    Acks(AckAccum),
}

/// How an arriving segment relates to the state its flow already holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Verdict {
    /// Extend the current accumulation.
    Append,
    /// Flush, then start a new accumulation with the segment.
    Restart,
    /// Flush, then pass the segment on untouched.
    Deliver,
}

impl Accum {
    pub(crate) fn verdict(&self, seg: &Segment, config: &LroConfig) -> Verdict {
        match self {
            Accum::Idle => Verdict::Restart,
            Accum::Acks(acks) => {
                if seg.is_pure_ack() && acks.len() < config.ack_limit {
                    Verdict::Append
                } else {
                    Verdict::Restart
                }
            }
            Accum::Data(data) => {
                if seg.payload_len == 0 {
                    Verdict::Restart
                } else {
                    data.verdict(seg, config)
                }
            }
        }
    }
}

/// A run of in-order data segments sharing one header.
pub(crate) struct DataAccum {
    /// First frame, trimmed to its IP datagram.
    head: BytesMut,
    /// Payload of every later segment; their headers are dropped.
    tail: Vec<Bytes>,
    layout: HeaderLayout,
    meta: PacketMeta,
    seq: SeqNumber,
    next_seq: SeqNumber,
    ack: SeqNumber,
    window: u16,
    timestamp: Option<TcpTimestamp>,
    ts_source: Option<TimestampSource>,
    ip: IpSignature,
    ecn_flags: TcpFlags,
    payload_len: usize,
    first_len: usize,
    segments: u32,
    stripped: u32,
    push: bool,
}

fn ecn_flags(flags: TcpFlags) -> TcpFlags {
    flags & (TcpFlags::ECE | TcpFlags::CWR)
}

impl DataAccum {
    /// Starts a run with a segment whose checksums are known good.
    pub(crate) fn start(pkt: Packet, seg: &Segment) -> Self {
        let Packet { mut data, mut meta } = pkt;
        data.truncate(seg.frame_len);
        meta.csum_verified = true;
        DataAccum {
            head: data,
            tail: Vec::new(),
            layout: seg.layout,
            meta,
            seq: seg.seq,
            next_seq: seg.next_seq(),
            ack: seg.ack,
            window: seg.window,
            timestamp: seg.options.timestamp(),
            ts_source: meta.rx_time.map(|t| t.source),
            ip: seg.ip,
            ecn_flags: ecn_flags(seg.flags),
            payload_len: seg.payload_len,
            first_len: seg.payload_len,
            segments: 1,
            stripped: 0,
            push: seg.flags.contains(TcpFlags::PSH),
        }
    }

    fn head_payload(&self) -> &[u8] {
        &self.head[self.layout.header_len()..]
    }

    /// Payload of the most recently appended segment.
    pub(crate) fn last(&self) -> &[u8] {
        match self.tail.last() {
            Some(part) => part,
            None => self.head_payload(),
        }
    }

    /// Payload of the segment before the last one.
    pub(crate) fn prev_last(&self) -> Option<&[u8]> {
        match self.tail.len() {
            0 => None,
            1 => Some(self.head_payload()),
            n => Some(&self.tail[n - 2]),
        }
    }

    pub(crate) fn next_seq(&self) -> SeqNumber {
        self.next_seq
    }

    pub(crate) fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub(crate) fn segments(&self) -> u32 {
        self.segments
    }

    /// IP datagram length the synthesised header will announce.
    fn datagram_len(&self) -> usize {
        self.layout.header_len() - self.layout.l3_offset + self.payload_len
    }

    fn verdict(&self, seg: &Segment, config: &LroConfig) -> Verdict {
        if seg.seq != self.next_seq {
            // Out of order or retransmitted: the stack has to see it now.
            return Verdict::Deliver;
        }
        if seg.ack < self.ack {
            return Verdict::Deliver;
        }
        if seg.layout != self.layout {
            return Verdict::Restart;
        }
        match (self.timestamp, seg.options.timestamp()) {
            (None, None) => {}
            (Some(held), Some(new)) if !tstmp_lt(new.value, held.value) => {}
            _ => return Verdict::Restart,
        }
        if seg.ip != self.ip || ecn_flags(seg.flags) != self.ecn_flags {
            return Verdict::Restart;
        }
        // Only the final segment of a run may be short, and none may be
        // larger than the first.
        if self.last().len() < self.first_len || seg.payload_len > self.first_len {
            return Verdict::Restart;
        }
        if config.push_ends_aggregate && self.push {
            return Verdict::Restart;
        }
        if self.segments as usize >= config.ack_limit
            || self.datagram_len() + seg.payload_len > config.length_limit
        {
            return Verdict::Restart;
        }
        Verdict::Append
    }

    /// Appends the payload of `pkt`. Returns true when the run cannot take
    /// another full-sized segment and must be flushed now.
    pub(crate) fn append(&mut self, pkt: Packet, seg: &Segment, config: &LroConfig) -> bool {
        let range = seg.payload_range();
        let len = range.len();
        self.tail.push(pkt.data.freeze().slice(range));
        self.next_seq += len;
        self.payload_len += len;
        self.segments += 1;
        self.stripped += 1;
        self.push |= seg.flags.contains(TcpFlags::PSH);
        if config.merge_policy == MergePolicy::LastWriterWins {
            self.ack = seg.ack;
            self.window = seg.window;
            self.timestamp = seg.options.timestamp();
            if let Some(rx_time) = pkt.meta.rx_time {
                self.ts_source = Some(rx_time.source);
            }
        }
        self.segments as usize >= config.ack_limit
            || self.datagram_len() + self.first_len > config.length_limit
    }

    /// Synthesises the header for the whole run and hands out the chain.
    pub(crate) fn finish(self, key: FlowKey, conn: Option<ConnId>) -> Aggregate {
        debug_assert_eq!(
            self.head_payload().len() + self.tail.iter().map(Bytes::len).sum::<usize>(),
            self.payload_len,
            "payload chain out of sync with its tracked length"
        );
        let DataAccum {
            mut head,
            tail,
            layout,
            mut meta,
            seq,
            ack,
            window,
            timestamp,
            ts_source,
            payload_len,
            segments,
            push,
            stripped,
            ..
        } = self;
        if stripped > 0 {
            layout.set_payload_len(&mut head, payload_len);
            layout.set_ack_window(&mut head, ack, window);
            if let Some(ts) = timestamp {
                layout.set_timestamp(&mut head, ts);
            }
            if push {
                layout.add_flags(&mut head, TcpFlags::PSH);
            }
            layout.set_tcp_checksum(&mut head, &tail, payload_len);
        }
        if let (Some(rx_time), Some(source)) = (meta.rx_time.as_mut(), ts_source) {
            rx_time.source = source;
        }
        let mut chain = Vec::with_capacity(1 + tail.len());
        chain.push(head.freeze());
        chain.extend(tail);
        Aggregate {
            key,
            conn,
            meta,
            layout,
            chain,
            payload_len,
            segments,
            seq,
            ack,
            window,
            timestamp,
        }
    }
}

/// Receive time of a frame for an ACK record: the frame's own stamp when it
/// has one, the engine clock otherwise.
pub(crate) fn record_time(meta: &PacketMeta, synthesized: u64) -> (u64, TimestampProvenance) {
    match meta.rx_time {
        Some(t) => (t.nanos, t.source.into()),
        None => (synthesized, TimestampProvenance::Synthesized),
    }
}
