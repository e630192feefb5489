//! ACK compression: pure ACKs of a tracked flow are kept as compact records
//! instead of as frames.

use crate::flow::FlowKey;
use crate::packet::{ConnId, PacketMeta, TimestampSource};
use crate::wire::{Segment, TcpFlags, TcpTimestamp};

/// Records preallocated per batch; the batch grows up to the ack limit.
const ACK_BATCH_PREALLOC: usize = 32;

/// Origin of the time stamped on an [`AckRecord`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TimestampProvenance {
    Hardware,
    Software,
    /// No receive timestamp came with the frame; the engine's clock was used.
    Synthesized,
}

impl From<TimestampSource> for TimestampProvenance {
    fn from(value: TimestampSource) -> Self {
        match value {
            TimestampSource::Hardware => TimestampProvenance::Hardware,
            TimestampSource::Software => TimestampProvenance::Software,
        }
    }
}

/// One compressed pure ACK.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AckRecord {
    /// Receive time in nanoseconds.
    pub time: u64,
    pub provenance: TimestampProvenance,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
    /// TCP timestamp option, when the segment carried one.
    pub timestamp: Option<TcpTimestamp>,
    /// IPv4 TOS / IPv6 traffic class byte, ECN bits included.
    pub codepoint: u8,
    pub flags: TcpFlags,
    /// Left zero for the consuming stack to annotate.
    pub class: u8,
}

impl AckRecord {
    pub(crate) fn new(seg: &Segment, time: u64, provenance: TimestampProvenance) -> Self {
        AckRecord {
            time,
            provenance,
            seq: seg.seq.0,
            ack: seg.ack.0,
            window: seg.window,
            timestamp: seg.options.timestamp(),
            codepoint: seg.ip.codepoint,
            flags: seg.flags,
            class: 0,
        }
    }
}

/// The compressed ACKs of one flow, in arrival order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AckBatch {
    pub key: FlowKey,
    pub conn: Option<ConnId>,
    pub meta: PacketMeta,
    pub records: Vec<AckRecord>,
}

impl AckBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest acknowledgement number in the batch.
    pub fn last_ack(&self) -> Option<u32> {
        self.records.last().map(|r| r.ack)
    }
}

pub(crate) struct AckAccum {
    meta: PacketMeta,
    records: Vec<AckRecord>,
}

impl AckAccum {
    pub(crate) fn new(meta: PacketMeta, limit: usize) -> Self {
        AckAccum {
            meta,
            records: Vec::with_capacity(limit.min(ACK_BATCH_PREALLOC)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Appends `seg` as a record when it is a pure ACK and the batch is
    /// below `limit`. Returns false otherwise; the caller then flushes.
    pub(crate) fn try_compress(
        &mut self,
        seg: &Segment,
        time: u64,
        provenance: TimestampProvenance,
        limit: usize,
    ) -> bool {
        if !seg.is_pure_ack() || self.records.len() >= limit {
            return false;
        }
        self.records.push(AckRecord::new(seg, time, provenance));
        true
    }

    pub(crate) fn finish(self, key: FlowKey, conn: Option<ConnId>) -> AckBatch {
        AckBatch {
            key,
            conn,
            meta: self.meta,
            records: self.records,
        }
    }
}
