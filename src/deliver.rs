use crate::ack::AckBatch;
use crate::flow::FlowKey;
use crate::packet::{ConnId, Packet, PacketMeta};
use crate::seq::SeqNumber;
use crate::wire::{HeaderLayout, TcpTimestamp};
use bytes::{Bytes, BytesMut};

/// A coalesced segment: one header describing the whole run, followed by
/// the payload of every merged segment in arrival order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Aggregate {
    pub key: FlowKey,
    pub conn: Option<ConnId>,
    /// Metadata of the first frame. `csum_verified` is set whenever the
    /// checksums are known good, including after header synthesis.
    pub meta: PacketMeta,
    pub layout: HeaderLayout,
    /// `chain[0]` is the first frame (headers and its payload); every
    /// further element is payload only.
    pub chain: Vec<Bytes>,
    pub payload_len: usize,
    /// Number of segments merged.
    pub segments: u32,
    pub seq: SeqNumber,
    pub ack: SeqNumber,
    pub window: u16,
    pub timestamp: Option<TcpTimestamp>,
}

impl Aggregate {
    /// The synthesised headers.
    pub fn header(&self) -> &[u8] {
        &self.chain[0][..self.layout.header_len()]
    }

    /// Payload slices in sequence order.
    pub fn payload(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let first = &self.chain[0][self.layout.header_len()..];
        std::iter::once(first).chain(self.chain[1..].iter().map(|part| part.as_ref()))
    }

    pub fn next_seq(&self) -> SeqNumber {
        self.seq + self.payload_len
    }

    /// Copies the chain into one contiguous frame.
    pub fn to_packet(&self) -> Packet {
        let len = self.layout.header_len() + self.payload_len;
        let mut data = BytesMut::with_capacity(len);
        for part in &self.chain {
            data.extend_from_slice(part);
        }
        Packet::with_meta(data, self.meta)
    }
}

/// What a flush hands upstream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Delivery {
    Segment(Aggregate),
    Acks(AckBatch),
    /// A frame the engine accepted but passed on untouched, after whatever
    /// its flow had pending.
    Unmodified(Packet),
}

/// The consumer of flushed work, normally the host stack's input routine.
/// Ownership of every delivery passes to the consumer.
pub trait Upstream {
    fn deliver(&mut self, delivery: Delivery);
}

impl Upstream for Vec<Delivery> {
    fn deliver(&mut self, delivery: Delivery) {
        self.push(delivery);
    }
}

impl<U: Upstream + ?Sized> Upstream for &mut U {
    fn deliver(&mut self, delivery: Delivery) {
        (**self).deliver(delivery)
    }
}

impl<U: Upstream + ?Sized> Upstream for Box<U> {
    fn deliver(&mut self, delivery: Delivery) {
        (**self).deliver(delivery)
    }
}

/// Adapts a closure into an [`Upstream`].
pub struct DeliverFn<F>(pub F);

impl<F: FnMut(Delivery)> Upstream for DeliverFn<F> {
    fn deliver(&mut self, delivery: Delivery) {
        (self.0)(delivery)
    }
}
