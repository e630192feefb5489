/*!
Software large receive offload for TCP.

Frames pulled off a receive queue are handed to an [`LroCtrl`]. In-order
data segments of one flow are merged into a single large segment with a
re-synthesised header, runs of pure ACKs are compressed into compact
records, and everything else is handed back untouched. Merged work reaches
the host stack through an [`Upstream`] when an entry is flushed.

# Example:
```rust
use tcp_lro::{Delivery, Disposition, LroBuilder, Packet};

let mut lro = LroBuilder::new()
    .entries(8)
    .build(Vec::<Delivery>::new())?;

let mut ring: Vec<Vec<u8>> = Vec::new();
for frame in ring.drain(..) {
    if let Disposition::NotEligible(pkt) = lro.rx(Packet::from(frame)) {
        // normal input path
        drop(pkt);
    }
}
lro.flush_all();
for delivery in lro.upstream_mut().drain(..) {
    println!("{:?}", delivery);
}
# Ok::<(), tcp_lro::Error>(())
```
# Example batched:
```rust
use tcp_lro::{DeliverFn, Delivery, LroBuilder, Packet};

let mut lro = LroBuilder::new()
    .max_queued(64)
    .build(DeliverFn(|delivery: Delivery| println!("{:?}", delivery)))?;
lro.queue(Packet::from(vec![0u8; 60]));
lro.flush_all();
# Ok::<(), tcp_lro::Error>(())
```
*/

pub use crate::ack::{AckBatch, AckRecord, TimestampProvenance};
pub use crate::builder::*;
pub use crate::deliver::{Aggregate, DeliverFn, Delivery, Upstream};
pub use crate::entry::EntryId;
pub use crate::error::{BoxError, Error, Result};
pub use crate::flow::FlowKey;
pub use crate::lro::{Disposition, LroCtrl, LroStats};
pub use crate::packet::{ConnId, Packet, PacketMeta, RxTimestamp, TimestampSource};
pub use crate::seq::SeqNumber;
pub use crate::wire::{
    classify, HeaderLayout, Ineligible, IpSignature, Layer, Segment, TcpFlags, TcpOptions,
    TcpTimestamp,
};

mod ack;
mod builder;
pub mod checksum;
mod deliver;
mod entry;
mod error;
mod flow;
mod list;
mod lro;
mod packet;
mod seq;
pub mod wire;

#[cfg(test)]
mod testing;
