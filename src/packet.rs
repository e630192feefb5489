use bytes::BytesMut;

/// Where a receive timestamp came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TimestampSource {
    /// Stamped by the NIC.
    Hardware,
    /// Stamped by the driver when the frame was pulled off the ring.
    Software,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RxTimestamp {
    pub nanos: u64,
    pub source: TimestampSource,
}

/// Opaque reference to the connection a frame belongs to, if the driver
/// already knows it. The engine carries it along and never dereferences it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConnId(pub u64);

/// Receive metadata attached to a frame by the driver.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PacketMeta {
    /// Hardware (RSS) flow hash. Only used to group frames in a batch; flow
    /// lookup always hashes the headers.
    pub flow_hash: Option<u32>,
    /// The hardware validated the IP header and TCP checksums.
    pub csum_verified: bool,
    pub rx_time: Option<RxTimestamp>,
    pub conn: Option<ConnId>,
}

/// A received frame. Handing a `Packet` to the engine transfers ownership of
/// its buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub data: BytesMut,
    pub meta: PacketMeta,
}

impl Packet {
    pub fn new(data: impl Into<BytesMut>) -> Self {
        Packet {
            data: data.into(),
            meta: PacketMeta::default(),
        }
    }

    pub fn with_meta(data: impl Into<BytesMut>, meta: PacketMeta) -> Self {
        Packet {
            data: data.into(),
            meta,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for Packet {
    fn from(value: Vec<u8>) -> Self {
        Packet::new(&value[..])
    }
}
