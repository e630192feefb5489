use std::time::Duration;

use crate::deliver::Upstream;
use crate::error::{Error, Result};
use crate::lro::LroCtrl;
use crate::wire::Layer;

/// Entries per queue when none is configured.
pub const DEFAULT_ENTRIES: usize = 8;
/// Most segments (or compressed ACKs) one entry may hold.
pub const DEFAULT_ACK_LIMIT: usize = 65535;
/// Largest IP datagram an aggregate may describe.
pub const DEFAULT_LENGTH_LIMIT: usize = 65535;
pub const DEFAULT_INACTIVE_TIMEOUT: Duration = Duration::from_millis(1);

/// An IPv4 header plus a TCP header; nothing smaller can carry a segment.
const MIN_LENGTH_LIMIT: usize = 40;

/// Which segment's acknowledgement, window and timestamp option survive a
/// merge.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub enum MergePolicy {
    #[default]
    LastWriterWins,
    FirstWriterWins,
}

/// Which entry is reclaimed when the pool is exhausted.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub enum EvictionPolicy {
    /// The entry touched longest ago; among equals, the one touched first.
    #[default]
    LeastRecentlyTouched,
    /// The entry started longest ago.
    OldestCreated,
}

/// Tunables of one receive queue, fixed at creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LroConfig {
    /// Size of the entry pool.
    pub entries: usize,
    /// Hash table buckets.
    pub buckets: usize,
    /// Ceiling on segments merged into one aggregate and on ACK records in
    /// one batch.
    pub ack_limit: usize,
    /// Ceiling on the IP datagram length of an aggregate.
    pub length_limit: usize,
    /// Idle time after which [`LroCtrl::flush_inactive`] flushes an entry.
    pub inactive_timeout: Duration,
    /// Frames [`LroCtrl::queue`] may hold before processing them; zero
    /// processes every frame as it is queued.
    pub max_queued: usize,
    pub layer: Layer,
    pub ack_compression: bool,
    /// Verify checksums in software when the hardware has not. Frames with
    /// unverified checksums are never merged.
    pub verify_checksums: bool,
    /// Stop extending a run once a PSH segment joined it.
    pub push_ends_aggregate: bool,
    pub merge_policy: MergePolicy,
    pub eviction_policy: EvictionPolicy,
}

impl Default for LroConfig {
    fn default() -> Self {
        LroConfig {
            entries: DEFAULT_ENTRIES,
            buckets: DEFAULT_ENTRIES.next_power_of_two(),
            ack_limit: DEFAULT_ACK_LIMIT,
            length_limit: DEFAULT_LENGTH_LIMIT,
            inactive_timeout: DEFAULT_INACTIVE_TIMEOUT,
            max_queued: 0,
            layer: Layer::default(),
            ack_compression: true,
            verify_checksums: true,
            push_ends_aggregate: false,
            merge_policy: MergePolicy::default(),
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

impl LroConfig {
    pub fn validate(&self) -> Result<()> {
        if self.entries == 0 {
            return Err(Error::ZeroEntries);
        }
        u32::try_from(self.entries)?;
        if self.buckets == 0 {
            return Err(Error::ZeroBuckets);
        }
        if self.ack_limit == 0 {
            return Err(Error::InvalidConfig("ack limit must be positive"));
        }
        if self.length_limit > u16::MAX as usize {
            return Err(Error::LengthLimitTooLarge(self.length_limit));
        }
        if self.length_limit < MIN_LENGTH_LIMIT {
            return Err(Error::InvalidConfig("length limit below TCP/IP header size"));
        }
        Ok(())
    }
}

/// Builder for an [`LroCtrl`].
#[derive(Default)]
pub struct LroBuilder {
    entries: Option<usize>,
    buckets: Option<usize>,
    ack_limit: Option<usize>,
    length_limit: Option<usize>,
    inactive_timeout: Option<Duration>,
    max_queued: Option<usize>,
    layer: Option<Layer>,
    ack_compression: Option<bool>,
    verify_checksums: Option<bool>,
    push_ends_aggregate: Option<bool>,
    merge_policy: Option<MergePolicy>,
    eviction_policy: Option<EvictionPolicy>,
}

impl LroBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the entry pool. The bucket count defaults to this rounded up
    /// to a power of two.
    pub fn entries(mut self, entries: usize) -> Self {
        self.entries = Some(entries);
        self
    }

    pub fn buckets(mut self, buckets: usize) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn ack_limit(mut self, limit: usize) -> Self {
        self.ack_limit = Some(limit);
        self
    }

    pub fn length_limit(mut self, limit: usize) -> Self {
        self.length_limit = Some(limit);
        self
    }

    pub fn inactive_timeout(mut self, timeout: Duration) -> Self {
        self.inactive_timeout = Some(timeout);
        self
    }

    /// Enables batched submission through [`LroCtrl::queue`].
    pub fn max_queued(mut self, frames: usize) -> Self {
        self.max_queued = Some(frames);
        self
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layer = Some(layer);
        self
    }

    pub fn ack_compression(mut self, enable: bool) -> Self {
        self.ack_compression = Some(enable);
        self
    }

    pub fn verify_checksums(mut self, enable: bool) -> Self {
        self.verify_checksums = Some(enable);
        self
    }

    pub fn push_ends_aggregate(mut self, enable: bool) -> Self {
        self.push_ends_aggregate = Some(enable);
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = Some(policy);
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    /// Resolves defaults and validates.
    pub fn config(&self) -> Result<LroConfig> {
        let defaults = LroConfig::default();
        let entries = self.entries.unwrap_or(defaults.entries);
        let config = LroConfig {
            entries,
            buckets: self
                .buckets
                .unwrap_or_else(|| entries.max(1).next_power_of_two()),
            ack_limit: self.ack_limit.unwrap_or(defaults.ack_limit),
            length_limit: self.length_limit.unwrap_or(defaults.length_limit),
            inactive_timeout: self.inactive_timeout.unwrap_or(defaults.inactive_timeout),
            max_queued: self.max_queued.unwrap_or(defaults.max_queued),
            layer: self.layer.unwrap_or(defaults.layer),
            ack_compression: self.ack_compression.unwrap_or(defaults.ack_compression),
            verify_checksums: self.verify_checksums.unwrap_or(defaults.verify_checksums),
            push_ends_aggregate: self
                .push_ends_aggregate
                .unwrap_or(defaults.push_ends_aggregate),
            merge_policy: self.merge_policy.unwrap_or(defaults.merge_policy),
            eviction_policy: self.eviction_policy.unwrap_or(defaults.eviction_policy),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn build<U: Upstream>(self, upstream: U) -> Result<LroCtrl<U>> {
        LroCtrl::new(self.config()?, upstream)
    }
}
