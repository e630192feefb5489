//! The per-queue aggregation controller.

use std::time::{Duration, Instant};

use crate::ack::AckAccum;
use crate::builder::{EvictionPolicy, LroConfig};
use crate::deliver::{Delivery, Upstream};
use crate::entry::{record_time, Accum, DataAccum, EntryId, LroEntry, Verdict};
use crate::error::Result;
use crate::flow::FlowTable;
use crate::list::{List, Membership};
use crate::packet::Packet;
use crate::wire::{classify, Ineligible, Segment};

/// What became of a submitted frame.
#[derive(Debug)]
#[must_use]
pub enum Disposition {
    /// Held in an aggregation entry.
    Queued,
    /// Accepted and already delivered upstream, after anything its flow had
    /// pending.
    Flushed,
    /// Not handled; the frame is returned untouched for the normal input
    /// path, and no engine state changed.
    NotEligible(Packet),
}

impl Disposition {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Disposition::NotEligible(_))
    }
}

/// Counters of one controller.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LroStats {
    /// Frames absorbed into an entry.
    pub queued: u64,
    /// Entries delivered upstream.
    pub flushed: u64,
    /// Frames passed through because of a checksum mismatch.
    pub bad_csum: u64,
    /// Frames returned to the caller untouched.
    pub not_eligible: u64,
    /// Entries reclaimed because the pool ran dry.
    pub evicted: u64,
    /// Pure ACKs stored as records.
    pub acks_compressed: u64,
    /// Entries flushed by [`LroCtrl::flush_inactive`].
    pub inactive_flushed: u64,
}

/// LRO state of one receive queue.
///
/// The controller is owned by whatever processes the queue; every operation
/// takes `&mut self` and runs to completion, delivering synchronously to the
/// [`Upstream`].
pub struct LroCtrl<U: Upstream> {
    config: LroConfig,
    entries: Vec<LroEntry>,
    free: List,
    /// Most recently touched first.
    active: List,
    table: FlowTable,
    batch: Vec<(u32, Packet)>,
    scratch: Vec<EntryId>,
    stats: LroStats,
    epoch: Instant,
    generation: u64,
    upstream: U,
}

impl<U: Upstream> LroCtrl<U> {
    pub fn new(config: LroConfig, upstream: U) -> Result<Self> {
        config.validate()?;
        let mut entries: Vec<LroEntry> = (0..config.entries).map(|_| LroEntry::new()).collect();
        let mut free = List::new(Membership::Queue);
        for i in (0..config.entries).rev() {
            free.push_front(&mut entries, EntryId::new(i));
        }
        log::debug!(
            "lro: {} entries, {} buckets, ack limit {}, length limit {}",
            config.entries,
            config.buckets,
            config.ack_limit,
            config.length_limit
        );
        Ok(LroCtrl {
            table: FlowTable::new(config.buckets),
            batch: Vec::with_capacity(config.max_queued),
            scratch: Vec::with_capacity(config.entries),
            entries,
            free,
            active: List::new(Membership::Queue),
            stats: LroStats::default(),
            epoch: Instant::now(),
            generation: 0,
            config,
            upstream,
        })
    }

    pub fn config(&self) -> &LroConfig {
        &self.config
    }

    pub fn stats(&self) -> LroStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = LroStats::default();
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Frames waiting in the batch queue.
    pub fn queued_count(&self) -> usize {
        self.batch.len()
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn upstream_mut(&mut self) -> &mut U {
        &mut self.upstream
    }

    /// Flushes everything and hands back the consumer.
    pub fn into_upstream(mut self) -> U {
        self.flush_all();
        self.upstream
    }

    /// Submits one frame, stamped with the current time.
    pub fn rx(&mut self, pkt: Packet) -> Disposition {
        self.rx_at(pkt, Instant::now())
    }

    /// Submits one frame received at `now`.
    pub fn rx_at(&mut self, pkt: Packet, now: Instant) -> Disposition {
        let seg = match classify(&pkt.data, self.config.layer) {
            Ok(seg) => seg,
            Err(reason) => return self.reject(pkt, reason),
        };
        // Only frames with known good checksums are merged.
        let unusable = if pkt.meta.csum_verified {
            None
        } else if !self.config.verify_checksums {
            Some(None)
        } else if !seg.checksums_valid(&pkt.data) {
            self.stats.bad_csum += 1;
            Some(Some(Ineligible::BadChecksum))
        } else {
            None
        };

        // The hint may be missing on some frames of a flow, so buckets always
        // follow the software hash.
        let hash = seg.key.soft_hash();
        let compressible = self.config.ack_compression && seg.is_pure_ack();
        let aggregatable = unusable.is_none()
            && seg.is_mergeable()
            && (seg.payload_len > 0 || compressible);

        let Some(id) = self.table.lookup(&self.entries, hash, &seg.key) else {
            return match unusable {
                Some(Some(reason)) => self.reject(pkt, reason),
                Some(None) => self.pass(pkt),
                None if !aggregatable => self.pass(pkt),
                None => self.start(hash, pkt, &seg, now),
            };
        };

        if !aggregatable {
            log::trace!("lro: {:?} flags {:?} end aggregation", seg.key, seg.flags);
            self.flush(id);
            return self.deliver_unmodified(pkt);
        }

        match self.entries[id.index()].accum.verdict(&seg, &self.config) {
            Verdict::Append => {
                let full = self.append(id, pkt, &seg, now);
                self.stats.queued += 1;
                if full {
                    self.flush(id);
                    Disposition::Flushed
                } else {
                    self.touch(id, now);
                    Disposition::Queued
                }
            }
            Verdict::Restart => {
                self.flush(id);
                self.start(hash, pkt, &seg, now)
            }
            Verdict::Deliver => {
                log::trace!(
                    "lro: {:?} seq {} out of order, flushing",
                    seg.key,
                    seg.seq
                );
                self.flush(id);
                self.deliver_unmodified(pkt)
            }
        }
    }

    /// Batched submission. Frames are held until `max_queued` of them have
    /// gathered, then processed grouped by flow and flushed; frames the
    /// engine does not take are delivered upstream unmodified.
    pub fn queue(&mut self, pkt: Packet) {
        if self.config.max_queued == 0 {
            if let Disposition::NotEligible(pkt) = self.rx(pkt) {
                self.upstream.deliver(Delivery::Unmodified(pkt));
            }
            return;
        }
        // Sorting only groups frames by flow, so the hint is enough here as
        // long as it is consistent within one batch.
        let sort_key = match pkt.meta.flow_hash {
            Some(hash) => hash,
            None => classify(&pkt.data, self.config.layer)
                .map(|seg| seg.key.soft_hash())
                .unwrap_or(0),
        };
        self.batch.push((sort_key, pkt));
        if self.batch.len() >= self.config.max_queued {
            self.flush_all();
        }
    }

    /// Flushes every active entry whose last segment arrived more than the
    /// configured inactivity timeout before `now`. Returns how many were
    /// flushed.
    pub fn flush_inactive(&mut self, now: Instant) -> usize {
        self.flush_idle_for(now, self.config.inactive_timeout)
    }

    /// Like [`flush_inactive`](Self::flush_inactive) with an explicit
    /// threshold.
    pub fn flush_idle_for(&mut self, now: Instant, threshold: Duration) -> usize {
        let mut stale = std::mem::take(&mut self.scratch);
        stale.extend(self.active.iter(&self.entries).filter(|id| {
            self.entries[id.index()]
                .touched
                .is_some_and(|t| now.saturating_duration_since(t) > threshold)
        }));
        let flushed = stale.len();
        for id in stale.drain(..) {
            self.flush(id);
        }
        self.scratch = stale;
        self.stats.inactive_flushed += flushed as u64;
        flushed
    }

    /// Processes any batched frames, then flushes every active entry.
    pub fn flush_all(&mut self) {
        if !self.batch.is_empty() {
            self.process_batch(Instant::now());
        }
        while let Some(id) = self.active.head() {
            self.flush(id);
        }
    }

    fn process_batch(&mut self, now: Instant) {
        let mut batch = std::mem::take(&mut self.batch);
        // Stable: frames of one flow keep their arrival order.
        batch.sort_by_key(|(hash, _)| *hash);
        for (_, pkt) in batch.drain(..) {
            if let Disposition::NotEligible(pkt) = self.rx_at(pkt, now) {
                self.upstream.deliver(Delivery::Unmodified(pkt));
            }
        }
        self.batch = batch;
    }

    fn reject(&mut self, pkt: Packet, reason: Ineligible) -> Disposition {
        log::trace!("lro: passing {} byte frame through: {reason}", pkt.len());
        self.pass(pkt)
    }

    fn pass(&mut self, pkt: Packet) -> Disposition {
        self.stats.not_eligible += 1;
        Disposition::NotEligible(pkt)
    }

    fn deliver_unmodified(&mut self, pkt: Packet) -> Disposition {
        self.upstream.deliver(Delivery::Unmodified(pkt));
        Disposition::Flushed
    }

    fn synthesized_time(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_nanos() as u64
    }

    fn start(&mut self, hash: u32, pkt: Packet, seg: &Segment, now: Instant) -> Disposition {
        let Some(id) = self.acquire() else {
            return self.pass(pkt);
        };
        let conn = pkt.meta.conn;
        let accum = if seg.payload_len == 0 {
            let (time, provenance) = record_time(&pkt.meta, self.synthesized_time(now));
            let mut acks = AckAccum::new(pkt.meta, self.config.ack_limit);
            let stored = acks.try_compress(seg, time, provenance, self.config.ack_limit);
            debug_assert!(stored, "a fresh batch refused a pure ACK");
            self.stats.acks_compressed += 1;
            Accum::Acks(acks)
        } else {
            Accum::Data(DataAccum::start(pkt, seg))
        };
        self.generation += 1;
        let entry = &mut self.entries[id.index()];
        entry.key = Some(seg.key);
        entry.hash = hash;
        entry.conn = conn;
        entry.accum = accum;
        entry.touched = Some(now);
        entry.created = self.generation;
        self.table.insert(&mut self.entries, id);
        self.active.push_front(&mut self.entries, id);
        self.stats.queued += 1;
        log::trace!("lro: {:?} new entry {:?} at seq {}", seg.key, id, seg.seq);
        Disposition::Queued
    }

    /// Extends entry `id`; returns true when it must be flushed right away.
    fn append(&mut self, id: EntryId, pkt: Packet, seg: &Segment, now: Instant) -> bool {
        let (time, provenance) = record_time(&pkt.meta, self.synthesized_time(now));
        match &mut self.entries[id.index()].accum {
            Accum::Data(data) => {
                let full = data.append(pkt, seg, &self.config);
                log::trace!(
                    "lro: entry {:?} {} segments, {} bytes, next seq {}, previous {:?} bytes",
                    id,
                    data.segments(),
                    data.payload_len(),
                    data.next_seq(),
                    data.prev_last().map(<[u8]>::len)
                );
                full
            }
            Accum::Acks(acks) => {
                let stored = acks.try_compress(seg, time, provenance, self.config.ack_limit);
                debug_assert!(stored, "an ACK batch refused an append it had accepted");
                self.stats.acks_compressed += stored as u64;
                false
            }
            Accum::Idle => {
                debug_assert!(false, "append to a released entry");
                false
            }
        }
    }

    fn touch(&mut self, id: EntryId, now: Instant) {
        self.entries[id.index()].touched = Some(now);
        self.active.move_to_front(&mut self.entries, id);
    }

    /// Takes a free entry, evicting one when the pool is exhausted.
    fn acquire(&mut self) -> Option<EntryId> {
        if let Some(id) = self.free.pop_front(&mut self.entries) {
            return Some(id);
        }
        let victim = match self.config.eviction_policy {
            EvictionPolicy::LeastRecentlyTouched => self.active.tail(),
            EvictionPolicy::OldestCreated => self
                .active
                .iter(&self.entries)
                .min_by_key(|id| self.entries[id.index()].created),
        }?;
        log::debug!(
            "lro: pool exhausted, evicting entry {:?} ({:?})",
            victim,
            self.entries[victim.index()].key
        );
        self.stats.evicted += 1;
        self.flush(victim);
        self.free.pop_front(&mut self.entries)
    }

    /// Delivers what entry `id` holds and returns it to the free list.
    fn flush(&mut self, id: EntryId) {
        let entry = &mut self.entries[id.index()];
        let Some(key) = entry.key else {
            debug_assert!(false, "flush of released entry {id:?}");
            log::warn!("lro: ignoring flush of released entry {id:?}");
            return;
        };
        let delivery = match std::mem::take(&mut entry.accum) {
            Accum::Data(data) => Delivery::Segment(data.finish(key, entry.conn)),
            Accum::Acks(acks) => Delivery::Acks(acks.finish(key, entry.conn)),
            Accum::Idle => {
                debug_assert!(false, "active entry {id:?} holds nothing");
                log::warn!("lro: active entry {id:?} held nothing");
                self.release(id);
                return;
            }
        };
        match &delivery {
            Delivery::Segment(agg) => log::debug!(
                "lro: flush {:?}: {} segments, {} bytes",
                key,
                agg.segments,
                agg.payload_len
            ),
            Delivery::Acks(batch) => {
                log::debug!("lro: flush {:?}: {} acks", key, batch.len())
            }
            Delivery::Unmodified(_) => {}
        }
        self.stats.flushed += 1;
        self.upstream.deliver(delivery);
        self.release(id);
    }

    fn release(&mut self, id: EntryId) {
        self.table.remove(&mut self.entries, id);
        self.active.remove(&mut self.entries, id);
        self.entries[id.index()].clear();
        self.free.push_front(&mut self.entries, id);
    }
}
