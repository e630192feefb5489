use crate::entry::{EntryId, LroEntry};
use crate::list::{List, Membership};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// Identity of one direction of a TCP connection as seen on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FlowKey {
    pub ether_type: u16,
    pub vlan: Option<u16>,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowKey {
    /// Deterministic software hash, used when the frame carries no hardware
    /// flow hash.
    pub fn soft_hash(&self) -> u32 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        let h = hasher.finish();
        (h ^ (h >> 32)) as u32
    }
}

/// Fixed-size chained hash table over the entry arena. Only active entries
/// are linked into a bucket.
pub(crate) struct FlowTable {
    buckets: Vec<List>,
}

impl FlowTable {
    pub(crate) fn new(buckets: usize) -> Self {
        FlowTable {
            buckets: vec![List::new(Membership::Bucket); buckets],
        }
    }

    fn bucket(&self, hash: u32) -> usize {
        hash as usize % self.buckets.len()
    }

    pub(crate) fn insert(&mut self, entries: &mut [LroEntry], id: EntryId) {
        let b = self.bucket(entries[id.index()].hash);
        self.buckets[b].push_front(entries, id);
    }

    pub(crate) fn remove(&mut self, entries: &mut [LroEntry], id: EntryId) {
        let b = self.bucket(entries[id.index()].hash);
        self.buckets[b].remove(entries, id);
    }

    /// First entry in the bucket for `hash` whose key equals `key`.
    pub(crate) fn lookup(&self, entries: &[LroEntry], hash: u32, key: &FlowKey) -> Option<EntryId> {
        self.buckets[self.bucket(hash)]
            .iter(entries)
            .find(|id| entries[id.index()].key.as_ref() == Some(key))
    }

    #[cfg(test)]
    pub(crate) fn bucket_len(&self, hash: u32) -> usize {
        self.buckets[self.bucket(hash)].len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    fn key(port: u16) -> FlowKey {
        FlowKey {
            ether_type: crate::wire::ETHERTYPE_IPV4,
            vlan: None,
            src_addr: Ipv4Addr::new(10, 0, 0, 1).into(),
            dst_addr: Ipv4Addr::new(10, 0, 0, 2).into(),
            src_port: port,
            dst_port: 80,
        }
    }

    #[test]
    fn soft_hash_is_stable_and_key_sensitive() {
        assert_eq!(key(1).soft_hash(), key(1).soft_hash());
        assert_ne!(key(1).soft_hash(), key(2).soft_hash());
    }

    #[test]
    fn collisions_chain_in_one_bucket() {
        // One bucket: every key collides.
        let mut table = FlowTable::new(1);
        let mut entries: Vec<LroEntry> = (0..3).map(|_| LroEntry::new()).collect();
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.key = Some(key(i as u16));
            entry.hash = 7;
        }
        for i in 0..3 {
            table.insert(&mut entries, EntryId::new(i));
        }
        assert_eq!(table.bucket_len(7), 3);
        assert_eq!(table.lookup(&entries, 7, &key(1)), Some(EntryId::new(1)));
        assert_eq!(table.lookup(&entries, 7, &key(9)), None);

        table.remove(&mut entries, EntryId::new(1));
        assert_eq!(table.lookup(&entries, 7, &key(1)), None);
        assert_eq!(table.lookup(&entries, 7, &key(2)), Some(EntryId::new(2)));
        assert_eq!(table.bucket_len(7), 2);
    }
}
