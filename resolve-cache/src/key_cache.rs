//! Validator key cache (spec §4.3 "Find-key"): one [`KeyEntry`] per zone
//! apex, either a verified DNSKEY set or a short-TTL null entry recording why
//! the zone has no usable keys. Keyed on zone name alone — there's only ever
//! one key set in play per zone, unlike the RRset cache's (name, type,
//! class) keying.

use std::num::NonZeroUsize;
use std::time::Instant;

use hickory_proto::rr::Name;
use resolve_proto::KeyEntry;

use crate::slab_hash::SlabHash;

pub struct KeyCache {
    table: SlabHash<Name, KeyEntry>,
}

impl KeyCache {
    pub fn new(num_slabs: usize, per_slab_capacity: NonZeroUsize) -> Self {
        Self {
            table: SlabHash::new(num_slabs, per_slab_capacity),
        }
    }

    /// Copy-out lookup; an expired entry (good or null) is treated as a miss
    /// so the validator re-primes the zone (spec §4.3).
    pub fn get(&self, zone: &Name, now: Instant) -> Option<KeyEntry> {
        let entry = self.table.get_cloned(zone)?;
        if entry.is_expired(now) {
            None
        } else {
            Some(entry)
        }
    }

    pub fn insert(&self, zone: Name, entry: KeyEntry) {
        self.table.insert(zone, entry);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolve_proto::NullKeyReason;
    use std::str::FromStr;
    use std::time::Duration;

    fn zone() -> Name {
        Name::from_str("example.test.").unwrap()
    }

    #[test]
    fn expired_null_entry_is_a_miss() {
        let cache = KeyCache::new(4, NonZeroUsize::new(16).unwrap());
        let now = Instant::now();
        cache.insert(
            zone(),
            KeyEntry::Null {
                reason: NullKeyReason::ProvablyInsecure,
                expiry: now + Duration::from_secs(10),
            },
        );
        assert!(cache.get(&zone(), now).is_some());
        assert!(cache.get(&zone(), now + Duration::from_secs(11)).is_none());
    }

    #[test]
    fn good_entry_round_trips() {
        let cache = KeyCache::new(4, NonZeroUsize::new(16).unwrap());
        let now = Instant::now();
        cache.insert(
            zone(),
            KeyEntry::Good {
                keys: Vec::new(),
                expiry: now + Duration::from_secs(3600),
            },
        );
        match cache.get(&zone(), now) {
            Some(KeyEntry::Good { .. }) => {}
            other => panic!("expected Good entry, got {other:?}"),
        }
    }
}
