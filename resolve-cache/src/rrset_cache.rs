//! RRset cache: the content-addressed half of the slabbed cache hierarchy
//! (spec §4.4). Two equal rdata sets under the same name/type/class collapse
//! to one entry shared by every message that references them (spec §3).

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use hickory_proto::rr::{DNSClass, Name, RecordType};
use resolve_proto::{QueryKey, RrVersion, Rrset};

use crate::slab_hash::SlabHash;

pub struct RrsetCache {
    table: SlabHash<QueryKey, Rrset>,
    cache_min_ttl: Duration,
    cache_max_ttl: Duration,
}

impl RrsetCache {
    pub fn new(
        num_slabs: usize,
        per_slab_capacity: NonZeroUsize,
        cache_min_ttl: Duration,
        cache_max_ttl: Duration,
    ) -> Self {
        Self {
            table: SlabHash::new(num_slabs, per_slab_capacity),
            cache_min_ttl,
            cache_max_ttl,
        }
    }

    fn clamp_ttl(&self, ttl: Duration) -> Duration {
        ttl.clamp(self.cache_min_ttl, self.cache_max_ttl)
    }

    /// Copy-out lookup (spec §4.4: caller never holds a cache lock across
    /// another call). Returns `None` on miss or if the stored entry has
    /// already expired.
    pub fn get(&self, key: &QueryKey, now: Instant) -> Option<Rrset> {
        let rr = self.table.get_cloned(key)?;
        if rr.is_expired(now) {
            None
        } else {
            Some(rr)
        }
    }

    /// The live version id for a key, used by the message cache to validate
    /// its RRset references without copying the whole RRset out (spec §4.4:
    /// "a reader dereferencing the message rechecks each id").
    pub fn version_of(&self, key: &QueryKey) -> Option<RrVersion> {
        self.table.with_mut(key, |e| e.map(|r| r.version))
    }

    /// Insert or fold a freshly-resolved RRset into the cache. TTL is capped
    /// at `cache-max-ttl` and floored at `cache-min-ttl` before storage
    /// (spec §4.2 "Scrubbing"). Returns the stored (possibly pre-existing,
    /// content-equal) entry.
    pub fn insert(&self, mut rrset: Rrset, now: Instant) -> Rrset {
        let ttl = self.clamp_ttl(rrset.ttl_remaining(now).max(Duration::from_secs(0)));
        rrset.expiry = now + ttl;
        let key = QueryKey::new(rrset.name.clone(), rrset.record_type, rrset.dns_class);

        let updated = self.table.with_mut(&key, |existing| match existing {
            Some(entry) if entry.content_eq(&rrset) => {
                // Same rdata set: keep identity (version), only extend TTL
                // and let security status advance monotonically.
                entry.expiry = rrset.expiry;
                entry.set_security(rrset.security);
                Some(entry.clone())
            }
            Some(entry) => {
                entry.replace_data(rrset.rdata.clone(), ttl, now);
                entry.set_security(rrset.security);
                Some(entry.clone())
            }
            None => None,
        });

        match updated {
            Some(stored) => stored,
            None => {
                self.table.insert(key, rrset.clone());
                rrset
            }
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Strip labels from `qname` until a cached NS RRset is found (spec
    /// §4.2 "Init": "determine the closest enclosing delegation in the
    /// RRset cache"). Returns the apex name and its NS RRset.
    pub fn deepest_ns(&self, qname: &Name, now: Instant) -> Option<(Name, Rrset)> {
        let mut candidate = qname.clone();
        loop {
            let key = QueryKey::new(candidate.clone(), RecordType::NS, DNSClass::IN);
            if let Some(rr) = self.get(&key, now) {
                return Some((candidate, rr));
            }
            if candidate.is_root() {
                return None;
            }
            candidate = candidate.base_name();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::{DNSClass, RData, RecordType};
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use hickory_proto::rr::Name;

    fn a_rrset(now: Instant, ttl: u64, ip: Ipv4Addr) -> Rrset {
        Rrset::new(
            Name::from_str("example.test.").unwrap(),
            RecordType::A,
            DNSClass::IN,
            Duration::from_secs(ttl),
            vec![RData::A(ip.into())],
            now,
        )
    }

    #[test]
    fn round_trip_ttl_within_epsilon() {
        let cache = RrsetCache::new(4, NonZeroUsize::new(64).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let now = Instant::now();
        let stored = cache.insert(a_rrset(now, 60, Ipv4Addr::new(203, 0, 113, 10)), now);
        let key = QueryKey::new(stored.name.clone(), RecordType::A, DNSClass::IN);
        let got = cache.get(&key, now).unwrap();
        let remaining = got.ttl_remaining(now);
        assert!(remaining <= Duration::from_secs(60) && remaining >= Duration::from_secs(59));

        assert!(cache.get(&key, now + Duration::from_secs(61)).is_none());
    }

    #[test]
    fn content_equal_rrsets_collapse_and_keep_version() {
        let cache = RrsetCache::new(4, NonZeroUsize::new(64).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let now = Instant::now();
        let ip = Ipv4Addr::new(203, 0, 113, 10);
        let first = cache.insert(a_rrset(now, 60, ip), now);
        let key = QueryKey::new(first.name.clone(), RecordType::A, DNSClass::IN);
        let v0 = cache.version_of(&key).unwrap();

        let second = cache.insert(a_rrset(now, 30, ip), now);
        assert_eq!(second.version, v0, "identical rdata must not bump version");
    }

    #[test]
    fn different_rdata_bumps_version() {
        let cache = RrsetCache::new(4, NonZeroUsize::new(64).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let now = Instant::now();
        let first = cache.insert(a_rrset(now, 60, Ipv4Addr::new(203, 0, 113, 10)), now);
        let key = QueryKey::new(first.name.clone(), RecordType::A, DNSClass::IN);
        let v0 = cache.version_of(&key).unwrap();
        cache.insert(a_rrset(now, 60, Ipv4Addr::new(203, 0, 113, 11)), now);
        let v1 = cache.version_of(&key).unwrap();
        assert!(v1 > v0);
    }

    #[test]
    fn ttl_clamped_to_configured_bounds() {
        let cache = RrsetCache::new(
            4,
            NonZeroUsize::new(64).unwrap(),
            Duration::from_secs(10),
            Duration::from_secs(120),
        );
        let now = Instant::now();
        let stored = cache.insert(a_rrset(now, 5, Ipv4Addr::new(203, 0, 113, 10)), now);
        assert!(stored.ttl_remaining(now) >= Duration::from_secs(10));

        let stored = cache.insert(a_rrset(now, 100_000, Ipv4Addr::new(203, 0, 113, 11)), now);
        assert!(stored.ttl_remaining(now) <= Duration::from_secs(120));
    }
}
