//! Message cache: the other half of the slabbed cache hierarchy (spec
//! §4.4). Entries hold RRset *references* (key + version), not owned data;
//! a lookup re-validates each reference against the live RRset cache before
//! returning (spec §3: "a version bump invalidates the reference and the
//! message must be re-checked").

use std::num::NonZeroUsize;
use std::time::Instant;

use resolve_proto::{MessageReply, QueryKey, RrsetRef};

use crate::rrset_cache::RrsetCache;
use crate::slab_hash::SlabHash;

pub struct MessageCache {
    table: SlabHash<QueryKey, MessageReply>,
}

impl MessageCache {
    pub fn new(num_slabs: usize, per_slab_capacity: NonZeroUsize) -> Self {
        Self {
            table: SlabHash::new(num_slabs, per_slab_capacity),
        }
    }

    /// Look up a complete, still-valid reply. A hit requires every
    /// referenced RRset to still be at its recorded version; a stale
    /// reference is treated as a miss rather than served (spec §3, §4.4).
    pub fn get(&self, key: &QueryKey, rrset_cache: &RrsetCache, now: Instant) -> Option<MessageReply> {
        let msg = self.table.get_cloned(key)?;
        if msg.is_expired(now) {
            return None;
        }
        let all_refs = msg.answer.iter().chain(msg.authority.iter()).chain(msg.additional.iter());
        for r in all_refs {
            if !Self::reference_is_live(r, rrset_cache) {
                return None;
            }
        }
        Some(msg)
    }

    fn reference_is_live(r: &RrsetRef, rrset_cache: &RrsetCache) -> bool {
        let key = QueryKey::new(r.name.clone(), r.record_type, r.dns_class);
        rrset_cache.version_of(&key) == Some(r.version)
    }

    pub fn insert(&self, reply: MessageReply) {
        self.table.insert(reply.qkey.clone(), reply);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}
