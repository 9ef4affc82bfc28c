//! A hash table partitioned into N independently-locked slabs (spec §4.4),
//! grounded in `original_source/trunk/util/storage/slabhash.h`: "None of the
//! data inside the slabhash may be altered [without a lock]... this results
//! in a partitioned lruhash table".
//!
//! Each slab is its own [`lru::LruCache`] behind a [`Mutex`]. The slab for a
//! key is selected by the *high* bits of its hash, so a simple/fast hasher
//! still spreads keys evenly across slabs even if its low bits are biased.
//! Parallel lookups/inserts on different slabs never contend; there is no
//! global LRU ordering, only per-slab ordering (spec §4.4 consequences).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

/// Partitioned, slabbed LRU hash table. `num_slabs` must be a power of two
/// (spec §6 configuration surface: "each slab count must be a power of two").
pub struct SlabHash<K, V> {
    slabs: Vec<Mutex<LruCache<K, V>>>,
    shift: u32,
}

impl<K, V> SlabHash<K, V>
where
    K: Hash + Eq + Clone,
{
    /// `num_slabs` must be a power of two; `per_slab_capacity` is the
    /// memory budget divided equally among slabs (spec §4.4).
    pub fn new(num_slabs: usize, per_slab_capacity: NonZeroUsize) -> Self {
        assert!(num_slabs.is_power_of_two(), "slab count must be a power of two");
        let shift = 64 - num_slabs.trailing_zeros();
        let slabs = (0..num_slabs)
            .map(|_| Mutex::new(LruCache::new(per_slab_capacity)))
            .collect();
        Self { slabs, shift }
    }

    fn hash_of(key: &K) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// The slab index a key resolves to. Exposed so tests can assert that
    /// `lookup` and `insert` agree (spec §8 "slab selection" property).
    pub fn slab_index(&self, key: &K) -> usize {
        if self.slabs.len() == 1 {
            return 0;
        }
        (Self::hash_of(key) >> self.shift) as usize
    }

    pub fn num_slabs(&self) -> usize {
        self.slabs.len()
    }

    /// Copy out a clone of the value behind a short per-slab lock. The lock
    /// is always released before this call returns — callers never hold a
    /// cache lock across a second cache lookup or any I/O (spec §4.4
    /// invariants).
    pub fn get_cloned(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let idx = self.slab_index(key);
        let mut slab = self.slabs[idx].lock().expect("slab lock poisoned");
        slab.get(key).cloned()
    }

    /// Replace-or-insert. If present, the existing value is swapped out
    /// under the same short lock (spec §4.4: "the existing entry's data
    /// pointer is replaced under write-lock"); if absent, the underlying LRU
    /// evicts tail entries from this slab only as needed to fit.
    pub fn insert(&self, key: K, value: V) {
        let idx = self.slab_index(&key);
        let mut slab = self.slabs[idx].lock().expect("slab lock poisoned");
        slab.put(key, value);
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let idx = self.slab_index(key);
        let mut slab = self.slabs[idx].lock().expect("slab lock poisoned");
        slab.pop(key)
    }

    pub fn len(&self) -> usize {
        self.slabs.iter().map(|s| s.lock().expect("slab lock poisoned").len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutate a value in place under the slab's lock without cloning it out.
    /// Used for small, local updates (e.g. RTT EWMA) where the cost of a
    /// full copy-out/insert round trip isn't worth it.
    pub fn with_mut<R>(&self, key: &K, f: impl FnOnce(Option<&mut V>) -> R) -> R {
        let idx = self.slab_index(key);
        let mut slab = self.slabs[idx].lock().expect("slab lock poisoned");
        f(slab.get_mut(key))
    }
}
