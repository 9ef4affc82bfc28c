//! Slabbed caching layer for resolve-rs (spec §4.4-§4.7).
//!
//! [`slab_hash`] is the shared partitioned-LRU primitive; [`rrset_cache`] and
//! [`message_cache`] build the content-addressed message/RRset hierarchy on
//! top of it, [`infra_cache`] tracks upstream server health, [`key_cache`]
//! holds the validator's per-zone key state, and [`radix`] provides the
//! EDNS client-subnet cache keyspace.

pub mod infra_cache;
pub mod key_cache;
pub mod message_cache;
pub mod radix;
pub mod rrset_cache;
pub mod slab_hash;

pub use infra_cache::{InfraCache, InfraEntry, InfraKey, LamenessFlags};
pub use key_cache::KeyCache;
pub use message_cache::MessageCache;
pub use radix::{AddrTree, EcsCache};
pub use rrset_cache::RrsetCache;
pub use slab_hash::SlabHash;
