//! Trust anchors and validator key-cache entries (spec §3, §4.3).

use std::time::Instant;

use hickory_proto::dnssec::rdata::{DNSKEY, DS};
use hickory_proto::rr::Name;

/// `(name, set of DS and/or DNSKEY rdata)` fed from configuration (spec §3).
/// Anchors are never evicted; they live for the process lifetime.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub name: Name,
    pub ds: Vec<DS>,
    pub dnskey: Vec<DNSKEY>,
}

impl TrustAnchor {
    pub fn from_ds(name: Name, ds: Vec<DS>) -> Self {
        Self {
            name,
            ds,
            dnskey: Vec::new(),
        }
    }

    pub fn from_dnskey(name: Name, dnskey: Vec<DNSKEY>) -> Self {
        Self {
            name,
            ds: Vec::new(),
            dnskey,
        }
    }
}

/// A validator key-cache entry for one zone (spec §4.3 "Find-key"): either a
/// verified DNSKEY set with an expiry, or a short-TTL null entry recording
/// that the zone is provably insecure or that key retrieval failed.
///
/// Null entries exist specifically to stop re-priming storms into zones that
/// keep failing DS/DNSKEY lookups (spec §4.3).
#[derive(Debug, Clone)]
pub enum KeyEntry {
    Good {
        keys: Vec<DNSKEY>,
        expiry: Instant,
    },
    Null {
        /// Why this zone resolved to no usable key set.
        reason: NullKeyReason,
        expiry: Instant,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullKeyReason {
    ProvablyInsecure,
    Bad,
}

impl KeyEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Self::Good { expiry, .. } | Self::Null { expiry, .. } => now >= *expiry,
        }
    }
}
