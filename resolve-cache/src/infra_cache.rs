//! Infrastructure cache: upstream server health, keyed on `(server IP, zone
//! name)` (spec §4.5).

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use hickory_proto::rr::Name;

use crate::slab_hash::SlabHash;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InfraKey {
    pub server: IpAddr,
    pub zone: NameKey,
}

/// `Name` isn't `Hash`-stable for our purposes via `hickory_proto`'s own
/// case-insensitive hash when mixed with a plain `IpAddr` key tuple derive,
/// so this newtype documents that the pair is hashed the same way `Name`
/// itself hashes (case-insensitive, original case preserved on output).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameKey(pub Name);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LamenessFlags {
    pub a_lame: bool,
    pub aaaa_lame: bool,
    pub dnssec_lame: bool,
    pub fully_lame: bool,
}

impl LamenessFlags {
    pub fn is_lame(&self) -> bool {
        self.fully_lame || self.a_lame || self.aaaa_lame || self.dnssec_lame
    }
}

#[derive(Debug, Clone)]
pub struct InfraEntry {
    /// EWMA of measured response latencies, `None` until the first sample.
    pub rtt: Option<Duration>,
    pub lameness: LamenessFlags,
    /// Consecutive timeouts since the last success; drives the backoff
    /// doubling described in spec §4.5/§4.6.
    pub consecutive_timeouts: u32,
    pub last_probe: Instant,
}

const EWMA_WEIGHT: f64 = 0.25;

impl InfraEntry {
    fn fresh(now: Instant) -> Self {
        Self {
            rtt: None,
            lameness: LamenessFlags::default(),
            consecutive_timeouts: 0,
            last_probe: now,
        }
    }

    /// Combine a new RTT sample into the smoothed estimate.
    pub fn record_rtt(&mut self, sample: Duration, now: Instant) {
        self.consecutive_timeouts = 0;
        self.last_probe = now;
        self.rtt = Some(match self.rtt {
            Some(prev) => {
                let prev_ms = prev.as_secs_f64() * 1000.0;
                let sample_ms = sample.as_secs_f64() * 1000.0;
                let next_ms = prev_ms + EWMA_WEIGHT * (sample_ms - prev_ms);
                Duration::from_secs_f64((next_ms / 1000.0).max(0.0))
            }
            None => sample,
        });
    }

    /// On repeated timeouts RTT doubles up to `top_timeout` (spec §4.5).
    pub fn record_timeout(&mut self, base: Duration, top_timeout: Duration, now: Instant) {
        self.consecutive_timeouts += 1;
        self.last_probe = now;
        let current = self.rtt.unwrap_or(base);
        self.rtt = Some((current * 2).min(top_timeout));
    }
}

pub struct InfraCache {
    table: SlabHash<InfraKey, InfraEntry>,
    host_ttl: Duration,
    top_timeout: Duration,
}

impl InfraCache {
    pub fn new(
        num_slabs: usize,
        per_slab_capacity: NonZeroUsize,
        host_ttl: Duration,
        top_timeout: Duration,
    ) -> Self {
        Self {
            table: SlabHash::new(num_slabs, per_slab_capacity),
            host_ttl,
            top_timeout,
        }
    }

    fn key(server: IpAddr, zone: &Name) -> InfraKey {
        InfraKey {
            server,
            zone: NameKey(zone.clone()),
        }
    }

    /// RTT to use when selecting targets: the smoothed estimate if the
    /// entry hasn't expired past `host-ttl`, else `None` (re-probe).
    pub fn rtt(&self, server: IpAddr, zone: &Name, now: Instant) -> Option<Duration> {
        let key = Self::key(server, zone);
        self.table.with_mut(&key, |entry| {
            entry.and_then(|e| {
                if now.duration_since(e.last_probe) > self.host_ttl {
                    None
                } else {
                    e.rtt
                }
            })
        })
    }

    pub fn is_lame(&self, server: IpAddr, zone: &Name, now: Instant) -> bool {
        let key = Self::key(server, zone);
        self.table.with_mut(&key, |entry| {
            entry
                .map(|e| {
                    if now.duration_since(e.last_probe) > self.host_ttl {
                        false // host-ttl expired: retry the server
                    } else {
                        e.lameness.is_lame()
                    }
                })
                .unwrap_or(false)
        })
    }

    pub fn record_rtt(&self, server: IpAddr, zone: &Name, sample: Duration, now: Instant) {
        self.with_entry_mut(server, zone, now, |e| e.record_rtt(sample, now));
    }

    pub fn record_timeout(&self, server: IpAddr, zone: &Name, base: Duration, now: Instant) {
        let top = self.top_timeout;
        self.with_entry_mut(server, zone, now, |e| e.record_timeout(base, top, now));
    }

    pub fn mark_lame(&self, server: IpAddr, zone: &Name, flags: LamenessFlags, now: Instant) {
        self.with_entry_mut(server, zone, now, |e| {
            e.lameness.a_lame |= flags.a_lame;
            e.lameness.aaaa_lame |= flags.aaaa_lame;
            e.lameness.dnssec_lame |= flags.dnssec_lame;
            e.lameness.fully_lame |= flags.fully_lame;
        });
    }

    fn with_entry_mut(&self, server: IpAddr, zone: &Name, now: Instant, f: impl Fn(&mut InfraEntry)) {
        let key = Self::key(server, zone);
        let needs_insert = self.table.with_mut(&key, |entry| match entry {
            Some(e) => {
                f(e);
                false
            }
            None => true,
        });
        if needs_insert {
            let mut fresh = InfraEntry::fresh(now);
            f(&mut fresh);
            self.table.insert(key, fresh);
        }
    }
}
