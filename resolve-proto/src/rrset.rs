//! Content-addressed RRsets with absolute TTL and security status (spec §3).

use std::time::{Duration, Instant};

use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};

use crate::security::SecurityStatus;

/// Monotonically increasing identity stamped on an RRset cache entry.
/// Bumped on every data replacement (spec §4.4); a message cache entry that
/// references an RRset by `(key, version)` is invalidated when the version
/// it observes no longer matches the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RrVersion(pub u64);

impl RrVersion {
    pub const INITIAL: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// `(owner name, type, class, TTL, rdata list, optional RRSIGs, security
/// status)` from spec §3. TTL is stored as an absolute expiry instant;
/// callers that need a relative TTL convert at copy-out time (spec §4.4).
#[derive(Debug, Clone)]
pub struct Rrset {
    pub name: Name,
    pub record_type: RecordType,
    pub dns_class: DNSClass,
    pub expiry: Instant,
    pub rdata: Vec<RData>,
    pub rrsigs: Vec<Record>,
    pub security: SecurityStatus,
    pub version: RrVersion,
}

impl Rrset {
    pub fn new(
        name: Name,
        record_type: RecordType,
        dns_class: DNSClass,
        ttl: Duration,
        rdata: Vec<RData>,
        now: Instant,
    ) -> Self {
        Self {
            name,
            record_type,
            dns_class,
            expiry: now + ttl,
            rdata,
            rrsigs: Vec::new(),
            security: SecurityStatus::Unchecked,
            version: RrVersion::INITIAL,
        }
    }

    /// Relative TTL as of `now`, clamped to zero once expired.
    pub fn ttl_remaining(&self, now: Instant) -> Duration {
        self.expiry.saturating_duration_since(now)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }

    /// Two RRsets are content-equal (and so collapse to a single cache
    /// entry, spec §3) when their owner/type/class/rdata set match,
    /// independent of TTL or security status.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.record_type == other.record_type
            && self.dns_class == other.dns_class
            && same_rdata_set(&self.rdata, &other.rdata)
    }

    /// Replace this entry's data in place, bumping its version id (spec
    /// §4.4: "the existing entry's data pointer is replaced... the old data
    /// is freed after unlock").
    pub fn replace_data(&mut self, rdata: Vec<RData>, ttl: Duration, now: Instant) {
        self.rdata = rdata;
        self.expiry = now + ttl;
        self.security = SecurityStatus::Unchecked;
        self.version = self.version.next();
    }

    pub fn set_security(&mut self, status: SecurityStatus) {
        self.security = self.security.transition_to(status);
    }
}

fn same_rdata_set(a: &[RData], b: &[RData]) -> bool {
    a.len() == b.len() && a.iter().all(|r| b.contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    #[test]
    fn version_bumps_on_replace() {
        let now = Instant::now();
        let mut rr = Rrset::new(
            name("example.test."),
            RecordType::A,
            DNSClass::IN,
            Duration::from_secs(60),
            vec![RData::A(Ipv4Addr::new(203, 0, 113, 10).into())],
            now,
        );
        let v0 = rr.version;
        rr.replace_data(
            vec![RData::A(Ipv4Addr::new(203, 0, 113, 11).into())],
            Duration::from_secs(30),
            now,
        );
        assert!(rr.version > v0);
    }

    #[test]
    fn content_eq_ignores_ttl_and_security() {
        let now = Instant::now();
        let mut a = Rrset::new(
            name("example.test."),
            RecordType::A,
            DNSClass::IN,
            Duration::from_secs(60),
            vec![RData::A(Ipv4Addr::new(203, 0, 113, 10).into())],
            now,
        );
        let b = Rrset::new(
            name("example.test."),
            RecordType::A,
            DNSClass::IN,
            Duration::from_secs(10),
            vec![RData::A(Ipv4Addr::new(203, 0, 113, 10).into())],
            now,
        );
        a.set_security(SecurityStatus::Secure);
        assert!(a.content_eq(&b));
    }

    #[test]
    fn ttl_round_trips_within_epsilon() {
        let now = Instant::now();
        let rr = Rrset::new(
            name("example.test."),
            RecordType::A,
            DNSClass::IN,
            Duration::from_secs(60),
            vec![RData::A(Ipv4Addr::new(203, 0, 113, 10).into())],
            now,
        );
        let remaining = rr.ttl_remaining(now);
        assert!(remaining <= Duration::from_secs(60) && remaining >= Duration::from_secs(59));
        assert!(rr.is_expired(now + Duration::from_secs(61)));
    }
}
