//! Cached message replies (spec §3: "qkey, response code, flags, and three
//! ordered sections").

use std::time::Instant;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{DNSClass, Name, RecordType};

use crate::key::QueryKey;
use crate::rrset::RrVersion;

/// A pointer to an RRset cache entry as it existed when a message was built.
/// Message-cache readers recheck `version` against the live entry before
/// trusting it (spec §3, §4.4); a mismatch means the message must be
/// re-checked rather than served from cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RrsetRef {
    pub name: Name,
    pub record_type: RecordType,
    pub dns_class: DNSClass,
    pub version: RrVersion,
}

/// The subset of header bits the resolver cares about once a message has
/// been classified and (possibly) validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub authentic_data: bool,
    pub checking_disabled: bool,
}

/// A structured DNS answer built from RRset references rather than owned
/// RRsets (spec §3). TTL is the minimum of the referenced RRsets' TTLs,
/// stored as an absolute expiry.
#[derive(Debug, Clone)]
pub struct MessageReply {
    pub qkey: QueryKey,
    pub rcode: ResponseCode,
    pub flags: MessageFlags,
    pub answer: Vec<RrsetRef>,
    pub authority: Vec<RrsetRef>,
    pub additional: Vec<RrsetRef>,
    pub expiry: Instant,
}

impl MessageReply {
    pub fn new(qkey: QueryKey, rcode: ResponseCode, flags: MessageFlags, expiry: Instant) -> Self {
        Self {
            qkey,
            rcode,
            flags,
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            expiry,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }

    /// A complete, answerable reply: either a positive answer or a
    /// NODATA/NXDOMAIN with authority-section proof (spec §4.2's "Answer"
    /// classification).
    pub fn is_complete_answer(&self) -> bool {
        !self.answer.is_empty()
            || matches!(self.rcode, ResponseCode::NXDomain)
            || (self.answer.is_empty() && !self.authority.is_empty())
    }
}
