//! Shared data model for resolve-rs.
//!
//! Wire parsing, the RFC 1035 message grammar, and DNSSEC signature
//! primitives are supplied by [`hickory_proto`] — this crate only adds the
//! resolver-specific types layered on top of it: query keys, content-addressed
//! RRsets carrying a DNSSEC security status, message replies built from RRset
//! references, delegation points, and trust anchors.

pub mod anchor;
pub mod class;
pub mod delegation;
pub mod key;
pub mod message;
pub mod rrset;
pub mod security;

pub use hickory_proto::op::{Edns, Header, Query as WireQuery, ResponseCode};
pub use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};

pub use anchor::{KeyEntry, NullKeyReason, TrustAnchor};
pub use class::DnsClass;
pub use delegation::{DelegationPoint, NameServerTarget};
pub use key::QueryKey;
pub use message::{MessageFlags, MessageReply, RrsetRef};
pub use rrset::{RrVersion, Rrset};
pub use security::SecurityStatus;
