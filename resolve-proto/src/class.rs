//! DNS record class handling.
//!
//! The wire-level class codes (IN, CH, HS, NONE, ANY, OPT) are already
//! defined by [`hickory_proto::rr::DNSClass`]; this module only adds the
//! `Copy`-friendly alias used throughout the resolver so call sites don't
//! need to reach into `hickory_proto` directly.

pub use hickory_proto::rr::DNSClass as DnsClass;
