//! Compiled-in root hints table (SPEC_FULL §11: "kept as-is for the static
//! root-hints table, matching the teacher's own use" of `lazy_static`).
//!
//! The resolver has no `root-hints-file` option in §6's configuration
//! surface, so the thirteen IANA root servers are built in rather than
//! loaded from disk, the same way `named.root` ships baked into most
//! recursive resolvers.

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use hickory_proto::rr::Name;
use lazy_static::lazy_static;

use resolve_engine::RootHint;

macro_rules! root_server {
    ($letter:expr, $a:expr, $b:expr, $c:expr, $d:expr) => {
        RootHint {
            name: Name::from_str(concat!($letter, ".root-servers.net.")).expect("static root server name"),
            addr: IpAddr::V4(Ipv4Addr::new($a, $b, $c, $d)),
        }
    };
}

lazy_static! {
    static ref ROOT_HINTS: Vec<RootHint> = vec![
        root_server!("a", 198, 41, 0, 4),
        root_server!("b", 170, 247, 170, 2),
        root_server!("c", 192, 33, 4, 12),
        root_server!("d", 199, 7, 91, 13),
        root_server!("e", 192, 203, 230, 10),
        root_server!("f", 192, 5, 5, 241),
        root_server!("g", 192, 112, 36, 4),
        root_server!("h", 198, 97, 190, 53),
        root_server!("i", 192, 36, 148, 17),
        root_server!("j", 192, 58, 128, 30),
        root_server!("k", 193, 0, 14, 129),
        root_server!("l", 199, 7, 83, 42),
        root_server!("m", 202, 12, 27, 33),
    ];
}

pub fn default_root_hints() -> Vec<RootHint> {
    ROOT_HINTS.clone()
}
