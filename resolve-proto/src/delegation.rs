//! Delegation points: zone cuts the iterator walks (spec §3, §4.2).

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use hickory_proto::rr::{Name, RData, Record};

/// One nameserver named in a delegation's NS RRset, together with whatever
/// addresses have been resolved for it so far.
#[derive(Debug, Clone, Default)]
pub struct NameServerTarget {
    pub addresses: Vec<IpAddr>,
    /// Addresses already tried for this delegation descent (spec §4.2 target
    /// selection keeps a per-descent "tried" set so a stalled target isn't
    /// retried forever within one query).
    pub tried: HashSet<IpAddr>,
    /// Addresses known lame for the zone this delegation point covers.
    pub lame: HashSet<IpAddr>,
    pub a_resolved: bool,
    pub aaaa_resolved: bool,
}

impl NameServerTarget {
    pub fn needs_address(&self) -> bool {
        !self.a_resolved || !self.aaaa_resolved
    }

    pub fn untried_addresses(&self) -> impl Iterator<Item = &IpAddr> {
        self.addresses
            .iter()
            .filter(move |a| !self.tried.contains(*a) && !self.lame.contains(*a))
    }
}

/// A zone cut: apex name, NS RRset owners, and per-nameserver target state
/// (spec §3). Monotonic: addresses and lameness are only ever added while a
/// query holds this delegation point (spec §3 invariants).
#[derive(Debug, Clone)]
pub struct DelegationPoint {
    pub apex: Name,
    pub targets: HashMap<Name, NameServerTarget>,
    probed_servers: HashSet<Name>,
}

impl DelegationPoint {
    pub fn new(apex: Name, ns_names: impl IntoIterator<Item = Name>) -> Self {
        let targets = ns_names
            .into_iter()
            .map(|n| (n, NameServerTarget::default()))
            .collect();
        Self {
            apex,
            targets,
            probed_servers: HashSet::new(),
        }
    }

    /// Build a delegation point from an NS RRset plus whatever glue records
    /// accompanied it (spec §4.2: "promote glue in the additional section").
    pub fn from_ns_and_glue(apex: Name, ns_records: &[Record], glue: &[Record]) -> Self {
        let ns_names = ns_records.iter().filter_map(|r| match r.data() {
            RData::NS(ns) => Some(ns.0.clone()),
            _ => None,
        });
        let mut dp = Self::new(apex, ns_names);
        for g in glue {
            dp.add_glue(g);
        }
        dp
    }

    /// Fold one glue record (A/AAAA under a known NS name) into its target.
    /// Returns `false` if the glue's owner is not one of this delegation's
    /// nameservers (out-of-bailiwick glue is the caller's concern, spec
    /// §4.2 "Bailiwick").
    pub fn add_glue(&mut self, record: &Record) -> bool {
        let Some(target) = self.targets.get_mut(record.name()) else {
            return false;
        };
        match record.data() {
            RData::A(a) => {
                target.addresses.push(IpAddr::V4(a.0));
                target.a_resolved = true;
                true
            }
            RData::AAAA(aaaa) => {
                target.addresses.push(IpAddr::V6(aaaa.0));
                target.aaaa_resolved = true;
                true
            }
            _ => false,
        }
    }

    /// A nameserver name that still needs address resolution and hasn't
    /// already been sent out as a target sub-query this descent (spec §4.2
    /// step 4).
    pub fn missing_server(&self) -> Option<&Name> {
        self.targets.iter().find_map(|(name, target)| {
            if target.needs_address() && !self.probed_servers.contains(name) {
                Some(name)
            } else {
                None
            }
        })
    }

    pub fn mark_probed(&mut self, name: &Name) {
        self.probed_servers.insert(name.clone());
    }

    pub fn mark_tried(&mut self, addr: IpAddr) {
        for target in self.targets.values_mut() {
            if target.addresses.contains(&addr) {
                target.tried.insert(addr);
            }
        }
    }

    pub fn mark_lame(&mut self, addr: IpAddr) {
        for target in self.targets.values_mut() {
            if target.addresses.contains(&addr) {
                target.lame.insert(addr);
            }
        }
    }

    pub fn is_lame(&self, addr: IpAddr) -> bool {
        self.targets.values().any(|t| t.lame.contains(&addr))
    }

    /// All resolved, untried, non-lame addresses across every target.
    pub fn candidate_addresses(&self) -> Vec<IpAddr> {
        self.targets
            .values()
            .flat_map(|t| t.untried_addresses().copied())
            .collect()
    }

    pub fn ns_names(&self) -> impl Iterator<Item = &Name> {
        self.targets.keys()
    }
}
