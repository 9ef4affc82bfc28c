//! Iterator module (spec §4.2): walks delegation points from a root or
//! cached zone cut down to an answer, chasing CNAMEs and referrals, talking
//! to upstreams through the [`OutboundMultiplexer`].
//!
//! The sub-state names from spec §4.2 (init, init-2/3, query-targets,
//! query-response, prime-response, finished) map onto this module as
//! recursive calls rather than re-entrant dispatch (see [`crate::qstate`]):
//! `resolve` *is* init; a CNAME restart or referral is a loop iteration
//! rather than a separate sub-state struct, and a target sub-query for
//! missing glue is a nested call to `resolve` at `depth + 1`.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};

use hickory_proto::op::{Message, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use resolve_cache::{InfraCache, LamenessFlags, MessageCache, RrsetCache};
use resolve_config::{IteratorConfig, ZoneConfig};
use resolve_proto::{DelegationPoint, MessageFlags, MessageReply, QueryKey, Rrset, RrsetRef};

use crate::error::EngineError;
use crate::module::Module;
use crate::outbound::OutboundMultiplexer;
use crate::qstate::{IterSubstate, QStateId, QueryArena};
use crate::Upstream;

/// A configured root hint: a root nameserver's name and one known address.
#[derive(Debug, Clone)]
pub struct RootHint {
    pub name: Name,
    pub addr: IpAddr,
}

/// Outcome of classifying an upstream reply against the query it answers
/// (spec §4.2 "Query-response decision tree").
enum Classification {
    Answer,
    Cname(Name),
    Referral(DelegationPoint),
    Throwaway,
}

pub struct Iterator<'e, U: Upstream> {
    pub rrset_cache: &'e RrsetCache,
    pub message_cache: &'e MessageCache,
    pub infra_cache: &'e InfraCache,
    pub upstream: &'e U,
    pub config: &'e IteratorConfig,
    pub cache_min_ttl: Duration,
    pub cache_max_ttl: Duration,
    pub root_hints: &'e [RootHint],
    pub zones: &'e [ZoneConfig],
    pub use_caps_for_id: bool,
}

impl<'e, U: Upstream> Module for Iterator<'e, U> {}

impl<'e, U: Upstream> Iterator<'e, U> {
    /// Resolve `qid`'s query key, recursing into sub-queries (target glue,
    /// CNAME restarts are handled in-loop, referrals descend in-loop) as
    /// needed. `depth` bounds recursion depth for cycle/fan-out control and
    /// is compared against `max_subquery_depth`.
    pub async fn resolve(&self, arena: &mut QueryArena, qid: QStateId, now: Instant) -> Result<MessageReply, EngineError> {
        arena.get_mut(qid).iter_substate = IterSubstate::Init;
        let mut qkey = arena.get(qid).qkey.clone();
        let depth = arena.get(qid).depth;

        if let Some(reply) = self.message_cache.get(&qkey, self.rrset_cache, now) {
            arena.get_mut(qid).iter_substate = IterSubstate::Finished;
            return Ok(reply);
        }

        if depth > self.config.max_subquery_depth {
            return Err(EngineError::ResourceExhausted(format!(
                "sub-query depth {depth} exceeds max-subquery-depth"
            )));
        }

        if let Some(zone) = self.matching_zone(&qkey.name) {
            if !zone.is_stub {
                if let Some(result) = self.resolve_via_forward_zone(&qkey, zone, now).await {
                    return result;
                }
                // forward_first with every forwarder SERVFAILing: fall back to
                // ordinary recursion as if the forward zone were never configured.
            } else if zone.stub_prime {
                self.prime_stub_zone(zone, now).await?;
            }
        }

        let mut delegation = self.find_delegation(arena, qid, &qkey.name, depth, now).await?;

        loop {
            arena.get_mut(qid).iter_substate = IterSubstate::QueryTargets;
            if arena.get(qid).referral_count > self.config.max_referral_count {
                return Err(EngineError::ResourceExhausted("referral count exceeded".into()));
            }

            let target = match self.pick_target(arena, qid, &mut delegation, depth, now).await? {
                Some(t) => t,
                None => {
                    return Err(EngineError::Lame {
                        server: "none".into(),
                        zone: delegation.apex.to_ascii(),
                    });
                }
            };

            let mut query_msg = Message::new();
            query_msg.add_query(Query::query(qkey.name.clone(), qkey.record_type));
            query_msg.set_recursion_desired(false);

            let mux = OutboundMultiplexer {
                upstream: self.upstream,
                infra: self.infra_cache,
                outbound_msg_retry: self.config.outbound_msg_retry,
                useful_server_top_timeout: Duration::from_millis(self.config.useful_server_top_timeout_ms),
                use_caps_for_id: self.use_caps_for_id,
            };

            arena.get_mut(qid).iter_substate = IterSubstate::QueryResponse;
            delegation.mark_tried(target);
            let reply = match mux.query(SocketAddr::new(target, 53), &delegation.apex, query_msg).await {
                Ok(r) => r,
                Err(_) => {
                    self.infra_cache.mark_lame(
                        target,
                        &delegation.apex,
                        LamenessFlags { fully_lame: true, ..Default::default() },
                        now,
                    );
                    delegation.mark_lame(target);
                    continue;
                }
            };

            match self.classify(&reply, &qkey, &delegation) {
                Classification::Answer => {
                    return Ok(self.cache_answer(&qkey, &reply, &delegation, now));
                }
                Classification::Cname(target_name) => {
                    self.cache_sections(&reply, &delegation, now);
                    arena.get_mut(qid).restart_count += 1;
                    if arena.get(qid).restart_count > self.config.max_restart_count {
                        return Err(EngineError::ResourceExhausted("CNAME restart count exceeded".into()));
                    }
                    qkey = QueryKey::new(target_name, qkey.record_type, qkey.dns_class);
                    arena.get_mut(qid).qkey = qkey.clone();
                    arena.get_mut(qid).iter_substate = IterSubstate::Init;

                    if let Some(reply) = self.message_cache.get(&qkey, self.rrset_cache, now) {
                        return Ok(reply);
                    }
                    delegation = self.find_delegation(arena, qid, &qkey.name, depth, now).await?;
                }
                Classification::Referral(new_delegation) => {
                    self.cache_sections(&reply, &delegation, now);
                    arena.get_mut(qid).referral_count += 1;
                    delegation = new_delegation;
                }
                Classification::Throwaway => {
                    self.infra_cache.mark_lame(
                        target,
                        &delegation.apex,
                        LamenessFlags { fully_lame: true, ..Default::default() },
                        now,
                    );
                    delegation.mark_lame(target);
                }
            }
        }
    }

    /// Determine the delegation point to start (or resume) iteration from:
    /// the deepest cached NS RRset enclosing `qname`, or root hints with a
    /// priming sub-query for the root NS set if the cache has nothing (spec
    /// §4.2 "Init").
    async fn find_delegation(
        &self,
        arena: &mut QueryArena,
        qid: QStateId,
        qname: &Name,
        depth: u32,
        now: Instant,
    ) -> Result<DelegationPoint, EngineError> {
        if let Some((apex, ns_rrset)) = self.rrset_cache.deepest_ns(qname, now) {
            let ns_names = ns_rrset.rdata.iter().filter_map(|r| match r {
                RData::NS(ns) => Some(ns.0.clone()),
                _ => None,
            });
            let mut dp = DelegationPoint::new(apex, ns_names);
            for name in dp.ns_names().cloned().collect::<Vec<_>>() {
                if let Some(addrs) = self.cached_addresses(&name, now) {
                    let target = dp.targets.get_mut(&name).expect("just inserted");
                    target.addresses = addrs;
                    target.a_resolved = true;
                    target.aaaa_resolved = true;
                }
            }
            return Ok(dp);
        }

        if let Some(zone) = self.matching_zone(qname) {
            if zone.is_stub {
                return self.stub_delegation(zone);
            }
        }

        arena.get_mut(qid).iter_substate = IterSubstate::PrimeResponse;
        if self.root_hints.is_empty() {
            return Err(EngineError::ConfigError("no root hints configured".into()));
        }

        let root = Name::root();
        let mut dp = DelegationPoint::new(root.clone(), self.root_hints.iter().map(|h| h.name.clone()));
        for hint in self.root_hints {
            if let Some(target) = dp.targets.get_mut(&hint.name) {
                target.addresses.push(hint.addr);
                target.a_resolved = true;
                target.aaaa_resolved = true;
            }
        }
        let _ = depth;
        Ok(dp)
    }

    fn cached_addresses(&self, name: &Name, now: Instant) -> Option<Vec<IpAddr>> {
        let a = self.rrset_cache.get(&QueryKey::new(name.clone(), RecordType::A, DNSClass::IN), now);
        let aaaa = self.rrset_cache.get(&QueryKey::new(name.clone(), RecordType::AAAA, DNSClass::IN), now);
        if a.is_none() && aaaa.is_none() {
            return None;
        }
        let mut addrs = Vec::new();
        if let Some(rr) = a {
            addrs.extend(rr.rdata.iter().filter_map(|r| match r {
                RData::A(ip) => Some(IpAddr::V4(ip.0)),
                _ => None,
            }));
        }
        if let Some(rr) = aaaa {
            addrs.extend(rr.rdata.iter().filter_map(|r| match r {
                RData::AAAA(ip) => Some(IpAddr::V6(ip.0)),
                _ => None,
            }));
        }
        Some(addrs)
    }

    /// The most specific configured stub/forward zone covering `qname`, if
    /// any (spec §6 "a zone name, one or more upstream hosts/addrs").
    fn matching_zone(&self, qname: &Name) -> Option<&'e ZoneConfig> {
        self.zones
            .iter()
            .filter_map(|z| Name::from_str(&z.name).ok().map(|apex| (z, apex)))
            .filter(|(_, apex)| apex.zone_of(qname))
            .max_by_key(|(_, apex)| apex.num_labels())
            .map(|(z, _)| z)
    }

    /// A stub zone's configured upstreams function as its (synthetic)
    /// delegation point, seeded directly rather than discovered through an
    /// NS referral (spec §6 "stub zone").
    fn stub_delegation(&self, zone: &ZoneConfig) -> Result<DelegationPoint, EngineError> {
        let apex = Name::from_str(&zone.name).map_err(|_| EngineError::ConfigError(format!("invalid zone name {}", zone.name)))?;
        let upstreams = parse_upstreams(&zone.upstreams);
        if upstreams.is_empty() {
            return Err(EngineError::ConfigError(format!("zone {} names no usable upstream addresses", zone.name)));
        }

        let synthetic_names: Vec<Name> = (0..upstreams.len())
            .map(|i| Name::from_str(&format!("stub-upstream-{i}.{}", zone.name)).unwrap_or_else(|_| apex.clone()))
            .collect();
        let mut dp = DelegationPoint::new(apex, synthetic_names.iter().cloned());
        for (name, addr) in synthetic_names.iter().zip(upstreams.iter()) {
            if let Some(target) = dp.targets.get_mut(name) {
                target.addresses.push(addr.ip());
                target.a_resolved = true;
                target.aaaa_resolved = true;
            }
        }
        Ok(dp)
    }

    /// Prime a stub zone by fetching its NS set from its configured
    /// upstreams before it's used (spec §6 "stub-prime"); priming failure
    /// is fatal to the query, since there is no other delegation point to
    /// recurse from (SPEC_FULL §9.1.i).
    async fn prime_stub_zone(&self, zone: &ZoneConfig, now: Instant) -> Result<(), EngineError> {
        let apex = Name::from_str(&zone.name).map_err(|_| EngineError::ConfigError(format!("invalid zone name {}", zone.name)))?;
        let delegation = self.stub_delegation(zone)?;

        let mux = OutboundMultiplexer {
            upstream: self.upstream,
            infra: self.infra_cache,
            outbound_msg_retry: self.config.outbound_msg_retry,
            useful_server_top_timeout: Duration::from_millis(self.config.useful_server_top_timeout_ms),
            use_caps_for_id: self.use_caps_for_id,
        };

        for addr in delegation.candidate_addresses() {
            let mut msg = Message::new();
            msg.add_query(Query::query(apex.clone(), RecordType::NS));
            msg.set_recursion_desired(false);
            let Ok(reply) = mux.query(SocketAddr::new(addr, 53), &apex, msg).await else {
                continue;
            };
            if reply.response_code() == ResponseCode::NoError && reply.answers().iter().any(|r| r.record_type() == RecordType::NS) {
                for group in group_by_name_type(reply.answers()) {
                    self.rrset_cache.insert(Rrset::new(group.name, group.record_type, group.dns_class, group.ttl, group.rdata, now), now);
                }
                self.cache_sections(&reply, &delegation, now);
                return Ok(());
            }
        }
        Err(EngineError::ConfigError(format!("priming of stub zone {} failed", zone.name)))
    }

    /// Forward a query straight to a forward zone's configured upstreams
    /// rather than walking delegations (spec §6 "forward zone"). Returns
    /// `None` when every forwarder SERVFAILed and `forward_first` permits
    /// falling back to ordinary recursion (SPEC_FULL §9.1.i).
    async fn resolve_via_forward_zone(&self, qkey: &QueryKey, zone: &ZoneConfig, now: Instant) -> Option<Result<MessageReply, EngineError>> {
        let apex = Name::from_str(&zone.name).unwrap_or_else(|_| Name::root());
        let upstreams = parse_upstreams(&zone.upstreams);
        if upstreams.is_empty() {
            return Some(Err(EngineError::ConfigError(format!("zone {} names no usable upstream addresses", zone.name))));
        }

        let mux = OutboundMultiplexer {
            upstream: self.upstream,
            infra: self.infra_cache,
            outbound_msg_retry: self.config.outbound_msg_retry,
            useful_server_top_timeout: Duration::from_millis(self.config.useful_server_top_timeout_ms),
            use_caps_for_id: self.use_caps_for_id,
        };

        for addr in &upstreams {
            let mut msg = Message::new();
            msg.add_query(Query::query(qkey.name.clone(), qkey.record_type));
            msg.set_recursion_desired(true);
            let Ok(reply) = mux.query(*addr, &apex, msg).await else {
                continue;
            };
            if reply.response_code() != ResponseCode::ServFail {
                let delegation = DelegationPoint::new(apex, std::iter::empty());
                return Some(Ok(self.cache_answer(qkey, &reply, &delegation, now)));
            }
        }

        if zone.forward_first {
            None
        } else {
            Some(Err(EngineError::ResourceExhausted(format!("all forwarders for zone {} failed", zone.name))))
        }
    }

    /// Select the next target address to try (spec §4.2 "Query-targets"),
    /// resolving glue for a nameserver with no known address first if the
    /// target-fetch policy at this depth allows it.
    async fn pick_target(
        &self,
        arena: &mut QueryArena,
        qid: QStateId,
        delegation: &mut DelegationPoint,
        depth: u32,
        now: Instant,
    ) -> Result<Option<IpAddr>, EngineError> {
        loop {
            let mut best: Option<(IpAddr, Duration)> = None;
            for addr in delegation.candidate_addresses() {
                if self.infra_cache.is_lame(addr, &delegation.apex, now) {
                    continue;
                }
                let rtt = self
                    .infra_cache
                    .rtt(addr, &delegation.apex, now)
                    .unwrap_or(Duration::from_millis(self.config.unknown_server_niceness_ms));
                if rtt >= Duration::from_millis(self.config.useful_server_top_timeout_ms) {
                    continue;
                }
                if best.map(|(_, best_rtt)| rtt < best_rtt).unwrap_or(true) {
                    best = Some((addr, rtt));
                }
            }
            if let Some((addr, _)) = best {
                return Ok(Some(addr));
            }

            let fetch_limit = self
                .config
                .target_fetch_policy
                .get(depth as usize)
                .copied()
                .unwrap_or(*self.config.target_fetch_policy.last().unwrap_or(&0));
            if fetch_limit == 0 {
                return Ok(None);
            }

            let Some(missing) = delegation.missing_server().cloned() else {
                return Ok(None);
            };
            delegation.mark_probed(&missing);

            for rtype in [RecordType::A, RecordType::AAAA] {
                let sub_key = QueryKey::new(missing.clone(), rtype, DNSClass::IN);
                if arena.would_cycle(&sub_key, depth + 1) {
                    continue;
                }
                let sub_id = arena.insert(sub_key.clone(), depth + 1);
                arena.get_mut(sub_id).supers.push(qid);
                let result = Box::pin(self.resolve(arena, sub_id, now)).await;
                arena.remove(sub_id);
                if let Ok(reply) = result {
                    for rr in reply.answer {
                        if let Some(rrset) = self.rrset_cache.get(&QueryKey::new(rr.name, rr.record_type, rr.dns_class), now) {
                            if let Some(target) = delegation.targets.get_mut(&missing) {
                                match rtype {
                                    RecordType::A => {
                                        target.addresses.extend(rrset.rdata.iter().filter_map(|r| match r {
                                            RData::A(ip) => Some(IpAddr::V4(ip.0)),
                                            _ => None,
                                        }));
                                        target.a_resolved = true;
                                    }
                                    RecordType::AAAA => {
                                        target.addresses.extend(rrset.rdata.iter().filter_map(|r| match r {
                                            RData::AAAA(ip) => Some(IpAddr::V6(ip.0)),
                                            _ => None,
                                        }));
                                        target.aaaa_resolved = true;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                }
            }

            if delegation.candidate_addresses().is_empty() && delegation.missing_server().is_none() {
                return Ok(None);
            }
        }
    }

    /// Classify an upstream reply against the query it purports to answer
    /// (spec §4.2 "Query-response decision tree"), discarding out-of-
    /// bailiwick data per spec §4.2 "Bailiwick" along the way.
    fn classify(&self, reply: &Message, qkey: &QueryKey, delegation: &DelegationPoint) -> Classification {
        if reply.response_code() != ResponseCode::NoError && reply.response_code() != ResponseCode::NXDomain {
            return Classification::Throwaway;
        }

        let in_bailiwick = |r: &Record| delegation.apex.zone_of(r.name());

        let answers: Vec<&Record> = reply.answers().iter().filter(|r| in_bailiwick(r)).collect();

        if answers.iter().any(|r| r.record_type() == qkey.record_type && r.name() == &qkey.name) {
            return Classification::Answer;
        }

        if let Some(cname) = answers.iter().find_map(|r| match r.data() {
            RData::CNAME(c) if r.name() == &qkey.name => Some(c.0.clone()),
            _ => None,
        }) {
            return Classification::Cname(cname);
        }

        let authority_ns: Vec<&Record> = reply
            .name_servers()
            .iter()
            .filter(|r| r.record_type() == RecordType::NS && delegation.apex.zone_of(r.name()) && r.name() != &delegation.apex)
            .collect();

        if answers.is_empty() && !authority_ns.is_empty() {
            let apex = authority_ns[0].name().clone();
            let ns_names = authority_ns.iter().filter_map(|r| match r.data() {
                RData::NS(ns) => Some(ns.0.clone()),
                _ => None,
            });
            let mut dp = DelegationPoint::new(apex.clone(), ns_names);
            for glue in reply.additionals().iter().filter(|r| apex.zone_of(r.name())) {
                dp.add_glue(glue);
            }
            return Classification::Referral(dp);
        }

        let has_soa = reply.name_servers().iter().any(|r| r.record_type() == RecordType::SOA && in_bailiwick(r));
        if answers.is_empty() && (reply.response_code() == ResponseCode::NXDomain || has_soa) {
            return Classification::Answer;
        }

        Classification::Throwaway
    }

    /// Insert every in-bailiwick RRset from a reply's answer section into
    /// the caches and build the reply record the client (or super-query)
    /// sees (spec §4.2 "Answer" / §4.4).
    fn cache_answer(&self, qkey: &QueryKey, reply: &Message, delegation: &DelegationPoint, now: Instant) -> MessageReply {
        let rcode = reply.response_code();
        let mut out = MessageReply::new(qkey.clone(), rcode, MessageFlags::default(), now + self.cache_max_ttl);

        let mut min_ttl = self.cache_max_ttl;
        for group in group_by_name_type(reply.answers()) {
            if !delegation.apex.zone_of(&group.name) {
                continue;
            }
            let rrset = Rrset::new(group.name.clone(), group.record_type, group.dns_class, group.ttl, group.rdata, now);
            let stored = self.rrset_cache.insert(rrset, now);
            min_ttl = min_ttl.min(stored.ttl_remaining(now));
            out.answer.push(RrsetRef {
                name: stored.name,
                record_type: stored.record_type,
                dns_class: stored.dns_class,
                version: stored.version,
            });
        }
        for group in group_by_name_type(reply.name_servers()) {
            if !delegation.apex.zone_of(&group.name) {
                continue;
            }
            let rrset = Rrset::new(group.name.clone(), group.record_type, group.dns_class, group.ttl, group.rdata, now);
            let stored = self.rrset_cache.insert(rrset, now);
            min_ttl = min_ttl.min(stored.ttl_remaining(now));
            out.authority.push(RrsetRef {
                name: stored.name,
                record_type: stored.record_type,
                dns_class: stored.dns_class,
                version: stored.version,
            });
        }
        out.expiry = now + min_ttl.max(self.cache_min_ttl);
        self.message_cache.insert(out.clone());
        out
    }

    /// Cache NS/glue RRsets seen along the way (CNAME hops, referrals) so
    /// later iteration steps in the same descent can reuse them (spec §4.2
    /// "Scrubbing": glue is scrubbed/cached alongside the referral it came
    /// with, not just the final answer).
    fn cache_sections(&self, reply: &Message, delegation: &DelegationPoint, now: Instant) {
        for group in group_by_name_type(reply.answers())
            .into_iter()
            .chain(group_by_name_type(reply.name_servers()))
        {
            if !delegation.apex.zone_of(&group.name) {
                continue;
            }
            self.rrset_cache.insert(
                Rrset::new(group.name, group.record_type, group.dns_class, group.ttl, group.rdata, now),
                now,
            );
        }
        for group in group_by_name_type(reply.additionals()) {
            self.rrset_cache.insert(
                Rrset::new(group.name, group.record_type, group.dns_class, group.ttl, group.rdata, now),
                now,
            );
        }
    }
}

/// Parse a zone's configured upstream strings (spec §6: "upstream
/// hosts/addrs") as socket addresses, defaulting to port 53 when only an IP
/// is given.
fn parse_upstreams(upstreams: &[String]) -> Vec<SocketAddr> {
    upstreams
        .iter()
        .filter_map(|s| s.parse::<SocketAddr>().ok().or_else(|| s.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, 53))))
        .collect()
}

struct RecordGroup {
    name: Name,
    record_type: RecordType,
    dns_class: DNSClass,
    ttl: Duration,
    rdata: Vec<RData>,
}

/// Fold a section's records into per-(name, type, class) RRsets, TTL the
/// minimum observed for that group (RFC 2181 §5.2).
fn group_by_name_type(records: &[Record]) -> Vec<RecordGroup> {
    let mut groups: Vec<RecordGroup> = Vec::new();
    for r in records {
        if let Some(g) = groups
            .iter_mut()
            .find(|g| &g.name == r.name() && g.record_type == r.record_type() && g.dns_class == r.dns_class())
        {
            g.ttl = g.ttl.min(Duration::from_secs(r.ttl() as u64));
            g.rdata.push(r.data().clone());
        } else {
            groups.push(RecordGroup {
                name: r.name().clone(),
                record_type: r.record_type(),
                dns_class: r.dns_class(),
                ttl: Duration::from_secs(r.ttl() as u64),
                rdata: vec![r.data().clone()],
            });
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::UpstreamError;
    use async_trait::async_trait;
    use resolve_config::IteratorConfig;
    use std::net::Ipv4Addr;
    use std::num::NonZeroUsize;
    use std::str::FromStr;
    use std::sync::Mutex;

    struct MockUpstream {
        responses: Mutex<std::collections::HashMap<SocketAddr, Message>>,
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn send(&self, target: SocketAddr, message: Message, _tcp: bool) -> Result<Message, UpstreamError> {
            let responses = self.responses.lock().unwrap();
            let mut reply = responses.get(&target).cloned().ok_or(UpstreamError::Timeout)?;
            reply.set_id(message.id());
            Ok(reply)
        }
    }

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn answer_message(qname: &Name, ip: Ipv4Addr) -> Message {
        let mut msg = Message::new();
        msg.add_query(Query::query(qname.clone(), RecordType::A));
        msg.add_answer(Record::from_rdata(qname.clone(), 300, RData::A(ip.into())));
        msg
    }

    #[tokio::test]
    async fn fresh_answer_from_root_hint_is_cached_and_returned() {
        let rrset_cache = RrsetCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let message_cache = MessageCache::new(4, NonZeroUsize::new(16).unwrap());
        let infra_cache = InfraCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(900), Duration::from_secs(120));
        let root_addr: SocketAddr = "198.51.100.1:53".parse().unwrap();

        let mut responses = std::collections::HashMap::new();
        responses.insert(root_addr, answer_message(&name("example.test."), Ipv4Addr::new(203, 0, 113, 10)));
        let upstream = MockUpstream { responses: Mutex::new(responses) };

        let config = IteratorConfig::default();
        let root_hints = vec![RootHint { name: name("a.root-servers.test."), addr: root_addr.ip() }];

        let iterator = Iterator {
            rrset_cache: &rrset_cache,
            message_cache: &message_cache,
            infra_cache: &infra_cache,
            upstream: &upstream,
            config: &config,
            cache_min_ttl: Duration::from_secs(0),
            cache_max_ttl: Duration::from_secs(86400),
            root_hints: &root_hints,
            zones: &[],
            use_caps_for_id: false,
        };

        let mut arena = QueryArena::new();
        let qid = arena.insert(QueryKey::in_class(name("example.test."), RecordType::A), 0);
        let now = Instant::now();
        let reply = iterator.resolve(&mut arena, qid, now).await.unwrap();

        assert_eq!(reply.rcode, ResponseCode::NoError);
        assert_eq!(reply.answer.len(), 1);
        assert!(message_cache.get(&arena.get(qid).qkey, &rrset_cache, now).is_some());
    }

    #[tokio::test]
    async fn message_cache_hit_short_circuits_without_querying_upstream() {
        let rrset_cache = RrsetCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let message_cache = MessageCache::new(4, NonZeroUsize::new(16).unwrap());
        let infra_cache = InfraCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(900), Duration::from_secs(120));
        let upstream = MockUpstream { responses: Mutex::new(std::collections::HashMap::new()) };
        let config = IteratorConfig::default();
        let root_hints: Vec<RootHint> = Vec::new();

        let iterator = Iterator {
            rrset_cache: &rrset_cache,
            message_cache: &message_cache,
            infra_cache: &infra_cache,
            upstream: &upstream,
            config: &config,
            cache_min_ttl: Duration::from_secs(0),
            cache_max_ttl: Duration::from_secs(86400),
            root_hints: &root_hints,
            zones: &[],
            use_caps_for_id: false,
        };

        let now = Instant::now();
        let qkey = QueryKey::in_class(name("cached.test."), RecordType::A);
        let rrset = Rrset::new(
            name("cached.test."),
            RecordType::A,
            DNSClass::IN,
            Duration::from_secs(60),
            vec![RData::A(Ipv4Addr::new(203, 0, 113, 20).into())],
            now,
        );
        let stored = rrset_cache.insert(rrset, now);
        let mut reply = MessageReply::new(qkey.clone(), ResponseCode::NoError, MessageFlags::default(), now + Duration::from_secs(60));
        reply.answer.push(RrsetRef {
            name: stored.name,
            record_type: stored.record_type,
            dns_class: stored.dns_class,
            version: stored.version,
        });
        message_cache.insert(reply);

        let mut arena = QueryArena::new();
        let qid = arena.insert(qkey, 0);
        let result = iterator.resolve(&mut arena, qid, now).await.unwrap();
        assert_eq!(result.answer.len(), 1);
    }

    #[tokio::test]
    async fn no_root_hints_and_no_cached_delegation_is_a_config_error() {
        let rrset_cache = RrsetCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let message_cache = MessageCache::new(4, NonZeroUsize::new(16).unwrap());
        let infra_cache = InfraCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(900), Duration::from_secs(120));
        let upstream = MockUpstream { responses: Mutex::new(std::collections::HashMap::new()) };
        let config = IteratorConfig::default();
        let root_hints: Vec<RootHint> = Vec::new();

        let iterator = Iterator {
            rrset_cache: &rrset_cache,
            message_cache: &message_cache,
            infra_cache: &infra_cache,
            upstream: &upstream,
            config: &config,
            cache_min_ttl: Duration::from_secs(0),
            cache_max_ttl: Duration::from_secs(86400),
            root_hints: &root_hints,
            zones: &[],
            use_caps_for_id: false,
        };

        let mut arena = QueryArena::new();
        let qid = arena.insert(QueryKey::in_class(name("example.test."), RecordType::A), 0);
        let err = iterator.resolve(&mut arena, qid, Instant::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigError(_)));
    }

    fn servfail_message(qname: &Name) -> Message {
        let mut msg = Message::new();
        msg.add_query(Query::query(qname.clone(), RecordType::A));
        msg.set_response_code(ResponseCode::ServFail);
        msg
    }

    #[tokio::test]
    async fn forward_first_falls_back_to_recursion() {
        let rrset_cache = RrsetCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let message_cache = MessageCache::new(4, NonZeroUsize::new(16).unwrap());
        let infra_cache = InfraCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(900), Duration::from_secs(120));
        let forwarder: SocketAddr = "198.51.100.5:53".parse().unwrap();
        let root_addr: SocketAddr = "198.51.100.1:53".parse().unwrap();
        let qname = name("example.test.");

        let mut responses = std::collections::HashMap::new();
        responses.insert(forwarder, servfail_message(&qname));
        responses.insert(root_addr, answer_message(&qname, Ipv4Addr::new(203, 0, 113, 10)));
        let upstream = MockUpstream { responses: Mutex::new(responses) };

        let config = IteratorConfig::default();
        let root_hints = vec![RootHint { name: name("a.root-servers.test."), addr: root_addr.ip() }];
        let zones = vec![ZoneConfig {
            name: "example.test.".into(),
            upstreams: vec![forwarder.to_string()],
            forward_first: true,
            is_stub: false,
            stub_prime: false,
        }];

        let iterator = Iterator {
            rrset_cache: &rrset_cache,
            message_cache: &message_cache,
            infra_cache: &infra_cache,
            upstream: &upstream,
            config: &config,
            cache_min_ttl: Duration::from_secs(0),
            cache_max_ttl: Duration::from_secs(86400),
            root_hints: &root_hints,
            zones: &zones,
            use_caps_for_id: false,
        };

        let mut arena = QueryArena::new();
        let qid = arena.insert(QueryKey::in_class(qname, RecordType::A), 0);
        let reply = iterator.resolve(&mut arena, qid, Instant::now()).await.unwrap();
        assert_eq!(reply.rcode, ResponseCode::NoError);
        assert_eq!(reply.answer.len(), 1);
    }

    #[tokio::test]
    async fn forward_first_false_does_not_fall_back() {
        let rrset_cache = RrsetCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let message_cache = MessageCache::new(4, NonZeroUsize::new(16).unwrap());
        let infra_cache = InfraCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(900), Duration::from_secs(120));
        let forwarder: SocketAddr = "198.51.100.5:53".parse().unwrap();
        let root_addr: SocketAddr = "198.51.100.1:53".parse().unwrap();
        let qname = name("example.test.");

        let mut responses = std::collections::HashMap::new();
        responses.insert(forwarder, servfail_message(&qname));
        responses.insert(root_addr, answer_message(&qname, Ipv4Addr::new(203, 0, 113, 10)));
        let upstream = MockUpstream { responses: Mutex::new(responses) };

        let config = IteratorConfig::default();
        let root_hints = vec![RootHint { name: name("a.root-servers.test."), addr: root_addr.ip() }];
        let zones = vec![ZoneConfig {
            name: "example.test.".into(),
            upstreams: vec![forwarder.to_string()],
            forward_first: false,
            is_stub: false,
            stub_prime: false,
        }];

        let iterator = Iterator {
            rrset_cache: &rrset_cache,
            message_cache: &message_cache,
            infra_cache: &infra_cache,
            upstream: &upstream,
            config: &config,
            cache_min_ttl: Duration::from_secs(0),
            cache_max_ttl: Duration::from_secs(86400),
            root_hints: &root_hints,
            zones: &zones,
            use_caps_for_id: false,
        };

        let mut arena = QueryArena::new();
        let qid = arena.insert(QueryKey::in_class(qname, RecordType::A), 0);
        let err = iterator.resolve(&mut arena, qid, Instant::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::ResourceExhausted(_)));
    }

    #[tokio::test]
    async fn stub_prime_failure_is_fatal() {
        let rrset_cache = RrsetCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let message_cache = MessageCache::new(4, NonZeroUsize::new(16).unwrap());
        let infra_cache = InfraCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(900), Duration::from_secs(120));
        let stub_upstream_addr: SocketAddr = "198.51.100.9:53".parse().unwrap();
        let qname = name("corp.internal.");

        // The stub upstream never answers with an NS record, so priming fails.
        let mut responses = std::collections::HashMap::new();
        responses.insert(stub_upstream_addr, answer_message(&qname, Ipv4Addr::new(203, 0, 113, 30)));
        let upstream = MockUpstream { responses: Mutex::new(responses) };

        let config = IteratorConfig::default();
        let root_hints: Vec<RootHint> = Vec::new();
        let zones = vec![ZoneConfig {
            name: "corp.internal.".into(),
            upstreams: vec![stub_upstream_addr.to_string()],
            forward_first: false,
            is_stub: true,
            stub_prime: true,
        }];

        let iterator = Iterator {
            rrset_cache: &rrset_cache,
            message_cache: &message_cache,
            infra_cache: &infra_cache,
            upstream: &upstream,
            config: &config,
            cache_min_ttl: Duration::from_secs(0),
            cache_max_ttl: Duration::from_secs(86400),
            root_hints: &root_hints,
            zones: &zones,
            use_caps_for_id: false,
        };

        let mut arena = QueryArena::new();
        let qid = arena.insert(QueryKey::in_class(name("host.corp.internal."), RecordType::A), 0);
        let err = iterator.resolve(&mut arena, qid, Instant::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigError(_)));
    }
}
