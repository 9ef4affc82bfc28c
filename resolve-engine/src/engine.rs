//! Top-level engine: owns the shared caches and trust anchors, and drives
//! one client query through the module chain (validator → iterator, spec
//! §9) per call to [`Engine::resolve`].

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use resolve_cache::{EcsCache, InfraCache, KeyCache, MessageCache, RrsetCache};
use resolve_config::Config;
use resolve_proto::{MessageFlags, MessageReply, QueryKey, SecurityStatus, TrustAnchor};

use crate::error::EngineError;
use crate::iterator::{Iterator as IteratorModule, RootHint};
use crate::outbound::Upstream;
use crate::qstate::QueryArena;
use crate::validator::Validator;

pub struct Engine<U: Upstream> {
    pub rrset_cache: RrsetCache,
    pub message_cache: MessageCache,
    pub infra_cache: InfraCache,
    pub key_cache: KeyCache,
    /// EDNS client-subnet cache keyspace (spec §4.7): answers keyed by
    /// qkey and the requesting client's network, not just qkey.
    pub ecs_cache: EcsCache<MessageReply>,
    pub trust_anchors: Vec<TrustAnchor>,
    pub root_hints: Vec<RootHint>,
    pub config: Config,
    pub upstream: U,
}

/// RFC 7871 recommends authorities not consider more than these prefix
/// lengths when answering; they also bound how finely this resolver's own
/// ECS cache subdivides the address space.
const ECS_MAX_DEPTH_V4: u8 = 24;
const ECS_MAX_DEPTH_V6: u8 = 56;

impl<U: Upstream> Engine<U> {
    pub fn new(config: Config, upstream: U, trust_anchors: Vec<TrustAnchor>, root_hints: Vec<RootHint>) -> Self {
        let slab = |c: resolve_config::CacheSlabConfig| (c.slabs, NonZeroUsize::new(c.size_per_slab.max(1)).unwrap());

        let (msg_slabs, msg_cap) = slab(config.cache_sizes.msg);
        let (rrset_slabs, rrset_cap) = slab(config.cache_sizes.rrset);
        let (key_slabs, key_cap) = slab(config.cache_sizes.key);
        let (infra_slabs, infra_cap) = slab(config.cache_sizes.infra);

        Self {
            rrset_cache: RrsetCache::new(
                rrset_slabs,
                rrset_cap,
                Duration::from_secs(config.ttl_bounds.cache_min_ttl),
                Duration::from_secs(config.ttl_bounds.cache_max_ttl),
            ),
            message_cache: MessageCache::new(msg_slabs, msg_cap),
            infra_cache: InfraCache::new(
                infra_slabs,
                infra_cap,
                Duration::from_secs(config.iterator.host_ttl_secs),
                Duration::from_millis(config.iterator.useful_server_top_timeout_ms),
            ),
            key_cache: KeyCache::new(key_slabs, key_cap),
            ecs_cache: EcsCache::new(ECS_MAX_DEPTH_V4, ECS_MAX_DEPTH_V6),
            trust_anchors,
            root_hints,
            config,
            upstream,
        }
    }

    fn iterator(&self) -> IteratorModule<'_, U> {
        IteratorModule {
            rrset_cache: &self.rrset_cache,
            message_cache: &self.message_cache,
            infra_cache: &self.infra_cache,
            upstream: &self.upstream,
            config: &self.config.iterator,
            cache_min_ttl: Duration::from_secs(self.config.ttl_bounds.cache_min_ttl),
            cache_max_ttl: Duration::from_secs(self.config.ttl_bounds.cache_max_ttl),
            root_hints: &self.root_hints,
            zones: &self.config.zones,
            use_caps_for_id: self.config.toggles.use_caps_for_id,
        }
    }

    /// Resolve one client query end to end: iterate to an answer, then (if
    /// a trust anchor covers the query) validate it, applying permissive-
    /// mode demotion and `ignore-cd` per spec §4.3/§7.
    ///
    /// `client_subnet` carries the requester's address and EDNS
    /// client-subnet source prefix, if the query included one; the answer
    /// is then served from (and recorded into) the ECS cache keyed by that
    /// network rather than the plain message cache (spec §4.7).
    pub async fn resolve(&self, qkey: QueryKey, checking_disabled: bool, client_subnet: Option<(IpAddr, u8)>) -> Result<MessageReply, EngineError> {
        let now = Instant::now();

        if let Some((client_ip, source_prefix)) = client_subnet {
            if let Some(cached) = self.ecs_cache.find(&qkey, client_ip, source_prefix) {
                if !cached.is_expired(now) && self.message_is_live(&cached) {
                    return Ok(cached);
                }
            }
        }

        let mut arena = QueryArena::new();
        let qid = arena.insert(qkey.clone(), 0);

        let iterator = self.iterator();
        let mut reply = iterator.resolve(&mut arena, qid, now).await?;

        let should_validate = !self.trust_anchors.is_empty() && (!checking_disabled || self.config.validator.ignore_cd_flag);
        if should_validate {
            let validator = Validator {
                key_cache: &self.key_cache,
                trust_anchors: &self.trust_anchors,
                config: &self.config.validator,
                iterator: &iterator,
                bogus_ttl: Duration::from_secs(self.config.ttl_bounds.bogus_ttl),
            };
            let status = validator.validate(&mut arena, qid, &reply, qkey.record_type, now).await;
            reply.flags.authentic_data = status == SecurityStatus::Secure;

            if status == SecurityStatus::Bogus {
                return Err(EngineError::ValidationBogus {
                    qkey,
                    reason: "DNSSEC validation failed".into(),
                });
            }
        }

        if let Some((client_ip, source_prefix)) = client_subnet {
            self.ecs_cache.insert(&qkey, client_ip, source_prefix, source_prefix, reply.clone());
        }

        Ok(reply)
    }

    /// Mirrors [`resolve_cache::MessageCache`]'s own liveness check: a
    /// cached reply is only good as long as every RRset it references is
    /// still the current version in the rrset cache.
    fn message_is_live(&self, reply: &MessageReply) -> bool {
        reply
            .answer
            .iter()
            .chain(reply.authority.iter())
            .chain(reply.additional.iter())
            .all(|r| {
                let key = QueryKey::new(r.name.clone(), r.record_type, r.dns_class);
                self.rrset_cache.version_of(&key) == Some(r.version)
            })
    }

    /// Build the SERVFAIL/FORMERR fallback a client-facing front end sends
    /// when [`Engine::resolve`] errors out (spec §7 "User-visible
    /// behaviour").
    pub fn error_reply(qkey: QueryKey, err: &EngineError, now: Instant) -> MessageReply {
        MessageReply::new(qkey, err.to_response_code(), MessageFlags::default(), now + Duration::from_secs(5))
    }
}
