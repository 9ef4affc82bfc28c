//! Validator module (spec §4.3): classifies a reply, walks the chain of
//! trust from the nearest configured anchor down to the signer, and
//! verifies RRSIGs over the answer/authority sections.
//!
//! Find-key sub-queries for DS/DNSKEY are ordinary [`crate::iterator`]
//! resolves at `depth + 1`, same as the iterator's own target-glue
//! sub-queries (spec §9 "sub-queries execute on the same worker as their
//! super").

use std::time::{Duration, Instant};

use chrono::Utc;
use hickory_proto::dnssec::rdata::{DNSKEY, DS, NSEC, NSEC3, RRSIG};
use hickory_proto::dnssec::public_key::PublicKey;
use hickory_proto::dnssec::{verify_nsec, Nsec3HashAlgorithm, Proof, Verifier};
use hickory_proto::op::{Message, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use resolve_cache::KeyCache;
use resolve_config::{Nsec3IterationLimit, ValidatorConfig};
use resolve_proto::{KeyEntry, MessageFlags, MessageReply, NullKeyReason, QueryKey, SecurityStatus, TrustAnchor};

use crate::iterator::Iterator as IteratorModule;
use crate::module::Module;
use crate::outbound::Upstream;
use crate::qstate::{QStateId, QueryArena, ValSubstate};

/// Message classification (spec §4.3 "Init").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Positive,
    Referral,
    Cname,
    Nodata,
    Nxdomain,
    AnyOther,
}

pub fn classify(message: &Message, qtype: RecordType) -> MessageClass {
    use hickory_proto::op::ResponseCode;

    if message.response_code() == ResponseCode::NXDomain {
        return MessageClass::Nxdomain;
    }
    if message.answers().iter().any(|r| r.record_type() == qtype) {
        return MessageClass::Positive;
    }
    if message.answers().iter().any(|r| r.record_type() == RecordType::CNAME) {
        return MessageClass::Cname;
    }
    if message.name_servers().iter().any(|r| r.record_type() == RecordType::NS) {
        return MessageClass::Referral;
    }
    if message.answers().is_empty() {
        return MessageClass::Nodata;
    }
    MessageClass::AnyOther
}

/// The owner of the RRSIGs covering a section: the first RRSIG's
/// `signer_name`, since a validly-signed RRset carries RRSIGs from a
/// single zone.
pub fn signer_name(records: &[Record]) -> Option<Name> {
    records.iter().find_map(|r| match r.data() {
        RData::DNSSEC(hickory_proto::dnssec::rdata::DNSSECRData::RRSIG(sig)) => Some(sig.signer_name().clone()),
        _ => None,
    })
}

fn rrsigs_for(records: &[Record], name: &Name, covered: RecordType) -> Vec<RRSIG> {
    records
        .iter()
        .filter_map(|r| match r.data() {
            RData::DNSSEC(hickory_proto::dnssec::rdata::DNSSECRData::RRSIG(sig))
                if r.name() == name && sig.type_covered() == covered =>
            {
                Some(sig.clone())
            }
            _ => None,
        })
        .collect()
}

fn covered_records<'a>(records: &'a [Record], name: &Name, rtype: RecordType) -> Vec<&'a Record> {
    records.iter().filter(|r| r.name() == name && r.record_type() == rtype).collect()
}

pub struct Validator<'e, U: Upstream> {
    pub key_cache: &'e KeyCache,
    pub trust_anchors: &'e [TrustAnchor],
    pub config: &'e ValidatorConfig,
    pub iterator: &'e IteratorModule<'e, U>,
    pub bogus_ttl: Duration,
}

impl<'e, U: Upstream> Module for Validator<'e, U> {}

impl<'e, U: Upstream> Validator<'e, U> {
    fn closest_anchor(&self, qname: &Name) -> Option<&'e TrustAnchor> {
        self.trust_anchors
            .iter()
            .filter(|a| a.name.zone_of(qname))
            .max_by_key(|a| a.name.num_labels())
    }

    fn now_seconds(&self) -> u32 {
        match &self.config.val_override_date {
            Some(date) => date.parse().unwrap_or(0),
            None => Utc::now().timestamp() as u32,
        }
    }

    fn nsec3_limit_for(&self, keysize: u32) -> Option<&Nsec3IterationLimit> {
        self.config
            .val_nsec3_keysize_iterations
            .iter()
            .filter(|l| keysize >= l.min_keysize)
            .max_by_key(|l| l.min_keysize)
    }

    /// Walk from the closest trust anchor down to `signer`, resolving
    /// DS/DNSKEY one zone cut at a time via the key cache or (on miss) a
    /// sub-query through the iterator (spec §4.3 "Find-key").
    async fn find_key(
        &self,
        arena: &mut QueryArena,
        qid: QStateId,
        signer: &Name,
        depth: u32,
        now: Instant,
    ) -> Result<Vec<DNSKEY>, SecurityStatus> {
        let Some(anchor) = self.closest_anchor(signer) else {
            return Err(SecurityStatus::Indeterminate);
        };

        if let Some(entry) = self.key_cache.get(signer, now) {
            return match entry {
                KeyEntry::Good { keys, .. } => Ok(keys),
                KeyEntry::Null { reason: NullKeyReason::ProvablyInsecure, .. } => Err(SecurityStatus::Insecure),
                KeyEntry::Null { .. } => Err(SecurityStatus::Bogus),
            };
        }

        if !anchor.dnskey.is_empty() && anchor.name == *signer {
            return Ok(anchor.dnskey.clone());
        }

        let ds_key = QueryKey::new(signer.clone(), RecordType::DS, DNSClass::IN);
        let dnskey_key = QueryKey::new(signer.clone(), RecordType::DNSKEY, DNSClass::IN);
        if arena.would_cycle(&ds_key, depth + 1) || arena.would_cycle(&dnskey_key, depth + 1) {
            return Err(SecurityStatus::Bogus);
        }

        let trusted_ds: Vec<DS> = if anchor.name == *signer {
            anchor.ds.clone()
        } else {
            self.fetch_ds(arena, qid, signer, depth, now).await
        };

        if trusted_ds.is_empty() {
            self.key_cache.insert(
                signer.clone(),
                KeyEntry::Null {
                    reason: NullKeyReason::Bad,
                    expiry: now + Duration::from_secs(self.config.null_key_ttl),
                },
            );
            return Err(SecurityStatus::Bogus);
        }

        let dnskey_id = arena.insert(dnskey_key, depth + 1);
        arena.get_mut(dnskey_id).supers.push(qid);
        let dnskey_reply = Box::pin(self.iterator.resolve(arena, dnskey_id, now)).await;
        arena.remove(dnskey_id);

        let keys: Vec<DNSKEY> = match dnskey_reply {
            Ok(reply) => reply
                .answer
                .iter()
                .filter_map(|r| self.iterator.rrset_cache.get(&QueryKey::new(r.name.clone(), r.record_type, r.dns_class), now))
                .flat_map(|rr| rr.rdata)
                .filter_map(|rd| match rd {
                    RData::DNSSEC(hickory_proto::dnssec::rdata::DNSSECRData::DNSKEY(k)) => Some(k),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        let verified = verify_keys_against_ds(keys, &trusted_ds, signer);

        if verified.is_empty() {
            self.key_cache.insert(
                signer.clone(),
                KeyEntry::Null {
                    reason: NullKeyReason::Bad,
                    expiry: now + Duration::from_secs(self.config.null_key_ttl),
                },
            );
            return Err(SecurityStatus::Bogus);
        }

        self.key_cache.insert(
            signer.clone(),
            KeyEntry::Good { keys: verified.clone(), expiry: now + Duration::from_secs(3600) },
        );
        Ok(verified)
    }

    /// Sub-query for the signer's DS rrset (spec §4.3 "Find-key": "a
    /// sub-query for DS ... then DNSKEY"). Returns the DS set the fetched
    /// DNSKEY must be checked against; empty means there is nothing to
    /// authenticate the child zone's keys with.
    async fn fetch_ds(&self, arena: &mut QueryArena, qid: QStateId, signer: &Name, depth: u32, now: Instant) -> Vec<DS> {
        let ds_key = QueryKey::new(signer.clone(), RecordType::DS, DNSClass::IN);
        let ds_id = arena.insert(ds_key, depth + 1);
        arena.get_mut(ds_id).supers.push(qid);
        let ds_reply = Box::pin(self.iterator.resolve(arena, ds_id, now)).await;
        arena.remove(ds_id);

        match ds_reply {
            Ok(reply) => reply
                .answer
                .iter()
                .filter_map(|r| self.iterator.rrset_cache.get(&QueryKey::new(r.name.clone(), r.record_type, r.dns_class), now))
                .flat_map(|rr| rr.rdata)
                .filter_map(|rd| match rd {
                    RData::DNSSEC(hickory_proto::dnssec::rdata::DNSSECRData::DS(ds)) => Some(ds),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Verify one RRset's RRSIGs against `keys` (spec §4.3 "Validate" steps
    /// 1-2). Skew bounds are honoured; a verified signature within the skew
    /// window yields `Secure`.
    fn verify_rrset(&self, records: &[&Record], sigs: &[RRSIG], keys: &[DNSKEY], name: &Name) -> SecurityStatus {
        if sigs.is_empty() {
            return SecurityStatus::Bogus;
        }
        let now = self.now_seconds();
        for sig in sigs {
            let key = keys.iter().find(|k| {
                k.algorithm() == sig.algorithm() && k.calculate_key_tag().map(|t| t == sig.key_tag()).unwrap_or(false)
            });
            let Some(key) = key else { continue };

            let inception = sig.sig_inception().get() as i64 - self.config.val_sig_skew_min as i64;
            let expiration = sig.sig_expiration().get() as i64 + self.config.val_sig_skew_max as i64;
            if (now as i64) < inception || (now as i64) > expiration {
                continue;
            }

            let owned: Vec<Record> = records.iter().map(|r| (*r).clone()).collect();
            if key.verify_rrsig(name, DNSClass::IN, sig, owned.iter()).is_ok() {
                return SecurityStatus::Secure;
            }
        }
        SecurityStatus::Bogus
    }

    /// Rebuild a minimal wire [`Message`] from a cached [`resolve_proto::MessageReply`]'s
    /// RRset references, including any `RRSIG` RRsets cached alongside the
    /// data they cover — enough for [`classify`]/[`signer_name`]/signature
    /// verification without re-parsing the original upstream bytes.
    fn reconstruct_message(&self, reply: &resolve_proto::MessageReply, now: Instant) -> Message {
        let mut message = Message::new();
        for section_ref in &reply.answer {
            for record in self.reconstruct_section(section_ref, now) {
                message.add_answer(record);
            }
        }
        for section_ref in &reply.authority {
            for record in self.reconstruct_section(section_ref, now) {
                message.add_name_server(record);
            }
        }
        message
    }

    fn reconstruct_section(&self, section_ref: &resolve_proto::RrsetRef, now: Instant) -> Vec<Record> {
        let Some(rrset) = self.iterator.rrset_cache.get(
            &QueryKey::new(section_ref.name.clone(), section_ref.record_type, section_ref.dns_class),
            now,
        ) else {
            return Vec::new();
        };
        let ttl = rrset.ttl_remaining(now).as_secs() as u32;
        rrset
            .rdata
            .into_iter()
            .map(|rdata| Record::from_rdata(rrset.name.clone(), ttl, rdata).set_dns_class(rrset.dns_class).clone())
            .collect()
    }

    /// Run the full init → find-key → validate sub-state chain for one
    /// reply and combine per-RRset results into a message-level verdict
    /// (spec §4.3 "Validate" step 4).
    pub async fn validate(&self, arena: &mut QueryArena, qid: QStateId, reply: &resolve_proto::MessageReply, qtype: RecordType, now: Instant) -> SecurityStatus {
        arena.get_mut(qid).val_substate = ValSubstate::Init;
        let qkey = arena.get(qid).qkey.clone();
        let qname = qkey.name.clone();
        let depth = arena.get(qid).depth;

        let message = self.reconstruct_message(reply, now);
        let message = &message;
        let class = classify(message, qtype);
        let all_signed: Vec<Record> = message.answers().iter().chain(message.name_servers()).cloned().collect();
        let Some(signer) = signer_name(&all_signed) else {
            if self.closest_anchor(&qname).is_some() {
                return SecurityStatus::Bogus;
            }
            return SecurityStatus::Indeterminate;
        };

        arena.get_mut(qid).val_substate = ValSubstate::FindKey;
        let keys = match self.find_key(arena, qid, &signer, depth, now).await {
            Ok(k) => k,
            Err(status) => {
                return self.demote_if_permissive(status, &qkey, now);
            }
        };

        arena.get_mut(qid).val_substate = ValSubstate::Validate;
        let mut overall = SecurityStatus::Secure;
        let to_check: Vec<(Name, RecordType)> = match class {
            MessageClass::Positive => vec![(qname.clone(), qtype)],
            MessageClass::Cname => vec![(qname.clone(), RecordType::CNAME)],
            MessageClass::Referral | MessageClass::Nodata | MessageClass::Nxdomain => message
                .name_servers()
                .iter()
                .filter(|r| matches!(r.record_type(), RecordType::SOA | RecordType::NSEC | RecordType::NSEC3))
                .map(|r| (r.name().clone(), r.record_type()))
                .collect(),
            MessageClass::AnyOther => Vec::new(),
        };

        for (name, rtype) in &to_check {
            let records = covered_records(&all_signed, name, *rtype);
            if records.is_empty() {
                continue;
            }
            let sigs = rrsigs_for(&all_signed, name, *rtype);
            if let Some(nsec3) = records.iter().find_map(|r| match r.data() {
                RData::DNSSEC(hickory_proto::dnssec::rdata::DNSSECRData::NSEC3(n)) => Some(n),
                _ => None,
            }) {
                let keysize = keys.iter().map(|k| k.public_key().public_bytes().len() as u32 * 8).max().unwrap_or(1024);
                if let Some(limit) = self.nsec3_limit_for(keysize) {
                    if u32::from(nsec3.iterations()) > limit.max_iterations {
                        overall = SecurityStatus::Insecure.transition_to(overall).min_with(SecurityStatus::Insecure);
                        continue;
                    }
                }
            }
            let status = self.verify_rrset(&records, &sigs, &keys, name);
            overall = combine(overall, status);
        }

        if matches!(class, MessageClass::Nxdomain | MessageClass::Nodata) {
            overall = combine(overall, verify_nonexistence(&all_signed, class, &qname, qtype));
        }

        self.demote_if_permissive(overall, &qkey, now)
    }

    /// Permissive mode demotes a Bogus verdict to Indeterminate so the
    /// client still gets an answer, but the verdict itself is cached with a
    /// short `bogus_ttl` (spec §4.3) so the same reply isn't revalidated
    /// (and found bogus) on every query for it.
    fn demote_if_permissive(&self, status: SecurityStatus, qkey: &QueryKey, now: Instant) -> SecurityStatus {
        if status == SecurityStatus::Bogus && self.config.val_permissive_mode {
            let reply = MessageReply::new(qkey.clone(), ResponseCode::ServFail, MessageFlags::default(), now + self.bogus_ttl);
            self.iterator.message_cache.insert(reply);
            SecurityStatus::Indeterminate
        } else {
            status
        }
    }
}

/// Reconstruct the closest-encloser/covering-NSEC(3)/wildcard proof for a
/// NODATA or NXDOMAIN answer (spec §4.3 "Validate" step 3). A set of
/// validly-signed NSEC/NSEC3 records that doesn't actually cover the query
/// name is not proof of anything, no matter how good its signature is.
fn verify_nonexistence(all_signed: &[Record], class: MessageClass, qname: &Name, qtype: RecordType) -> SecurityStatus {
    let nsecs: Vec<(&Name, &NSEC)> = all_signed
        .iter()
        .filter_map(|r| match r.data() {
            RData::DNSSEC(hickory_proto::dnssec::rdata::DNSSECRData::NSEC(n)) => Some((r.name(), n)),
            _ => None,
        })
        .collect();

    if !nsecs.is_empty() {
        let soa_name = all_signed
            .iter()
            .find(|r| r.record_type() == RecordType::SOA)
            .map(|r| r.name().clone())
            .unwrap_or_else(|| qname.clone());
        let query = Query::query(qname.clone(), qtype);
        return match verify_nsec(&query, &soa_name, &nsecs) {
            Proof::Secure => SecurityStatus::Secure,
            _ => SecurityStatus::Bogus,
        };
    }

    let nsec3s: Vec<(&Name, &NSEC3)> = all_signed
        .iter()
        .filter_map(|r| match r.data() {
            RData::DNSSEC(hickory_proto::dnssec::rdata::DNSSECRData::NSEC3(n)) => Some((r.name(), n)),
            _ => None,
        })
        .collect();

    if !nsec3s.is_empty() {
        return if verify_nsec3_nonexistence(class, qname, qtype, &nsec3s) {
            SecurityStatus::Secure
        } else {
            SecurityStatus::Bogus
        };
    }

    // A signed negative answer with no NSEC/NSEC3 at all proves nothing.
    SecurityStatus::Bogus
}

/// RFC 5155 hash of `name` under the parameters of the zone's NSEC3 chain.
fn nsec3_hash(name: &Name, algorithm: Nsec3HashAlgorithm, salt: &[u8], iterations: u16) -> Option<Vec<u8>> {
    algorithm.hash(salt, name, iterations).ok().map(|d| d.as_ref().to_vec())
}

/// Decode an NSEC3 owner name's leading base32hex label back into the raw
/// hash bytes it encodes.
fn nsec3_owner_hash(owner: &Name) -> Option<Vec<u8>> {
    let label = owner.iter().next()?;
    data_encoding::BASE32_DNSSEC.decode(label).ok()
}

/// True if some NSEC3 in `nsec3s` is an exact hash match for `name`.
fn nsec3_matching<'a>(name: &Name, algorithm: Nsec3HashAlgorithm, salt: &[u8], iterations: u16, nsec3s: &'a [(&Name, &NSEC3)]) -> Option<&'a NSEC3> {
    let target = nsec3_hash(name, algorithm, salt, iterations)?;
    nsec3s.iter().find_map(|(owner, nsec3)| (nsec3_owner_hash(owner).as_deref() == Some(target.as_slice())).then_some(*nsec3))
}

/// True if some NSEC3 in `nsec3s` covers (but does not match) `name`'s hash,
/// i.e. the hash falls strictly between an owner's hash and its
/// `next_hashed_owner_name`, wrapping around the end of the hash ring.
fn nsec3_covers(name: &Name, algorithm: Nsec3HashAlgorithm, salt: &[u8], iterations: u16, nsec3s: &[(&Name, &NSEC3)]) -> bool {
    let Some(target) = nsec3_hash(name, algorithm, salt, iterations) else { return false };
    nsec3s.iter().any(|(owner, nsec3)| {
        let Some(owner_hash) = nsec3_owner_hash(owner) else { return false };
        hash_in_range(&target, &owner_hash, nsec3.next_hashed_owner_name())
    })
}

/// True if `target` falls strictly between `owner` and `next` on the NSEC3
/// hash ring, accounting for the last record's range wrapping back to the
/// start of the ring (RFC 5155 §7.2.1).
fn hash_in_range(target: &[u8], owner: &[u8], next: &[u8]) -> bool {
    if owner < next {
        owner < target && target < next
    } else {
        target > owner || target < next
    }
}

fn nsec3_wildcard_name(closest_encloser: &Name) -> Option<Name> {
    Name::from_labels(vec![b"*".to_vec()]).ok()?.append_domain(closest_encloser).ok()
}

/// Closest-encloser walk (RFC 5155 §8.3): find the longest ancestor of
/// `qname` with a matching NSEC3, then require its immediate child (the
/// "next closer name") to be covered, proving nothing exists between the
/// encloser and the query name.
fn verify_nsec3_nonexistence(class: MessageClass, qname: &Name, qtype: RecordType, nsec3s: &[(&Name, &NSEC3)]) -> bool {
    let Some((_, sample)) = nsec3s.first() else { return false };
    let algorithm = sample.hash_algorithm();
    let salt = sample.salt().to_vec();
    let iterations = sample.iterations();

    let labels = qname.num_labels();
    let mut closest_encloser: Option<(Name, &NSEC3)> = None;
    let mut next_closer: Option<Name> = None;
    for n in 0..labels {
        let candidate = qname.trim_to((labels - n) as usize);
        if let Some(matched) = nsec3_matching(&candidate, algorithm, &salt, iterations, nsec3s) {
            closest_encloser = Some((candidate, matched));
            break;
        }
        next_closer = Some(candidate);
    }

    let Some((encloser_name, encloser_nsec3)) = closest_encloser else { return false };

    if encloser_name == *qname {
        // The name itself exists: only a NODATA answer can be proven this
        // way, and only if the type really is absent from its bitmap.
        return class == MessageClass::Nodata && !encloser_nsec3.type_bit_maps().any(|t| t == qtype);
    }

    let Some(next_closer) = next_closer else { return false };
    if !nsec3_covers(&next_closer, algorithm, &salt, iterations, nsec3s) {
        return false;
    }

    let Some(wildcard) = nsec3_wildcard_name(&encloser_name) else { return false };
    match class {
        MessageClass::Nxdomain => nsec3_covers(&wildcard, algorithm, &salt, iterations, nsec3s),
        MessageClass::Nodata => {
            // NODATA at a wildcard: the wildcard itself must exist with the
            // type missing, or be covered (no wildcard applies at all).
            match nsec3_matching(&wildcard, algorithm, &salt, iterations, nsec3s) {
                Some(w) => !w.type_bit_maps().any(|t| t == qtype),
                None => nsec3_covers(&wildcard, algorithm, &salt, iterations, nsec3s),
            }
        }
        _ => false,
    }
}

/// Keep only the DNSKEYs whose digest is covered by a trusted DS (spec
/// §4.3 "Find-key": the DS sub-query proves *which* keys may be trusted,
/// not merely that a DNSKEY rrset exists at the signer).
fn verify_keys_against_ds(keys: Vec<DNSKEY>, trusted_ds: &[DS], signer: &Name) -> Vec<DNSKEY> {
    keys.into_iter().filter(|k| trusted_ds.iter().any(|ds| ds.covers(signer, k).unwrap_or(false))).collect()
}

/// Combine two per-RRset verdicts into the running message verdict: bogus
/// dominates, then insecure/indeterminate, secure only if everything so far
/// was secure (spec §4.3 "Validate" step 4).
fn combine(a: SecurityStatus, b: SecurityStatus) -> SecurityStatus {
    use SecurityStatus::*;
    match (a, b) {
        (Bogus, _) | (_, Bogus) => Bogus,
        (Insecure, _) | (_, Insecure) => Insecure,
        (Indeterminate, _) | (_, Indeterminate) => Indeterminate,
        (Secure, Secure) => Secure,
        (Unchecked, other) | (other, Unchecked) => other,
    }
}

trait StatusExt {
    fn min_with(self, other: SecurityStatus) -> SecurityStatus;
}

impl StatusExt for SecurityStatus {
    fn min_with(self, other: SecurityStatus) -> SecurityStatus {
        combine(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::dnssec::crypto::Ed25519SigningKey;
    use hickory_proto::dnssec::{Algorithm, SigningKey, TBS};
    use hickory_proto::rr::{DNSClass, RData, Record};
    use rustls_pki_types::PrivatePkcs8KeyDer;
    use std::str::FromStr;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn make_key() -> (Ed25519SigningKey, DNSKEY) {
        let pkcs8 = Ed25519SigningKey::generate_pkcs8().unwrap();
        let key = Ed25519SigningKey::from_pkcs8(&PrivatePkcs8KeyDer::from(pkcs8.secret_pkcs8_der().to_vec())).unwrap();
        let pub_key = key.to_public_key().unwrap();
        let dnskey = DNSKEY::from_key(&pub_key);
        (key, dnskey)
    }

    fn sign_rrset(key: &Ed25519SigningKey, dnskey: &DNSKEY, owner: &Name, rtype: RecordType, rdata: Vec<RData>) -> (Vec<Record>, RRSIG) {
        let key_tag = dnskey.calculate_key_tag().unwrap();
        let records: Vec<Record> = rdata.into_iter().map(|d| Record::from_rdata(owner.clone(), 300, d).set_dns_class(DNSClass::IN).clone()).collect();

        let rrsig_rdata = RRSIG::new(rtype, Algorithm::ED25519, owner.num_labels(), 300, u32::MAX / 2, 0, key_tag, owner.clone(), Vec::new());
        let rrsig_record = Record::from_rdata(owner.clone(), 300, rrsig_rdata.clone());
        let tbs = TBS::from_rrsig(&rrsig_record, records.iter()).unwrap();
        let sig_bytes = key.sign(&tbs).unwrap();
        let signed = RRSIG::new(rtype, Algorithm::ED25519, owner.num_labels(), 300, u32::MAX / 2, 0, key_tag, owner.clone(), sig_bytes);
        (records, signed)
    }

    #[test]
    fn ed25519_signed_a_rrset_verifies() {
        let (key, dnskey) = make_key();
        let owner = name("example.test.");
        let (records, sig) = sign_rrset(&key, &dnskey, &owner, RecordType::A, vec![RData::A("203.0.113.10".parse().unwrap())]);
        assert!(dnskey.verify_rrsig(&owner, DNSClass::IN, &sig, records.iter()).is_ok());
    }

    #[test]
    fn tampered_rdata_fails_verification() {
        let (key, dnskey) = make_key();
        let owner = name("example.test.");
        let (mut records, sig) = sign_rrset(&key, &dnskey, &owner, RecordType::A, vec![RData::A("203.0.113.10".parse().unwrap())]);
        records[0] = Record::from_rdata(owner.clone(), 300, RData::A("203.0.113.11".parse().unwrap())).set_dns_class(DNSClass::IN).clone();
        assert!(dnskey.verify_rrsig(&owner, DNSClass::IN, &sig, records.iter()).is_err());
    }

    #[test]
    fn combine_bogus_dominates() {
        assert_eq!(combine(SecurityStatus::Secure, SecurityStatus::Bogus), SecurityStatus::Bogus);
        assert_eq!(combine(SecurityStatus::Insecure, SecurityStatus::Secure), SecurityStatus::Insecure);
        assert_eq!(combine(SecurityStatus::Secure, SecurityStatus::Secure), SecurityStatus::Secure);
    }

    fn nsec3_record(owner_hash: &[u8], next_hash: &[u8], zone: &Name, types: Vec<RecordType>) -> (Name, NSEC3) {
        let label = data_encoding::BASE32_DNSSEC.encode(owner_hash).to_ascii_lowercase();
        let owner = Name::from_ascii(label).unwrap().append_domain(zone).unwrap();
        let nsec3 = NSEC3::new(
            hickory_proto::dnssec::Nsec3HashAlgorithm::SHA1,
            false,
            1,
            Vec::new(),
            next_hash.to_vec(),
            types,
        );
        (owner, nsec3)
    }

    #[test]
    fn hash_in_range_detects_membership_and_wraparound() {
        assert!(hash_in_range(&[5], &[3], &[8]));
        assert!(!hash_in_range(&[9], &[3], &[8]));
        assert!(!hash_in_range(&[3], &[3], &[8])); // boundary is exclusive
        // wrapping range: owner > next means the range spans the ring's end
        assert!(hash_in_range(&[1], &[8], &[3]));
        assert!(hash_in_range(&[9], &[8], &[3]));
        assert!(!hash_in_range(&[5], &[8], &[3]));
    }

    #[test]
    fn nsec3_nxdomain_proof_with_closest_encloser_and_wildcard_cover_verifies() {
        let zone = name("example.test.");
        let algo = hickory_proto::dnssec::Nsec3HashAlgorithm::SHA1;
        let encloser = nsec3_hash(&zone, algo, &[], 1).unwrap();
        let next_closer = nsec3_hash(&name("nothing.example.test."), algo, &[], 1).unwrap();
        let wildcard = nsec3_hash(&name("*.example.test."), algo, &[], 1).unwrap();

        let (encloser_owner, encloser_nsec3) = nsec3_record(&encloser, &[0xffu8; 20], &zone, vec![RecordType::A]);
        let low = vec![0u8; 20];
        let high = vec![0xffu8; 20];
        let (nc_owner, nc_nsec3) = nsec3_record(&low, &high, &zone, vec![]);
        let (wc_owner, wc_nsec3) = nsec3_record(&low, &high, &zone, vec![]);
        let _ = (next_closer, wildcard);

        let nsec3s: Vec<(&Name, &NSEC3)> = vec![(&encloser_owner, &encloser_nsec3), (&nc_owner, &nc_nsec3), (&wc_owner, &wc_nsec3)];

        assert!(verify_nsec3_nonexistence(
            MessageClass::Nxdomain,
            &name("nothing.example.test."),
            RecordType::A,
            &nsec3s,
        ));
    }

    #[test]
    fn nsec3_proof_rejects_when_next_closer_is_not_covered() {
        let zone = name("example.test.");
        let algo = hickory_proto::dnssec::Nsec3HashAlgorithm::SHA1;
        let encloser = nsec3_hash(&zone, algo, &[], 1).unwrap();
        let (encloser_owner, encloser_nsec3) = nsec3_record(&encloser, &[0xffu8; 20], &zone, vec![RecordType::A]);

        // No NSEC3 covering the next-closer or wildcard hash: the proof
        // must not be accepted just because the closest encloser matched.
        let nsec3s: Vec<(&Name, &NSEC3)> = vec![(&encloser_owner, &encloser_nsec3)];

        assert!(!verify_nsec3_nonexistence(
            MessageClass::Nxdomain,
            &name("nothing.example.test."),
            RecordType::A,
            &nsec3s,
        ));
    }

    #[test]
    fn nsec3_nodata_proof_requires_missing_type_bit() {
        let zone = name("example.test.");
        let algo = hickory_proto::dnssec::Nsec3HashAlgorithm::SHA1;
        let qname_hash = nsec3_hash(&name("www.example.test."), algo, &[], 1).unwrap();
        let (owner, matching) = nsec3_record(&qname_hash, &[0xffu8; 20], &zone, vec![RecordType::A]);
        let nsec3s: Vec<(&Name, &NSEC3)> = vec![(&owner, &matching)];

        // type bitmap lists A: a NODATA claim for AAAA is provable...
        assert!(verify_nsec3_nonexistence(MessageClass::Nodata, &name("www.example.test."), RecordType::AAAA, &nsec3s));
        // ...but not for A, which the bitmap says does exist.
        assert!(!verify_nsec3_nonexistence(MessageClass::Nodata, &name("www.example.test."), RecordType::A, &nsec3s));
    }

    struct NeverUpstream;

    #[async_trait::async_trait]
    impl Upstream for NeverUpstream {
        async fn send(&self, _target: std::net::SocketAddr, _message: Message, _tcp: bool) -> Result<Message, crate::outbound::UpstreamError> {
            Err(crate::outbound::UpstreamError::Timeout)
        }
    }

    #[tokio::test]
    async fn permissive_bogus_is_cached_with_bogus_ttl() {
        use resolve_cache::{InfraCache, KeyCache, MessageCache, RrsetCache};
        use std::num::NonZeroUsize;

        let rrset_cache = RrsetCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(0), Duration::from_secs(86400));
        let message_cache = MessageCache::new(4, NonZeroUsize::new(16).unwrap());
        let infra_cache = InfraCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(900), Duration::from_secs(120));
        let key_cache = KeyCache::new(4, NonZeroUsize::new(16).unwrap());
        let upstream = NeverUpstream;
        let iter_config = resolve_config::IteratorConfig::default();
        let root_hints: Vec<crate::iterator::RootHint> = Vec::new();

        let iterator = IteratorModule {
            rrset_cache: &rrset_cache,
            message_cache: &message_cache,
            infra_cache: &infra_cache,
            upstream: &upstream,
            config: &iter_config,
            cache_min_ttl: Duration::from_secs(0),
            cache_max_ttl: Duration::from_secs(86400),
            root_hints: &root_hints,
            zones: &[],
            use_caps_for_id: false,
        };

        let mut val_config = ValidatorConfig::default();
        val_config.val_permissive_mode = true;

        let validator = Validator {
            key_cache: &key_cache,
            trust_anchors: &[],
            config: &val_config,
            iterator: &iterator,
            bogus_ttl: Duration::from_secs(30),
        };

        let qkey = QueryKey::in_class(name("example.test."), RecordType::A);
        let now = Instant::now();
        let demoted = validator.demote_if_permissive(SecurityStatus::Bogus, &qkey, now);
        assert_eq!(demoted, SecurityStatus::Indeterminate);

        let cached = message_cache.get(&qkey, &rrset_cache, now).expect("bogus verdict must be cached");
        assert_eq!(cached.rcode, ResponseCode::ServFail);
        assert!(message_cache.get(&qkey, &rrset_cache, now + Duration::from_secs(31)).is_none());
    }

    #[test]
    fn ds_covered_dnskey_is_kept() {
        use hickory_proto::dnssec::DigestType;

        let (_key, dnskey) = make_key();
        let owner = name("example.test.");
        let pub_key = dnskey.public_key().to_owned();
        let ds = DS::from_key(&pub_key, &owner, DigestType::SHA256).unwrap();

        let verified = verify_keys_against_ds(vec![dnskey.clone()], &[ds], &owner);
        assert_eq!(verified, vec![dnskey]);
    }

    #[test]
    fn dnskey_without_matching_ds_is_rejected() {
        use hickory_proto::dnssec::DigestType;

        let (_key, dnskey) = make_key();
        let (_other_key, other_dnskey) = make_key();
        let owner = name("example.test.");
        // a DS for a different key must not cover this DNSKEY
        let pub_key = other_dnskey.public_key().to_owned();
        let mismatched_ds = DS::from_key(&pub_key, &owner, DigestType::SHA256).unwrap();

        let verified = verify_keys_against_ds(vec![dnskey], &[mismatched_ds], &owner);
        assert!(verified.is_empty());
    }

    #[test]
    fn no_trusted_ds_rejects_every_dnskey() {
        let (_key, dnskey) = make_key();
        let owner = name("example.test.");
        let verified = verify_keys_against_ds(vec![dnskey], &[], &owner);
        assert!(verified.is_empty());
    }

    #[test]
    fn classify_detects_referral_and_nxdomain() {
        use hickory_proto::op::ResponseCode;
        let mut msg = Message::new();
        msg.add_name_server(Record::from_rdata(name("test."), 300, RData::NS(hickory_proto::rr::rdata::NS(name("ns1.test.")))));
        assert_eq!(classify(&msg, RecordType::A), MessageClass::Referral);

        let mut nx = Message::new();
        nx.set_response_code(ResponseCode::NXDomain);
        assert_eq!(classify(&nx, RecordType::A), MessageClass::Nxdomain);
    }
}
