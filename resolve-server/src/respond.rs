//! Turns a [`resolve_proto::MessageReply`] (RRset references) back into a
//! wire [`Message`] for the client-facing listener, dereferencing each
//! reference against the live RRset cache (spec §3, §4.4) the same way
//! `resolve_engine::validator` reconstructs a message for signature
//! verification.

use std::time::Instant;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::Record;

use resolve_cache::RrsetCache;
use resolve_proto::{MessageReply, QueryKey, RrsetRef};

fn materialize(cache: &RrsetCache, refs: &[RrsetRef], now: Instant) -> Vec<Record> {
    let mut records = Vec::new();
    for rref in refs {
        let key = QueryKey::new(rref.name.clone(), rref.record_type, rref.dns_class);
        let Some(rrset) = cache.get(&key, now) else { continue };
        let ttl = rrset.ttl_remaining(now).as_secs().min(u64::from(u32::MAX)) as u32;
        for rdata in &rrset.rdata {
            records.push(Record::from_rdata(rref.name.clone(), ttl, rdata.clone()).set_dns_class(rref.dns_class).clone());
        }
        records.extend(rrset.rrsigs.iter().cloned());
    }
    records
}

/// Build the response datagram/stream payload for one client query.
pub fn build_response(query: &Query, reply: &MessageReply, rrset_cache: &RrsetCache, now: Instant, request_id: u16) -> Message {
    let mut message = Message::new();
    message.set_id(request_id);
    message.set_message_type(MessageType::Response);
    message.set_op_code(OpCode::Query);
    message.set_response_code(reply.rcode);
    message.set_recursion_available(true);
    message.set_authentic_data(reply.flags.authentic_data);
    message.set_checking_disabled(reply.flags.checking_disabled);
    message.add_query(query.clone());

    for record in materialize(rrset_cache, &reply.answer, now) {
        message.add_answer(record);
    }
    for record in materialize(rrset_cache, &reply.authority, now) {
        message.add_name_server(record);
    }
    for record in materialize(rrset_cache, &reply.additional, now) {
        message.add_additional(record);
    }
    message
}

/// Minimal SERVFAIL/FORMERR reply when resolution itself errors out, before
/// any RRset references exist to dereference.
pub fn build_error_response(query: Option<&Query>, rcode: ResponseCode, request_id: u16) -> Message {
    let mut message = Message::new();
    message.set_id(request_id);
    message.set_message_type(MessageType::Response);
    message.set_op_code(OpCode::Query);
    message.set_response_code(rcode);
    message.set_recursion_available(true);
    if let Some(query) = query {
        message.add_query(query.clone());
    }
    message
}
