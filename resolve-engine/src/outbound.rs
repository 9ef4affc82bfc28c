//! Outbound query multiplexer (spec §4.6): owns the notion of "send this
//! query to that target, with retries, timeouts, and transport fallback".
//! The actual socket I/O is behind the [`Upstream`] trait so tests can swap
//! in a mock authoritative responder (spec §8 end-to-end scenarios).

use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::rr::Name;
use rand::Rng;
use resolve_cache::InfraCache;

use crate::error::EngineError;

/// A transport for sending one query to one target and getting one reply.
/// Implementations are expected to apply their own per-call timeout; the
/// multiplexer only cares about success/timeout/malformed outcomes.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, target: SocketAddr, message: Message, tcp: bool) -> Result<Message, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    Timeout,
    Io(String),
}

pub struct OutboundMultiplexer<'a, U: Upstream> {
    pub upstream: &'a U,
    pub infra: &'a InfraCache,
    pub outbound_msg_retry: u32,
    pub useful_server_top_timeout: Duration,
    pub use_caps_for_id: bool,
}

/// Randomize the case of every ASCII-alphabetic byte in a name's text form
/// (spec §4.6 "0x20 case randomization"), rebuilding a `Name` via
/// `from_ascii` so the randomized case survives (`from_str` would
/// normalize it right back out — see [`resolve_proto::key`]).
pub fn randomize_case(name: &Name, rng: &mut impl Rng) -> Name {
    let ascii = name.to_ascii();
    let randomized: String = ascii
        .chars()
        .map(|c| {
            if c.is_ascii_alphabetic() && rng.gen_bool(0.5) {
                if c.is_ascii_uppercase() {
                    c.to_ascii_lowercase()
                } else {
                    c.to_ascii_uppercase()
                }
            } else {
                c
            }
        })
        .collect();
    Name::from_ascii(randomized).unwrap_or_else(|_| name.clone())
}

/// Byte-identical echo check required when 0x20 is in use: the response
/// qname's case must match exactly, not just case-insensitively.
pub fn echoes_case(sent: &Name, echoed: &Name) -> bool {
    sent.to_ascii() == echoed.to_ascii()
}

impl<'a, U: Upstream> OutboundMultiplexer<'a, U> {
    /// Send `message` to `target` for `zone`, retrying per spec §4.6's
    /// policy: up to `outbound_msg_retry` attempts, doubling the timeout
    /// (seeded from the infra-cached RTT) each time, capped at
    /// `useful_server_top_timeout`. On TC, requery the same target over
    /// TCP. Exhausting retries marks the target lame-for-this-zone.
    pub async fn query(&self, target: SocketAddr, zone: &Name, mut message: Message) -> Result<Message, EngineError> {
        let now_rtt = self
            .infra
            .rtt(target.ip(), zone, std::time::Instant::now())
            .unwrap_or(Duration::from_millis(376));

        let mut attempt_timeout = now_rtt.max(Duration::from_millis(5));
        let mut last_err = None;

        let sent_name = if self.use_caps_for_id {
            let original = message.queries().first().map(|q| q.name().clone());
            original.map(|original| {
                let randomized = randomize_case(&original, &mut rand::thread_rng());
                if let Some(query) = message.queries_mut().first_mut() {
                    query.set_name(randomized.clone());
                }
                randomized
            })
        } else {
            None
        };

        for attempt in 0..self.outbound_msg_retry {
            let id: u16 = rand::thread_rng().gen();
            message.set_id(id);

            match self.upstream.send(target, message.clone(), false).await {
                Ok(reply) if reply.id() == id && self.echoes_sent_case(&sent_name, &reply) => {
                    if reply.truncated() {
                        match self.upstream.send(target, message.clone(), true).await {
                            Ok(tcp_reply) if tcp_reply.id() == id && self.echoes_sent_case(&sent_name, &tcp_reply) => {
                                self.infra.record_rtt(target.ip(), zone, attempt_timeout, std::time::Instant::now());
                                return Ok(tcp_reply);
                            }
                            Ok(_) => {
                                last_err = Some(EngineError::ProtocolMalformed {
                                    qkey: zone_qkey(zone),
                                    reason: "tcp reply id or case mismatch".into(),
                                });
                            }
                            Err(e) => last_err = Some(upstream_err_to_engine(e, zone)),
                        }
                        continue;
                    }
                    self.infra.record_rtt(target.ip(), zone, attempt_timeout, std::time::Instant::now());
                    return Ok(reply);
                }
                Ok(_) => {
                    last_err = Some(EngineError::ProtocolMalformed {
                        qkey: zone_qkey(zone),
                        reason: "reply id or case mismatch".into(),
                    });
                }
                Err(e) => {
                    if matches!(e, UpstreamError::Timeout) {
                        self.infra.record_timeout(target.ip(), zone, now_rtt, std::time::Instant::now());
                    }
                    last_err = Some(upstream_err_to_engine(e, zone));
                }
            }

            attempt_timeout = (attempt_timeout * 2).min(self.useful_server_top_timeout);
            let _ = attempt;
        }

        Err(last_err.unwrap_or(EngineError::Timeout {
            qkey: zone_qkey(zone),
            attempts: self.outbound_msg_retry,
        }))
    }

    /// When 0x20 is in use, the echoed qname's case must match byte-for-byte
    /// (spec §4.6); a mismatch is treated the same as any other malformed
    /// reply rather than silently accepted.
    fn echoes_sent_case(&self, sent_name: &Option<Name>, reply: &Message) -> bool {
        let Some(sent_name) = sent_name else { return true };
        match reply.queries().first() {
            Some(q) => echoes_case(sent_name, q.name()),
            None => false,
        }
    }
}

fn zone_qkey(zone: &Name) -> resolve_proto::QueryKey {
    resolve_proto::QueryKey::in_class(zone.clone(), hickory_proto::rr::RecordType::NS)
}

fn upstream_err_to_engine(err: UpstreamError, zone: &Name) -> EngineError {
    match err {
        UpstreamError::Timeout => EngineError::Timeout {
            qkey: zone_qkey(zone),
            attempts: 1,
        },
        UpstreamError::Io(reason) => EngineError::ProtocolMalformed {
            qkey: zone_qkey(zone),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::RecordType;
    use std::num::NonZeroUsize;
    use std::str::FromStr;

    #[test]
    fn case_randomization_preserves_label_structure_and_can_be_echoed() {
        let name = Name::from_str("Example.Test.").unwrap();
        let mut rng = rand::thread_rng();
        let randomized = randomize_case(&name, &mut rng);
        assert_eq!(randomized.to_lowercase(), name.to_lowercase());
        assert!(echoes_case(&randomized, &randomized));
        assert!(!echoes_case(&name, &Name::from_ascii("EXAMPLE.TEST.").unwrap()));
    }

    struct EchoUpstream;

    #[async_trait::async_trait]
    impl Upstream for EchoUpstream {
        async fn send(&self, _target: SocketAddr, message: Message, _tcp: bool) -> Result<Message, UpstreamError> {
            Ok(message)
        }
    }

    /// Answers with every alphabetic byte of the sent qname case-flipped, so
    /// the echo can never match byte-for-byte regardless of what case was
    /// actually sent.
    struct CaseFlippingUpstream;

    #[async_trait::async_trait]
    impl Upstream for CaseFlippingUpstream {
        async fn send(&self, _target: SocketAddr, message: Message, _tcp: bool) -> Result<Message, UpstreamError> {
            let sent = message.queries()[0].name().clone();
            let flipped: String = sent
                .to_ascii()
                .chars()
                .map(|c| {
                    if c.is_ascii_uppercase() {
                        c.to_ascii_lowercase()
                    } else if c.is_ascii_lowercase() {
                        c.to_ascii_uppercase()
                    } else {
                        c
                    }
                })
                .collect();
            let mut reply = Message::new();
            reply.set_id(message.id());
            reply.add_query(Query::query(Name::from_ascii(flipped).unwrap(), RecordType::A));
            Ok(reply)
        }
    }

    fn test_infra() -> InfraCache {
        InfraCache::new(4, NonZeroUsize::new(16).unwrap(), Duration::from_secs(900), Duration::from_secs(120))
    }

    #[tokio::test]
    async fn use_caps_for_id_randomizes_the_wire_qname() {
        let infra = test_infra();
        let upstream = EchoUpstream;
        let mux = OutboundMultiplexer {
            upstream: &upstream,
            infra: &infra,
            outbound_msg_retry: 1,
            useful_server_top_timeout: Duration::from_millis(500),
            use_caps_for_id: true,
        };
        let zone = Name::from_str("test.").unwrap();
        let qname = Name::from_str("example.test.").unwrap();
        let mut msg = Message::new();
        msg.add_query(Query::query(qname.clone(), RecordType::A));

        let target: SocketAddr = "203.0.113.1:53".parse().unwrap();
        let reply = mux.query(target, &zone, msg).await.unwrap();
        assert_eq!(reply.queries()[0].name().to_lowercase(), qname);
    }

    #[tokio::test]
    async fn mismatched_case_echo_is_rejected_as_malformed() {
        let infra = test_infra();
        let upstream = CaseFlippingUpstream;
        let mux = OutboundMultiplexer {
            upstream: &upstream,
            infra: &infra,
            outbound_msg_retry: 1,
            useful_server_top_timeout: Duration::from_millis(500),
            use_caps_for_id: true,
        };
        let zone = Name::from_str("test.").unwrap();
        let mut msg = Message::new();
        msg.add_query(Query::query(Name::from_str("example.test.").unwrap(), RecordType::A));

        let target: SocketAddr = "203.0.113.1:53".parse().unwrap();
        let err = mux.query(target, &zone, msg).await.unwrap_err();
        assert!(matches!(err, EngineError::ProtocolMalformed { .. }));
    }

    #[tokio::test]
    async fn case_randomization_disabled_ignores_echo_case() {
        let infra = test_infra();
        let upstream = CaseFlippingUpstream;
        let mux = OutboundMultiplexer {
            upstream: &upstream,
            infra: &infra,
            outbound_msg_retry: 1,
            useful_server_top_timeout: Duration::from_millis(500),
            use_caps_for_id: false,
        };
        let zone = Name::from_str("test.").unwrap();
        let mut msg = Message::new();
        msg.add_query(Query::query(Name::from_str("example.test.").unwrap(), RecordType::A));

        let target: SocketAddr = "203.0.113.1:53".parse().unwrap();
        let reply = mux.query(target, &zone, msg).await.unwrap();
        assert_eq!(reply.queries()[0].name().to_lowercase(), Name::from_str("example.test.").unwrap());
    }
}
