//! Error taxonomy (spec §7), type-checked rather than stringly-typed.

use resolve_proto::QueryKey;

#[derive(Debug, thiserror::Error, Clone)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("malformed reply from upstream for {qkey}: {reason}")]
    ProtocolMalformed { qkey: QueryKey, reason: String },

    #[error("sub-query for {qkey} would cycle with an ancestor at depth {depth}")]
    DependencyLoop { qkey: QueryKey, depth: u32 },

    #[error("validation of {qkey} is bogus: {reason}")]
    ValidationBogus { qkey: QueryKey, reason: String },

    #[error("query for {qkey} timed out after {attempts} attempts")]
    Timeout { qkey: QueryKey, attempts: u32 },

    #[error("server {server} is lame for zone {zone}")]
    Lame { server: String, zone: String },
}

impl EngineError {
    /// The RCODE the framework translates this error to when it reaches the
    /// client (spec §7 "Propagation").
    pub fn to_response_code(&self) -> hickory_proto::op::ResponseCode {
        use hickory_proto::op::ResponseCode;
        match self {
            EngineError::ValidationBogus { .. } => ResponseCode::ServFail,
            _ => ResponseCode::ServFail,
        }
    }
}
