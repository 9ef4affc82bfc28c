//! Query engine: the module chain (validator → iterator) driven over a
//! per-query [`qstate::QueryArena`], talking upstream through
//! [`outbound::Upstream`] and the caches from `resolve-cache`.

pub mod engine;
pub mod error;
pub mod iterator;
pub mod module;
pub mod outbound;
pub mod qstate;
pub mod validator;

pub use engine::Engine;
pub use error::EngineError;
pub use iterator::{Iterator, RootHint};
pub use module::{Disposition, Module, QEvent};
pub use outbound::{OutboundMultiplexer, Upstream, UpstreamError};
pub use qstate::{IterSubstate, QStateId, QueryArena, QueryState, ValSubstate};
pub use validator::Validator;
