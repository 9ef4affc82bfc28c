//! The module capability interface (spec §9 "Polymorphic module chain"):
//! a small set of variants behind {init, deinit, operate, inform_super,
//! clear, get_mem} rather than a runtime inheritance graph. `operate` is an
//! async method; the `.await` points inside it are the only places a query
//! state may suspend (spec §5 "Suspension points").

use crate::error::EngineError;
use crate::qstate::{QStateId, QueryArena};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QEvent {
    NewQuery,
    PassThrough,
    ReplyArrived,
    SubQueryFinished(QStateId),
    Timeout,
    Error,
}

#[derive(Debug, Clone)]
pub enum Disposition {
    /// Suspend, retaining state; re-entered on the next matching event.
    Wait,
    /// This module is done with the event; pass to the next module down
    /// the chain.
    NextModule,
    /// This module (and so the chain) is done; walk back up to the caller.
    Finished,
    Error(EngineError),
}

/// Implemented by [`crate::iterator::Iterator`] and
/// [`crate::validator::Validator`]. `operate` is not part of the trait
/// itself (async fns in traits aren't dyn-compatible, and the module chain
/// here is a fixed two-element sequence, not an open set) — the engine
/// driver calls each module's own `operate` directly in chain order.
pub trait Module {
    fn init(&mut self) {}
    fn deinit(&mut self) {}

    /// Integrate a finished sub-query's result into its super before
    /// `operate(SubQueryFinished)` runs on the super (spec §4.1).
    fn inform_super(&mut self, _arena: &mut QueryArena, _finished_sub: QStateId, _super_id: QStateId) {}

    /// Release any module-private state attached to `qid` (query teardown).
    fn clear(&mut self, _qid: QStateId) {}

    fn get_mem(&self) -> usize {
        0
    }
}
