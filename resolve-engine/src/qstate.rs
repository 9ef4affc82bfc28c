//! Arena-addressed query state (spec §9 "Back-references from sub-query to
//! super"). Each in-flight query (top-level or sub-query) gets a slot in a
//! worker-local [`slab::Slab`], addressed by a stable index rather than a
//! pointer; the sub-to-super edge is the index recorded in `supers`.
//!
//! Control flow itself is structured-concurrency recursion (spec §9 "Event
//! loop coroutines", option (b)): a sub-query is an `async fn` call nested
//! inside its super, so the call stack already encodes "supers execute on
//! the same worker that owns them" (spec §5) for free. The arena exists so
//! cycle detection — "(qkey, depth) before attaching" (spec §4.1) — can see
//! the whole ancestor chain without threading it through every call site.

use resolve_proto::QueryKey;

pub type QStateId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterSubstate {
    Init,
    Init2,
    Init3,
    QueryTargets,
    QueryResponse,
    PrimeResponse,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValSubstate {
    Init,
    FindKey,
    Validate,
    Finished,
}

#[derive(Debug, Clone)]
pub struct QueryState {
    pub qkey: QueryKey,
    pub depth: u32,
    pub restart_count: u32,
    pub referral_count: u32,
    pub iter_substate: IterSubstate,
    pub val_substate: ValSubstate,
    /// Index of the query state that spawned this one as a sub-query;
    /// `None` for a top-level client query.
    pub supers: Vec<QStateId>,
}

impl QueryState {
    fn new(qkey: QueryKey, depth: u32) -> Self {
        Self {
            qkey,
            depth,
            restart_count: 0,
            referral_count: 0,
            iter_substate: IterSubstate::Init,
            val_substate: ValSubstate::Init,
            supers: Vec::new(),
        }
    }
}

/// Per-resolve-call bookkeeping. One arena is created per top-level client
/// query and dropped when that query finishes — it is never shared across
/// queries or threads (spec §5 "no query state... is ever shared across
/// threads").
#[derive(Default)]
pub struct QueryArena {
    slab: slab::Slab<QueryState>,
}

impl QueryArena {
    pub fn new() -> Self {
        Self { slab: slab::Slab::new() }
    }

    pub fn insert(&mut self, qkey: QueryKey, depth: u32) -> QStateId {
        self.slab.insert(QueryState::new(qkey, depth))
    }

    pub fn get(&self, id: QStateId) -> &QueryState {
        &self.slab[id]
    }

    pub fn get_mut(&mut self, id: QStateId) -> &mut QueryState {
        &mut self.slab[id]
    }

    pub fn remove(&mut self, id: QStateId) -> QueryState {
        self.slab.remove(id)
    }

    /// Spec §4.1: "Cycles in the super/sub graph are detected by (qkey,
    /// depth) before attaching; attaching that would cycle fails with
    /// dependency-loop." Walks every live state currently in the arena —
    /// the in-flight ancestor chain of this resolve call.
    pub fn would_cycle(&self, qkey: &QueryKey, depth: u32) -> bool {
        self.slab.iter().any(|(_, s)| &s.qkey == qkey && s.depth == depth)
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }
}
