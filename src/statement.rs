use crate::bthread::BreakUponContext;
use crate::event::Event;
use crate::eventset::EventSet;
use std::sync::Arc;

/// A break-upon handler: invoked when an interrupting event is selected.
/// Receives the interrupting event and a context that exposes every host
/// method except `bsync` (it must not suspend).
pub type BreakUponHandler = Arc<dyn Fn(&Event, &BreakUponContext) + Send + Sync>;

/// A b-thread's per-cycle request, published at `bsync`.
///
/// Missing fields default to empty (`EventSet::None` for sets, an empty
/// vector for `request`). The one runtime-checked invariant is that an event
/// must not appear in both `request` and `block` of the same statement.
#[derive(Clone, Default)]
pub struct SyncStatement {
    pub request: Vec<Event>,
    pub wait_for: EventSet,
    pub block: EventSet,
    pub interrupt: EventSet,
    pub break_upon: Option<BreakUponHandler>,
}

impl std::fmt::Debug for SyncStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStatement")
            .field("request", &self.request)
            .field("wait_for", &self.wait_for)
            .field("block", &self.block)
            .field("interrupt", &self.interrupt)
            .field("break_upon", &self.break_upon.is_some())
            .finish()
    }
}

/// Structural equality for snapshot-dedup purposes (§4.2): `break_upon`
/// handlers compare by `Arc::ptr_eq` since the closure itself isn't
/// comparable, matching `EventSet`'s `HostPredicate` approximation.
impl PartialEq for SyncStatement {
    fn eq(&self, other: &Self) -> bool {
        self.request == other.request
            && self.wait_for == other.wait_for
            && self.block == other.block
            && self.interrupt == other.interrupt
            && match (&self.break_upon, &other.break_upon) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}

impl std::hash::Hash for SyncStatement {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.request.hash(state);
        self.wait_for.hash(state);
        self.block.hash(state);
        self.interrupt.hash(state);
        match &self.break_upon {
            Some(a) => Arc::as_ptr(a).hash(state),
            None => 0usize.hash(state),
        }
    }
}

impl SyncStatement {
    pub fn builder() -> SyncStatementBuilder {
        SyncStatementBuilder::default()
    }

    /// True if `e` is requested or waited for, i.e. this statement permits
    /// resuming on `e`.
    pub fn wakes_on(&self, e: &Event) -> Result<bool, crate::error::BpError> {
        if self.request.contains(e) {
            return Ok(true);
        }
        self.wait_for.contains(e)
    }
}

#[derive(Default)]
pub struct SyncStatementBuilder {
    request: Vec<Event>,
    wait_for: EventSet,
    block: EventSet,
    interrupt: EventSet,
    break_upon: Option<BreakUponHandler>,
}

impl SyncStatementBuilder {
    pub fn request(mut self, e: Event) -> Self {
        self.request.push(e);
        self
    }

    pub fn request_all(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.request.extend(events);
        self
    }

    pub fn wait_for(mut self, s: EventSet) -> Self {
        self.wait_for = s;
        self
    }

    pub fn block(mut self, s: EventSet) -> Self {
        self.block = s;
        self
    }

    pub fn interrupt(mut self, s: EventSet) -> Self {
        self.interrupt = s;
        self
    }

    pub fn break_upon(
        mut self,
        handler: impl Fn(&Event, &BreakUponContext) + Send + Sync + 'static,
    ) -> Self {
        self.break_upon = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> SyncStatement {
        SyncStatement {
            request: self.request,
            wait_for: self.wait_for,
            block: self.block,
            interrupt: self.interrupt,
            break_upon: self.break_upon,
        }
    }
}
