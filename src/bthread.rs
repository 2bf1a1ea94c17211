use crate::error::BpError;
use crate::event::Event;
use crate::eventset::EventSet;
use crate::resource::ResourceLoader;
use crate::scope::GlobalScope;
use crate::statement::SyncStatement;
use parking_lot::Mutex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Waker};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An opaque, suspendable b-thread procedure.
///
/// Bodies are ordinary `async` Rust: local state is just normal Rust locals
/// and captures. The executor (`drive_once`, below) is what gives this the
/// data-like, fork-friendly continuation the rest of the engine needs.
pub trait BThreadBody: Send + Sync {
    fn call(&self, ctx: BpContext) -> BoxFuture<Result<(), BpError>>;
}

impl<F, Fut> BThreadBody for F
where
    F: Fn(BpContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BpError>> + Send + 'static,
{
    fn call(&self, ctx: BpContext) -> BoxFuture<Result<(), BpError>> {
        Box::pin((self)(ctx))
    }
}

/// Resolves a `body_key` (see the persisted-state wire format) back to a
/// live body. Hosts populate this ahead of deserializing a snapshot; it is
/// the concrete stand-in for "the continuation format is otherwise opaque
/// bytes delegated to the host."
pub trait BodyRegistry: Send + Sync {
    fn resolve(&self, key: &str) -> Option<Arc<dyn BThreadBody>>;
}

#[derive(Default)]
pub struct HashMapBodyRegistry {
    bodies: dashmap::DashMap<String, Arc<dyn BThreadBody>>,
}

impl HashMapBodyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, body: Arc<dyn BThreadBody>) {
        self.bodies.insert(key.into(), body);
    }
}

impl BodyRegistry for HashMapBodyRegistry {
    fn resolve(&self, key: &str) -> Option<Arc<dyn BThreadBody>> {
        self.bodies.get(key).map(|b| b.clone())
    }
}

/// Services shared by every b-thread body in one `Program`, kept out of
/// `BpContext`'s identity so the context never holds a back-reference to the
/// owning program (breaks the ownership cycle called out in the design
/// notes).
pub struct BThreadServices {
    pub global_scope: Arc<GlobalScope>,
    pub resource_loader: Arc<dyn ResourceLoader>,
    pub rng: Arc<Mutex<ChaCha8Rng>>,
    pub daemon_mode: Arc<AtomicBool>,
}

/// Mutable, per-advance bookkeeping a running body accumulates: newly
/// registered b-threads and newly enqueued external events. Drained by the
/// arbiter after each drive.
#[derive(Default)]
pub struct DriveEffects {
    pub registrations: Mutex<Vec<(Option<String>, Arc<dyn BThreadBody>)>>,
    pub external_events: Mutex<Vec<Event>>,
}

struct BThreadRuntime {
    name: String,
    replay_log: Vec<Event>,
    cursor: AtomicUsize,
    pending_statement: Mutex<Option<SyncStatement>>,
    suspension_allowed: AtomicBool,
    /// True once execution has passed the last fast-forwarded `bsync` (or
    /// immediately, if there was nothing to fast-forward). Host-effect calls
    /// (`register_bthread`, `enqueue_external_event`) made while this is
    /// false are replays of code that already ran live on a prior drive and
    /// already had their effects applied then; recording them again here
    /// would duplicate them every time the body is re-driven.
    live: AtomicBool,
    services: Arc<BThreadServices>,
    effects: DriveEffects,
}

/// Host interface exposed to a running b-thread body, conventionally bound
/// to a parameter named `bp`.
#[derive(Clone)]
pub struct BpContext {
    inner: Arc<BThreadRuntime>,
}

impl BpContext {
    pub fn event(&self, name: impl Into<String>) -> Event {
        Event::new(name)
    }

    pub fn event_set_singleton(&self, e: Event) -> EventSet {
        EventSet::singleton(e)
    }

    pub fn register_bthread(&self, name: Option<&str>, body: Arc<dyn BThreadBody>) {
        if !self.inner.live.load(Ordering::SeqCst) {
            return;
        }
        self.inner
            .effects
            .registrations
            .lock()
            .push((name.map(str::to_string), body));
    }

    pub fn enqueue_external_event(&self, e: Event) {
        if !self.inner.live.load(Ordering::SeqCst) {
            return;
        }
        self.inner.effects.external_events.lock().push(e);
    }

    pub fn is_daemon_mode(&self) -> bool {
        self.inner.services.daemon_mode.load(Ordering::SeqCst)
    }

    pub fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Deterministic pseudorandom source. Never the platform's default
    /// thread-local RNG, so runs stay replayable given the same seed.
    pub fn random(&self) -> u64 {
        self.inner.services.rng.lock().gen()
    }

    pub fn global_scope(&self) -> &GlobalScope {
        &self.inner.services.global_scope
    }

    pub async fn load_resource(&self, path: &str) -> Result<Vec<u8>, BpError> {
        self.inner.services.resource_loader.load(path).await
    }

    /// The single suspension primitive. Publishes `statement` and suspends
    /// until the arbiter resumes with a matching event.
    pub async fn bsync(&self, statement: SyncStatement) -> Result<Event, BpError> {
        if !self.inner.suspension_allowed.load(Ordering::SeqCst) {
            return Err(BpError::BreakUponMisuse {
                bthread: self.inner.name.clone(),
            });
        }
        let idx = self.inner.cursor.load(Ordering::SeqCst);
        if idx < self.inner.replay_log.len() {
            self.inner.cursor.store(idx + 1, Ordering::SeqCst);
            if idx + 1 >= self.inner.replay_log.len() {
                // Every historical event has now been replayed; code from
                // here until the next (genuine) suspension is running live
                // for the first time on this drive.
                self.inner.live.store(true, Ordering::SeqCst);
            }
            return Ok(self.inner.replay_log[idx].clone());
        }
        *self.inner.pending_statement.lock() = Some(statement);
        std::future::pending::<()>().await;
        unreachable!("pending future never resolves")
    }
}

/// Narrower context given to break-upon handlers: every `BpContext` method
/// except `bsync` is reachable through it by construction, but this is
/// belt-and-braces ergonomics, not the enforcement mechanism — a handler
/// that smuggles a captured `BpContext` clone into its closure is still
/// caught by `suspension_allowed` being false on the shared runtime.
#[derive(Clone)]
pub struct BreakUponContext {
    inner: BpContext,
}

impl BreakUponContext {
    pub fn register_bthread(&self, name: Option<&str>, body: Arc<dyn BThreadBody>) {
        self.inner.register_bthread(name, body)
    }

    pub fn enqueue_external_event(&self, e: Event) {
        self.inner.enqueue_external_event(e)
    }

    pub fn global_scope(&self) -> &GlobalScope {
        self.inner.global_scope()
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.now_ms()
    }

    pub fn random(&self) -> u64 {
        self.inner.random()
    }
}

/// Outcome of driving a body's continuation once, either from scratch
/// (fast-forwarding the whole replay log) or any time the arbiter advances
/// it with a newly selected event appended to that log.
pub enum DriveOutcome {
    Suspended(SyncStatement),
    Terminated,
    Failed(BpError),
}

fn noop_waker() -> Waker {
    Waker::noop().clone()
}

/// Drives `body` from the start of its async fn, fast-forwarding through
/// `replay_log` and stopping at the first genuine suspension or
/// termination. A single `poll` call is sufficient: async/await propagates
/// `Poll::Pending` up through any number of already-ready nested awaits
/// within one poll, so every fast-forwarded `bsync` resolves synchronously
/// until the live edge is reached.
pub fn drive_once(
    name: &str,
    body: &Arc<dyn BThreadBody>,
    replay_log: Vec<Event>,
    services: Arc<BThreadServices>,
) -> (DriveOutcome, DriveEffects) {
    let live = replay_log.is_empty();
    let runtime = Arc::new(BThreadRuntime {
        name: name.to_string(),
        replay_log,
        cursor: AtomicUsize::new(0),
        pending_statement: Mutex::new(None),
        suspension_allowed: AtomicBool::new(true),
        live: AtomicBool::new(live),
        services,
        effects: DriveEffects::default(),
    });
    let ctx = BpContext {
        inner: runtime.clone(),
    };
    let mut fut = body.call(ctx);
    let waker = noop_waker();
    let mut task_cx = TaskContext::from_waker(&waker);
    let outcome = match fut.as_mut().poll(&mut task_cx) {
        Poll::Ready(Ok(())) => DriveOutcome::Terminated,
        Poll::Ready(Err(e)) => DriveOutcome::Failed(e),
        Poll::Pending => match runtime.pending_statement.lock().take() {
            Some(stmt) => DriveOutcome::Suspended(stmt),
            None => DriveOutcome::Failed(BpError::BodyFailure {
                bthread: name.to_string(),
                source: "body suspended without publishing a sync statement".to_string(),
            }),
        },
    };
    drop(fut);
    // Safe: the future (the only other owner of `ctx`'s inner Arc) was just
    // dropped, so this binding is the sole remaining reference.
    let effects = match Arc::try_unwrap(runtime) {
        Ok(rt) => rt.effects,
        Err(rt) => DriveEffects {
            registrations: Mutex::new(std::mem::take(&mut *rt.effects.registrations.lock())),
            external_events: Mutex::new(std::mem::take(&mut *rt.effects.external_events.lock())),
        },
    };
    (outcome, effects)
}

/// Invokes a break-upon handler with suspension disabled, guaranteeing
/// `BreakUponMisuse` even if the handler ignores its `BreakUponContext`
/// parameter and reaches for a captured `BpContext` instead. Returns the
/// handler's `DriveEffects` so the caller can fold any `register_bthread`/
/// `enqueue_external_event` calls into the cycle the same way `drive_once`'s
/// are — a break-upon handler's side effects are genuinely live (it is
/// invoked exactly once per occurrence, never replayed), so `live` starts
/// `true` here unconditionally.
pub fn invoke_break_upon(
    handler: &Arc<dyn Fn(&Event, &BreakUponContext) + Send + Sync>,
    event: &Event,
    name: &str,
    services: Arc<BThreadServices>,
) -> DriveEffects {
    let runtime = Arc::new(BThreadRuntime {
        name: name.to_string(),
        replay_log: Vec::new(),
        cursor: AtomicUsize::new(0),
        pending_statement: Mutex::new(None),
        suspension_allowed: AtomicBool::new(false),
        live: AtomicBool::new(true),
        services,
        effects: DriveEffects::default(),
    });
    let ctx = BreakUponContext {
        inner: BpContext {
            inner: runtime.clone(),
        },
    };
    handler(event, &ctx);
    drop(ctx);
    // Safe: the handler (the only other owner of `ctx`'s inner Arc) has
    // returned and `ctx` was just dropped, so this binding is the sole
    // remaining reference.
    match Arc::try_unwrap(runtime) {
        Ok(rt) => rt.effects,
        Err(rt) => DriveEffects {
            registrations: Mutex::new(std::mem::take(&mut *rt.effects.registrations.lock())),
            external_events: Mutex::new(std::mem::take(&mut *rt.effects.external_events.lock())),
        },
    }
}

/// Wire representation of a b-thread's continuation (the persisted-state
/// shape from the external interfaces): the body itself is not
/// serializable, so only its registry key travels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BThreadSnapshotWire {
    pub name: String,
    pub registration_index: u64,
    pub body_key: String,
    pub replay_log: Vec<Event>,
}
