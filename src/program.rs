use crate::bthread::{BThreadBody, BThreadServices, BodyRegistry, HashMapBodyRegistry};
use crate::config::EngineConfig;
use crate::error::BpError;
use crate::event::Event;
use crate::listener::{EngineEvent, Listener};
use crate::resource::{NullResourceLoader, ResourceLoader};
use crate::scope::GlobalScope;
use crate::selection::EventSource;
use crate::statement::SyncStatement;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A b-thread's identity within a program, as returned by
/// `Program::register_bthread`. Plain `String` today (the name itself is
/// the identity, auto-generated when absent); aliased so call sites read
/// the way the external interface (§6) describes them.
pub type BThreadId = String;

/// A suspended b-thread as it exists inside one `ProgramSnapshot`.
///
/// The continuation is `(body, replay_log)`: re-driving `body` from the
/// start while fast-forwarding through `replay_log` reconstructs the live
/// execution point. Both fields are `Arc`-backed, so this type is cheaply
/// `Clone`, which is what lets a whole `ProgramSnapshot` be forked.
#[derive(Clone)]
pub struct BThreadSnapshot {
    pub name: String,
    pub registration_index: u64,
    pub body_key: String,
    pub body: Arc<dyn BThreadBody>,
    pub replay_log: Arc<Vec<Event>>,
    pub current_statement: Option<SyncStatement>,
}

impl BThreadSnapshot {
    pub fn is_waiting(&self) -> bool {
        self.current_statement
            .as_ref()
            .map(|s| !s.wait_for.is_empty_syntactically())
            .unwrap_or(false)
    }
}

/// The immutable state of a program at a cycle boundary: the unit of
/// replay and of exploration forks.
pub struct ProgramSnapshot {
    pub bthreads: Vec<BThreadSnapshot>,
    pub external_queue: VecDeque<Event>,
    pub daemon: bool,
    pub next_auto_id: u64,
    triggered: Arc<AtomicBool>,
}

impl ProgramSnapshot {
    pub(crate) fn new(
        bthreads: Vec<BThreadSnapshot>,
        external_queue: VecDeque<Event>,
        daemon: bool,
        next_auto_id: u64,
    ) -> Self {
        ProgramSnapshot {
            bthreads,
            external_queue,
            daemon,
            next_auto_id,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Consumes the one-shot trigger guard. Fails on the second call for a
    /// given lineage (a fresh `clone()` resets the guard, which is exactly
    /// what makes forking for exploration safe).
    pub(crate) fn mark_triggered(&self) -> Result<(), BpError> {
        if self.triggered.swap(true, Ordering::SeqCst) {
            Err(BpError::SnapshotReused)
        } else {
            Ok(())
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Content hash over live b-thread identities, replay progress and the
    /// external queue. Used by external state-space exploration to dedupe
    /// visited states; the core does not explore states itself.
    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint_with(true)
    }

    /// Queue-insensitive variant: two snapshots differing only in pending
    /// external events hash the same. See the design notes on snapshot
    /// equality.
    pub fn fingerprint_ignoring_queue(&self) -> [u8; 32] {
        self.fingerprint_with(false)
    }

    fn fingerprint_with(&self, include_queue: bool) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for bt in &self.bthreads {
            hasher.update(bt.name.as_bytes());
            hasher.update(bt.registration_index.to_le_bytes());
            hasher.update(bt.replay_log.len().to_le_bytes());
        }
        if include_queue {
            for e in &self.external_queue {
                hasher.update(e.name.as_bytes());
                if let Some(p) = &e.payload {
                    hasher.update(p.to_string().as_bytes());
                }
            }
        }
        hasher.update([self.daemon as u8]);
        hasher.finalize().into()
    }
}

impl Clone for ProgramSnapshot {
    fn clone(&self) -> Self {
        ProgramSnapshot {
            bthreads: self.bthreads.clone(),
            external_queue: self.external_queue.clone(),
            daemon: self.daemon,
            next_auto_id: self.next_auto_id,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Host-facing entry point: owns construction-time services (global scope,
/// resource loader, seeded PRNG, body registry) and the pre-`start()`
/// registration buffer. Once running, the live state lives entirely in
/// `ProgramSnapshot` values threaded through `Program::start`/`advance`.
pub struct Program {
    pub(crate) config: EngineConfig,
    pub(crate) services: Arc<BThreadServices>,
    pub(crate) registry: Arc<dyn BodyRegistry>,
    next_auto_id: AtomicU64,
    initial_bthreads: Mutex<Vec<(String, u64, Arc<dyn BThreadBody>)>>,
    pending_registrations: Mutex<VecDeque<(String, u64, Arc<dyn BThreadBody>)>>,
    pending_external: Mutex<VecDeque<Event>>,
    pub(crate) strategy: Arc<dyn crate::selection::SelectionStrategy>,
    next_listener_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Arc<dyn Listener>)>>,
    external_notify: tokio::sync::Notify,
}

impl Program {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_resource_loader(config, Arc::new(NullResourceLoader))
    }

    pub fn with_resource_loader(config: EngineConfig, resource_loader: Arc<dyn ResourceLoader>) -> Self {
        let rng = Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)));
        let daemon_mode = Arc::new(AtomicBool::new(config.daemon));
        let services = Arc::new(BThreadServices {
            global_scope: Arc::new(GlobalScope::new()),
            resource_loader,
            rng,
            daemon_mode,
        });
        Program {
            config,
            services,
            registry: Arc::new(HashMapBodyRegistry::new()),
            next_auto_id: AtomicU64::new(0),
            initial_bthreads: Mutex::new(Vec::new()),
            pending_registrations: Mutex::new(VecDeque::new()),
            pending_external: Mutex::new(VecDeque::new()),
            strategy: Arc::new(crate::selection::PriorityStrategy),
            next_listener_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            external_notify: tokio::sync::Notify::new(),
        }
    }

    /// Swaps in a different event-selection strategy, e.g.
    /// `SeededRandomStrategy` for model-checking branch exploration.
    pub fn with_strategy(mut self, strategy: Arc<dyn crate::selection::SelectionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Registers a b-thread to be started by the next `start()` call. `name`
    /// defaults to `autoadded-<n>` when absent, matching the host interface
    /// auto-naming rule. Registration order here is discovery order, since
    /// nothing has run yet.
    pub fn register_bthread(&self, name: Option<&str>, body: Arc<dyn BThreadBody>) -> BThreadId {
        let (resolved, index) = self.alloc_registration(name.map(str::to_string));
        self.initial_bthreads
            .lock()
            .push((resolved.clone(), index, body));
        resolved
    }

    /// Resolves an auto-name (if `name` is absent) and a registration index
    /// from the single shared counter, so auto-naming and registration
    /// ordering always move in lock-step regardless of whether this is a
    /// pre-`start()` registration or one discovered mid-cycle.
    pub(crate) fn alloc_registration(&self, name: Option<String>) -> (String, u64) {
        let index = self.next_auto_id.fetch_add(1, Ordering::SeqCst);
        let resolved = name.unwrap_or_else(|| format!("autoadded-{index}"));
        (resolved, index)
    }

    pub fn enqueue_external_event(&self, e: Event) {
        self.pending_external.lock().push_back(e);
        self.external_notify.notify_waiters();
    }

    /// Runs every registered b-thread to its first suspension (§4.4's
    /// no-event variant). Thin wrapper over the free function in
    /// `engine`, kept here so the host-facing API matches §6 exactly.
    pub fn start(&self) -> Result<ProgramSnapshot, BpError> {
        crate::engine::start(self)
    }

    /// One super-step. Determines whether `event` came from a live
    /// b-thread's request or from outside by checking the snapshot's
    /// current statements, so callers driving the engine directly (tests,
    /// a host without a `Runner`) don't need to track event provenance
    /// themselves the way `Runner` does internally.
    pub fn advance(
        &self,
        snapshot: &ProgramSnapshot,
        event: Event,
    ) -> Result<ProgramSnapshot, BpError> {
        let requested = snapshot.bthreads.iter().any(|b| {
            b.current_statement
                .as_ref()
                .map(|s| s.request.contains(&event))
                .unwrap_or(false)
        });
        let source = if requested {
            EventSource::Requested
        } else {
            EventSource::External
        };
        crate::engine::advance(self, snapshot, event, source)
    }

    /// Registers a listener, returning an id usable with `remove_listener`.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Dispatches `event` to every registered listener, in registration
    /// order, synchronously (§4.6).
    pub(crate) fn notify_listeners(&self, event: &EngineEvent) {
        for (_, listener) in self.listeners.lock().iter() {
            listener.on_event(event);
        }
    }

    /// Parks until an external event is enqueued (daemon mode, §4.5's
    /// "selectable empty and daemon" branch). Used only by `Runner`.
    pub(crate) async fn wait_for_external(&self) {
        if !self.pending_external.lock().is_empty() {
            return;
        }
        self.external_notify.notified().await;
    }

    pub fn is_daemon_mode(&self) -> bool {
        self.services.daemon_mode.load(Ordering::SeqCst)
    }

    pub fn set_daemon_mode(&self, daemon: bool) {
        self.services.daemon_mode.store(daemon, Ordering::SeqCst);
    }

    pub fn global_scope(&self) -> &GlobalScope {
        &self.services.global_scope
    }

    pub(crate) fn take_initial_bthreads(&self) -> Vec<(String, u64, Arc<dyn BThreadBody>)> {
        std::mem::take(&mut *self.initial_bthreads.lock())
    }

    pub(crate) fn take_pending_external(&self) -> VecDeque<Event> {
        std::mem::take(&mut *self.pending_external.lock())
    }

    /// Queues a b-thread registered as a side effect of `start()`'s initial
    /// pass, to be started by the first `advance()` call instead of within
    /// `start()` itself (see `engine::start`'s doc comment).
    pub(crate) fn defer_registration(&self, name: String, index: u64, body: Arc<dyn BThreadBody>) {
        self.pending_registrations.lock().push_back((name, index, body));
    }

    pub(crate) fn take_pending_registrations(&self) -> VecDeque<(String, u64, Arc<dyn BThreadBody>)> {
        std::mem::take(&mut *self.pending_registrations.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_clone_resets_trigger_guard() {
        let snap = ProgramSnapshot::new(vec![], VecDeque::new(), false, 0);
        snap.mark_triggered().unwrap();
        assert!(matches!(snap.mark_triggered(), Err(BpError::SnapshotReused)));

        let fork = snap.clone();
        assert!(!fork.is_triggered());
        fork.mark_triggered().unwrap();
    }

    #[test]
    fn fingerprint_ignoring_queue_is_stable_across_queue_differences() {
        let mut snap_a = ProgramSnapshot::new(vec![], VecDeque::new(), false, 0);
        snap_a.external_queue.push_back(Event::new("x"));
        let snap_b = ProgramSnapshot::new(vec![], VecDeque::new(), false, 0);
        assert_eq!(
            snap_a.fingerprint_ignoring_queue(),
            snap_b.fingerprint_ignoring_queue()
        );
        assert_ne!(snap_a.fingerprint(), snap_b.fingerprint());
    }
}
