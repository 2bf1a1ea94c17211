use crate::error::BpError;
use crate::event::Event;
use crate::runner::ExitReason;

/// A lifecycle notification dispatched once per occurrence, in the fixed
/// order the concurrency model promises for one super-step: interrupts,
/// resumes, terminations, new-b-thread starts, then the snapshot itself.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started,
    SuperstepDone,
    EventSelected(Event),
    BThreadAdded(String),
    BThreadDone(String),
    BThreadRemoved(String),
    AssertionFailed(String),
    Ended(ExitReason),
    Halted(BpError),
}

/// Host-facing observer of engine lifecycle events. Dispatch is synchronous
/// and ordered: a listener's `on_event` runs to completion before the next
/// callback fires, matching the strict cycle barrier in §5.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &EngineEvent);
}

/// Forwards every callback to `tracing`, at a level matching its severity:
/// `info!` for ordinary lifecycle, `warn!` for assertion failures and halts,
/// `debug!` for per-cycle detail.
#[derive(Default)]
pub struct TracingListener;

impl Listener for TracingListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Started => tracing::info!("program started"),
            EngineEvent::SuperstepDone => tracing::debug!("superstep done"),
            EngineEvent::EventSelected(e) => tracing::debug!(event = %e, "event selected"),
            EngineEvent::BThreadAdded(name) => tracing::info!(bthread = %name, "bthread added"),
            EngineEvent::BThreadDone(name) => tracing::info!(bthread = %name, "bthread done"),
            EngineEvent::BThreadRemoved(name) => {
                tracing::info!(bthread = %name, "bthread removed (interrupted)")
            }
            EngineEvent::AssertionFailed(reason) => {
                tracing::warn!(reason = %reason, "assertion failed")
            }
            EngineEvent::Ended(reason) => tracing::info!(?reason, "program ended"),
            EngineEvent::Halted(err) => tracing::warn!(error = %err, "program halted"),
        }
    }
}
