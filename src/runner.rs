use crate::engine;
use crate::error::BpError;
use crate::listener::EngineEvent;
use crate::program::{Program, ProgramSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Why a run stopped. Mirrors the exit conditions in the external
/// interfaces (§6): `Normal` covers both "no b-threads left" and "nothing
/// selectable, non-daemon, nobody was genuinely waiting"; `Deadlock` is the
/// same empty-selectable case but at least one b-thread still had an unmet
/// `wait_for`.
#[derive(Debug, Clone)]
pub enum ExitReason {
    Normal,
    Deadlock,
    Aborted,
    Error(BpError),
}

/// Drives `Program::start` then repeatedly `select -> advance` until
/// termination, forwarding lifecycle events to the program's listeners.
/// Owns the external stop signal and the optional per-cycle timeout; does
/// not own the b-thread state itself, which lives entirely in the
/// `ProgramSnapshot` chain.
pub struct Runner {
    stop: Arc<AtomicBool>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Runner {
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle the host can flip from another task to request a stop.
    /// Honored only at cycle boundaries (§5), never mid-b-thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Runs `program` to completion. Returns the final snapshot (if one was
    /// produced) paired with why the run ended.
    pub async fn run(&self, program: &Program) -> (Option<ProgramSnapshot>, ExitReason) {
        program.notify_listeners(&EngineEvent::Started);

        let mut snapshot = match engine::start(program) {
            Ok(s) => s,
            Err(e) => {
                program.notify_listeners(&EngineEvent::Halted(e.clone()));
                return (None, ExitReason::Error(e));
            }
        };

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return (Some(snapshot), ExitReason::Aborted);
            }

            if snapshot.bthreads.is_empty() {
                program.notify_listeners(&EngineEvent::Ended(ExitReason::Normal));
                return (Some(snapshot), ExitReason::Normal);
            }

            let selected = match program
                .strategy
                .select(&snapshot.bthreads, &snapshot.external_queue)
            {
                Ok(s) => s,
                Err(e) => {
                    program.notify_listeners(&EngineEvent::Halted(e.clone()));
                    return (Some(snapshot), ExitReason::Error(e));
                }
            };

            let selected = match selected {
                Some(s) => s,
                None if snapshot.daemon => {
                    program.wait_for_external().await;
                    snapshot = drain_host_queue(program, snapshot);
                    continue;
                }
                None => {
                    let deadlock = snapshot.bthreads.iter().any(|b| b.is_waiting());
                    let reason = if deadlock {
                        ExitReason::Deadlock
                    } else {
                        ExitReason::Normal
                    };
                    program.notify_listeners(&EngineEvent::Ended(reason.clone()));
                    return (Some(snapshot), reason);
                }
            };

            program.notify_listeners(&EngineEvent::EventSelected(selected.event.clone()));

            let advanced = match program.config.cycle_timeout {
                Some(budget) => run_with_timeout(budget, || {
                    engine::advance(program, &snapshot, selected.event.clone(), selected.source)
                }),
                None => engine::advance(program, &snapshot, selected.event.clone(), selected.source),
            };

            match advanced {
                Ok(next) => {
                    program.notify_listeners(&EngineEvent::SuperstepDone);
                    snapshot = next;
                }
                Err(e) => {
                    program.notify_listeners(&EngineEvent::Halted(e.clone()));
                    return (Some(snapshot), ExitReason::Error(e));
                }
            }
        }
    }
}

/// Appends any events the host enqueued (via `Program::enqueue_external_event`)
/// while the runner was parked in daemon mode onto the snapshot's queue
/// in-place, without consuming a trigger guard (no cycle ran).
fn drain_host_queue(program: &Program, mut snapshot: ProgramSnapshot) -> ProgramSnapshot {
    snapshot
        .external_queue
        .extend(program.take_pending_external());
    snapshot
}

/// `advance` itself is synchronous CPU work (driving replay logs), so this
/// cannot preempt a cycle that overruns its budget the way a true
/// cancellable-worker timeout would: `f()` always runs to completion first,
/// and only then is the elapsed time checked. This is deliberately a
/// best-effort, post-hoc budget check — it reports a cycle that overran
/// `budget` as `CycleTimeout` (so a host sees the violation and can decide
/// what to do about it), but it cannot bound how long that overrunning cycle
/// actually took to return control here. A hard ceiling would require
/// driving `advance` on a cancellable worker (e.g. a dedicated OS thread
/// killed on timeout) rather than inline on the runner's task.
fn run_with_timeout<F>(budget: Duration, f: F) -> Result<ProgramSnapshot, BpError>
where
    F: FnOnce() -> Result<ProgramSnapshot, BpError>,
{
    let start = std::time::Instant::now();
    let result = f();
    if start.elapsed() > budget {
        return Err(BpError::CycleTimeout);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bthread::BThreadBody;
    use crate::config::EngineConfig;
    use crate::event::Event;
    use crate::eventset::EventSet;
    use crate::statement::SyncStatement;

    fn once_body(name: &'static str) -> Arc<dyn BThreadBody> {
        Arc::new(move |ctx: crate::bthread::BpContext| async move {
            ctx.bsync(SyncStatement::builder().request(Event::new(name)).build())
                .await?;
            Ok(())
        })
    }

    #[tokio::test]
    async fn empty_program_ends_normal_immediately() {
        let program = Program::new(EngineConfig::new(0));
        let runner = Runner::new();
        let (snapshot, reason) = runner.run(&program).await;
        assert!(matches!(reason, ExitReason::Normal));
        assert!(snapshot.unwrap().bthreads.is_empty());
    }

    #[tokio::test]
    async fn single_shot_bthread_runs_to_normal_completion() {
        let program = Program::new(EngineConfig::new(0));
        program.register_bthread(Some("a"), once_body("hot"));
        let runner = Runner::new();
        let (snapshot, reason) = runner.run(&program).await;
        assert!(matches!(reason, ExitReason::Normal));
        assert!(snapshot.unwrap().bthreads.is_empty());
    }

    #[tokio::test]
    async fn unmet_wait_for_without_daemon_reports_deadlock() {
        let body: Arc<dyn BThreadBody> = Arc::new(|ctx: crate::bthread::BpContext| async move {
            ctx.bsync(
                SyncStatement::builder()
                    .wait_for(EventSet::singleton(Event::new("never")))
                    .build(),
            )
            .await?;
            Ok(())
        });
        let program = Program::new(EngineConfig::new(0));
        program.register_bthread(Some("a"), body);
        let runner = Runner::new();
        let (_snapshot, reason) = runner.run(&program).await;
        assert!(matches!(reason, ExitReason::Deadlock));
    }

    #[tokio::test]
    async fn stop_handle_aborts_at_next_cycle_boundary() {
        let body: Arc<dyn BThreadBody> = Arc::new(|ctx: crate::bthread::BpContext| async move {
            loop {
                ctx.bsync(SyncStatement::builder().request(Event::new("tick")).build())
                    .await?;
            }
        });
        let program = Program::new(EngineConfig::new(0));
        program.register_bthread(Some("a"), body);
        let runner = Runner::new();
        runner.request_stop();
        let (_snapshot, reason) = runner.run(&program).await;
        assert!(matches!(reason, ExitReason::Aborted));
    }
}
