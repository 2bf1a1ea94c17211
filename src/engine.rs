use crate::bthread::{drive_once, invoke_break_upon, BThreadBody, DriveOutcome};
use crate::error::BpError;
use crate::event::Event;
use crate::program::{BThreadSnapshot, Program, ProgramSnapshot};
use crate::selection::EventSource;
use std::collections::VecDeque;
use std::sync::Arc;

/// Runs every host-registered b-thread to its first suspension.
///
/// Deliberately *not* recursive: a b-thread registered as a side effect of
/// one of these initial bodies is not itself started here. There is no
/// event yet for it to be "resumed by the event that caused its parent to
/// advance" (§5) the way a mid-cycle registration is, so it is queued (via
/// `program`'s pending-registration buffer) and started by the first
/// `advance` call's step 6 instead — present starting with the *second*
/// selected event, not the first. This matches the dynamic-registration
/// scenario in §8: a b-thread that registers a child and then requests `E1`
/// during its own start sees `E1` selected before the child has any
/// statement at all.
pub fn start(program: &Program) -> Result<ProgramSnapshot, BpError> {
    let initial = program.take_initial_bthreads();
    let mut bthreads = Vec::new();
    let mut harvested_external = VecDeque::new();

    for (name, index, body) in initial {
        let (outcome, effects) = drive_once(&name, &body, Vec::new(), program.services.clone());
        match outcome {
            DriveOutcome::Terminated => {
                program.notify_listeners(&crate::listener::EngineEvent::BThreadDone(name.clone()));
            }
            DriveOutcome::Failed(e) => return Err(e),
            DriveOutcome::Suspended(stmt) => {
                program.notify_listeners(&crate::listener::EngineEvent::BThreadAdded(name.clone()));
                bthreads.push(BThreadSnapshot {
                    name: name.clone(),
                    registration_index: index,
                    body_key: name,
                    body,
                    replay_log: Arc::new(Vec::new()),
                    current_statement: Some(stmt),
                });
            }
        }
        for (n, b) in effects.registrations.into_inner() {
            let (resolved, idx) = program.alloc_registration(n);
            program.defer_registration(resolved, idx, b);
        }
        harvested_external.extend(effects.external_events.into_inner());
    }

    validate_statements(&bthreads)?;

    let mut queue = program.take_pending_external();
    queue.extend(harvested_external);
    Ok(ProgramSnapshot::new(
        bthreads,
        queue,
        program.is_daemon_mode(),
        0,
    ))
}

/// One super-step: the cycle arbiter algorithm.
///
/// `event` must already be a selectable event at `snapshot` (computed by a
/// `SelectionStrategy` and fed in by the `Runner`); `advance` does not
/// itself choose an event, it resumes whichever b-threads match the one
/// it's given. `source` records whether the strategy drew `event` from a
/// request or from the external queue, which is what makes popping the
/// queue (step 7) unambiguous instead of guessing from queue contents.
pub fn advance(
    program: &Program,
    snapshot: &ProgramSnapshot,
    event: Event,
    source: EventSource,
) -> Result<ProgramSnapshot, BpError> {
    snapshot.mark_triggered()?;
    validate_statements(&snapshot.bthreads)?;

    let mut resuming = Vec::new();
    let mut sleeping = Vec::new();

    // Declared here (rather than alongside "Step 5") so the interrupt loop
    // below can fold a break-upon handler's own registrations/external
    // events into the same buffers the resume loop drains into.
    let mut newly_pending: VecDeque<(String, u64, Arc<dyn BThreadBody>)> = VecDeque::new();
    let mut harvested_external = VecDeque::new();

    // Step 3: interrupts. A b-thread whose interrupt set contains the
    // selected event is removed; its break-upon handler (if any) fires in a
    // context where suspension is structurally disabled.
    for bt in &snapshot.bthreads {
        let stmt = bt
            .current_statement
            .as_ref()
            .expect("every live b-thread has a statement after its first suspension");
        if stmt.interrupt.contains(&event)? {
            if let Some(handler) = &stmt.break_upon {
                let effects =
                    invoke_break_upon(handler, &event, &bt.name, program.services.clone());
                for (n, b) in effects.registrations.into_inner() {
                    let (resolved, idx) = program.alloc_registration(n);
                    newly_pending.push_back((resolved, idx, b));
                }
                harvested_external.extend(effects.external_events.into_inner());
            }
            program.notify_listeners(&crate::listener::EngineEvent::BThreadRemoved(bt.name.clone()));
            continue;
        }
        if stmt.request.contains(&event) || stmt.wait_for.contains(&event)? {
            resuming.push(bt.clone());
        } else {
            sleeping.push(bt.clone());
        }
    }

    // Step 5: resume matching b-threads by re-driving their continuation
    // with `event` appended to the replay log.
    let mut resumed = Vec::new();

    for bt in resuming {
        let mut replay_log = (*bt.replay_log).clone();
        replay_log.push(event.clone());
        let (outcome, effects) =
            drive_once(&bt.name, &bt.body, replay_log.clone(), program.services.clone());
        match outcome {
            DriveOutcome::Terminated => {
                program.notify_listeners(&crate::listener::EngineEvent::BThreadDone(bt.name.clone()));
            }
            DriveOutcome::Failed(e) => return Err(e),
            DriveOutcome::Suspended(stmt) => {
                resumed.push(BThreadSnapshot {
                    name: bt.name.clone(),
                    registration_index: bt.registration_index,
                    body_key: bt.body_key.clone(),
                    body: bt.body.clone(),
                    replay_log: Arc::new(replay_log),
                    current_statement: Some(stmt),
                });
            }
        }
        for (n, b) in effects.registrations.into_inner() {
            let (resolved, idx) = program.alloc_registration(n);
            newly_pending.push_back((resolved, idx, b));
        }
        harvested_external.extend(effects.external_events.into_inner());
    }

    // Step 6: drain newly registered b-threads (and anything they in turn
    // register), single-threaded so discovery order is deterministic. Also
    // picks up anything deferred by `start()`'s initial pass — relevant only
    // to the very first `advance()` call, since the buffer is empty after.
    // Deferred entries were allocated earlier (during `start()`) so they go
    // first, ahead of anything this cycle's resumes just discovered.
    let mut deferred = program.take_pending_registrations();
    deferred.append(&mut newly_pending);
    let mut newly_pending = deferred;
    let mut newly_started = Vec::new();
    while let Some((name, index, body)) = newly_pending.pop_front() {
        let (outcome, effects) = drive_once(&name, &body, Vec::new(), program.services.clone());
        match outcome {
            DriveOutcome::Terminated => {
                program.notify_listeners(&crate::listener::EngineEvent::BThreadDone(name.clone()));
            }
            DriveOutcome::Failed(e) => return Err(e),
            DriveOutcome::Suspended(stmt) => {
                program.notify_listeners(&crate::listener::EngineEvent::BThreadAdded(name.clone()));
                newly_started.push(BThreadSnapshot {
                    name: name.clone(),
                    registration_index: index,
                    body_key: name,
                    body,
                    replay_log: Arc::new(Vec::new()),
                    current_statement: Some(stmt),
                });
            }
        }
        for (n, b) in effects.registrations.into_inner() {
            let (resolved, idx) = program.alloc_registration(n);
            newly_pending.push_back((resolved, idx, b));
        }
        harvested_external.extend(effects.external_events.into_inner());
    }

    // Step 7: drain external events accumulated this cycle, plus whatever
    // was already queued and not consumed by this selection.
    let mut queue = snapshot.external_queue.clone();
    if source == EventSource::External {
        if let Some(pos) = queue.iter().position(|e| e == &event) {
            queue.remove(pos);
        }
    }
    queue.extend(program.take_pending_external());
    queue.extend(harvested_external);

    let mut bthreads = resumed;
    bthreads.extend(sleeping);
    bthreads.extend(newly_started);

    Ok(ProgramSnapshot::new(
        bthreads,
        queue,
        program.is_daemon_mode(),
        snapshot.next_auto_id,
    ))
}

/// Step 2: an event must not appear in both a statement's `request` and its
/// own `block` set. Checked independent of which event is ultimately
/// selected.
fn validate_statements(bthreads: &[BThreadSnapshot]) -> Result<(), BpError> {
    for bt in bthreads {
        if let Some(stmt) = &bt.current_statement {
            for e in &stmt.request {
                if stmt.block.contains(e)? {
                    return Err(BpError::InvalidStatement {
                        bthread: bt.name.clone(),
                        reason: format!("requests and blocks the same event '{e}'"),
                    });
                }
            }
        }
    }
    Ok(())
}
