//! End-to-end scenarios exercising the full cycle arbiter through `Program`
//! and `Runner`, mirroring the engine-facade integration style: bodies built
//! as ordinary async closures, a recording `Listener` standing in for a real
//! host, assertions against the resulting event sequence and exit reason.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bp_engine::{
    BpContext, Event, EventSet, ExitReason, Listener, EngineEvent, EngineConfig, Program, Runner,
    SyncStatement,
};

/// Records every selected event and every removal/lifecycle notice, in
/// dispatch order, for assertion against the expected trace.
#[derive(Default)]
struct Recorder {
    selected: Mutex<Vec<Event>>,
    removed: Mutex<Vec<String>>,
}

impl Listener for Recorder {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::EventSelected(e) => self.selected.lock().unwrap().push(e.clone()),
            EngineEvent::BThreadRemoved(name) => self.removed.lock().unwrap().push(name.clone()),
            _ => {}
        }
    }
}

fn new_program(seed: u64) -> Program {
    init_tracing();
    Program::new(EngineConfig::new(seed))
}

/// Mirrors the teacher's server-binary `tracing_subscriber::fmt()` setup, but
/// scoped to tests: routes through the test harness's writer and tolerates
/// being called once per test process.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Three times `request(name)`, one `bsync` per call.
fn request_n_times(name: &'static str, n: usize) -> Arc<dyn bp_engine::BThreadBody> {
    Arc::new(move |ctx: BpContext| async move {
        for _ in 0..n {
            ctx.bsync(SyncStatement::builder().request(ctx.event(name)).build())
                .await?;
        }
        Ok(())
    })
}

#[tokio::test]
async fn scenario_1_hot_cold_alternation() {
    let program = new_program(0);
    program.register_bthread(Some("a"), request_n_times("hot", 3));
    program.register_bthread(Some("b"), request_n_times("cold", 3));

    let c: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        for _ in 0..3 {
            ctx.bsync(
                SyncStatement::builder()
                    .wait_for(EventSet::singleton(ctx.event("cold")))
                    .block(EventSet::singleton(ctx.event("hot")))
                    .build(),
            )
            .await?;
            ctx.bsync(
                SyncStatement::builder()
                    .wait_for(EventSet::singleton(ctx.event("hot")))
                    .block(EventSet::singleton(ctx.event("cold")))
                    .build(),
            )
            .await?;
        }
        ctx.bsync(
            SyncStatement::builder()
                .request(ctx.event("all_done"))
                .build(),
        )
        .await?;
        Ok(())
    });
    program.register_bthread(Some("c"), c);

    let recorder = Arc::new(Recorder::default());
    program.add_listener(recorder.clone());

    let runner = Runner::new();
    let (snapshot, reason) = runner.run(&program).await;
    assert!(matches!(reason, ExitReason::Normal));
    assert!(snapshot.unwrap().bthreads.is_empty());

    let names: Vec<String> = recorder
        .selected
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(
        names,
        vec!["cold", "hot", "cold", "hot", "cold", "hot", "all_done"]
    );
}

#[tokio::test]
async fn scenario_2_external_event_gate_without_daemon_deadlocks() {
    let program = new_program(0);
    let body: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        ctx.bsync(SyncStatement::builder().request(ctx.event("in1a")).build())
            .await?;
        ctx.bsync(
            SyncStatement::builder()
                .wait_for(EventSet::singleton(ctx.event("ext1")))
                .build(),
        )
        .await?;
        ctx.bsync(SyncStatement::builder().request(ctx.event("in1b")).build())
            .await?;
        Ok(())
    });
    program.register_bthread(Some("in1"), body);

    let runner = Runner::new();
    let (_snapshot, reason) = runner.run(&program).await;
    assert!(matches!(reason, ExitReason::Deadlock));
}

#[tokio::test]
async fn scenario_2_external_event_gate_with_enqueue_runs_to_completion() {
    let program = new_program(0);
    let body: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        ctx.bsync(SyncStatement::builder().request(ctx.event("in1a")).build())
            .await?;
        ctx.bsync(
            SyncStatement::builder()
                .wait_for(EventSet::singleton(ctx.event("ext1")))
                .build(),
        )
        .await?;
        ctx.bsync(SyncStatement::builder().request(ctx.event("in1b")).build())
            .await?;
        Ok(())
    });
    program.register_bthread(Some("in1"), body);
    program.enqueue_external_event(Event::new("ext1"));

    let recorder = Arc::new(Recorder::default());
    program.add_listener(recorder.clone());

    let runner = Runner::new();
    let (snapshot, reason) = runner.run(&program).await;
    assert!(matches!(reason, ExitReason::Normal));
    assert!(snapshot.unwrap().bthreads.is_empty());

    let names: Vec<String> = recorder
        .selected
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(names, vec!["in1a", "ext1", "in1b"]);
}

#[tokio::test]
async fn scenario_3_dynamic_registration_is_absent_until_next_cycle() {
    let program = new_program(0);
    let parent: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        ctx.register_bthread(Some("child"), request_n_times("e2", 1));
        ctx.bsync(SyncStatement::builder().request(ctx.event("e1")).build())
            .await?;
        Ok(())
    });
    program.register_bthread(Some("parent"), parent);

    let cycle1 = program.start().unwrap();
    assert_eq!(cycle1.bthreads.len(), 1);
    assert_eq!(cycle1.bthreads[0].name, "parent");

    let cycle2 = program.advance(&cycle1, Event::new("e1")).unwrap();
    assert_eq!(cycle2.bthreads.len(), 1);
    assert_eq!(cycle2.bthreads[0].name, "child");

    let cycle3 = program.advance(&cycle2, Event::new("e2")).unwrap();
    assert!(cycle3.bthreads.is_empty());
}

#[tokio::test]
async fn scenario_4_break_upon_interrupts_and_enqueues() {
    let program = new_program(0);

    let b_requester: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        ctx.bsync(SyncStatement::builder().request(ctx.event("B")).build())
            .await?;
        Ok(())
    });
    program.register_bthread(Some("b_requester"), b_requester);

    let main: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        ctx.bsync(
            SyncStatement::builder()
                .request(ctx.event("A"))
                .interrupt(EventSet::singleton(ctx.event("B")))
                .break_upon(|_event, bctx| {
                    bctx.enqueue_external_event(Event::new("C"));
                })
                .build(),
        )
        .await?;
        Ok(())
    });
    program.register_bthread(Some("main"), main);

    let listener: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        ctx.bsync(
            SyncStatement::builder()
                .wait_for(EventSet::singleton(ctx.event("C")))
                .build(),
        )
        .await?;
        Ok(())
    });
    program.register_bthread(Some("listener"), listener);

    let recorder = Arc::new(Recorder::default());
    program.add_listener(recorder.clone());

    let runner = Runner::new();
    let (snapshot, reason) = runner.run(&program).await;
    assert!(matches!(reason, ExitReason::Normal));
    assert!(snapshot.unwrap().bthreads.is_empty());

    let names: Vec<String> = recorder
        .selected
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.name.clone())
        .collect();
    assert_eq!(names, vec!["B", "C"]);
    assert_eq!(*recorder.removed.lock().unwrap(), vec!["main".to_string()]);
}

#[tokio::test]
async fn scenario_5_get_time_stores_a_timestamp_within_bounds() {
    let program = new_program(0);
    let body: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        let t = ctx.now_ms();
        ctx.global_scope().set("observed_time", serde_json::json!(t));
        Ok(())
    });
    program.register_bthread(Some("clock"), body);

    let t_pre = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;

    let runner = Runner::new();
    let (snapshot, reason) = runner.run(&program).await;
    assert!(matches!(reason, ExitReason::Normal));
    assert!(snapshot.unwrap().bthreads.is_empty());

    let t_post = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;

    let stored: u64 = program
        .global_scope()
        .get("observed_time")
        .expect("clock bthread must have published a timestamp");
    assert!(t_pre <= stored && stored <= t_post);
}

#[tokio::test]
async fn scenario_6_snapshot_reuse_fails_regardless_of_event() {
    let program = new_program(0);
    let body: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        ctx.bsync(SyncStatement::builder().request(ctx.event("hot")).build())
            .await?;
        Ok(())
    });
    program.register_bthread(Some("a"), body);

    let snap = program.start().unwrap();
    program.advance(&snap, Event::new("hot")).unwrap();

    let err = program.advance(&snap, Event::new("anything")).unwrap_err();
    assert!(matches!(err, bp_engine::BpError::SnapshotReused));
}

#[tokio::test]
async fn zero_bthreads_terminates_immediately() {
    let program = new_program(0);
    let runner = Runner::new();
    let (snapshot, reason) = runner.run(&program).await;
    assert!(matches!(reason, ExitReason::Normal));
    assert!(snapshot.unwrap().bthreads.is_empty());
}

#[tokio::test]
async fn request_and_wait_for_same_event_resumes_when_selected() {
    let program = new_program(0);
    let body: Arc<dyn bp_engine::BThreadBody> = Arc::new(|ctx: BpContext| async move {
        ctx.bsync(
            SyncStatement::builder()
                .request(ctx.event("x"))
                .wait_for(EventSet::singleton(ctx.event("x")))
                .build(),
        )
        .await?;
        Ok(())
    });
    program.register_bthread(Some("a"), body);

    let snap = program.start().unwrap();
    let next = program.advance(&snap, Event::new("x")).unwrap();
    assert!(next.bthreads.is_empty());
}

#[tokio::test]
async fn external_event_enqueued_after_termination_is_ignored() {
    let program = new_program(0);
    let body: Arc<dyn bp_engine::BThreadBody> =
        Arc::new(|_ctx: BpContext| async move { Ok(()) });
    program.register_bthread(Some("a"), body);

    let runner = Runner::new();
    let (_snapshot, reason) = runner.run(&program).await;
    assert!(matches!(reason, ExitReason::Normal));

    // Nothing is listening anymore; enqueuing must not panic or resurrect a
    // b-thread.
    program.enqueue_external_event(Event::new("late"));
}

#[tokio::test]
async fn registration_order_breaks_ties_among_equal_requests() {
    let program = new_program(0);
    let seen = Arc::new(AtomicU64::new(0));

    let make = |marker: u64, seen: Arc<AtomicU64>| -> Arc<dyn bp_engine::BThreadBody> {
        Arc::new(move |ctx: BpContext| {
            let seen = seen.clone();
            async move {
                ctx.bsync(SyncStatement::builder().request(ctx.event("shared")).build())
                    .await?;
                seen.compare_exchange(0, marker, Ordering::SeqCst, Ordering::SeqCst)
                    .ok();
                Ok(())
            }
        })
    };

    program.register_bthread(Some("first"), make(1, seen.clone()));
    program.register_bthread(Some("second"), make(2, seen.clone()));

    let snap = program.start().unwrap();
    let next = program.advance(&snap, Event::new("shared")).unwrap();
    assert!(next.bthreads.is_empty());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
