//! Job pool integration tests.
//!
//! Tests verify:
//! - Only the newest job of a type is applied, whatever the finish order
//! - Job types do not interfere with each other
//! - Panics and cancellations leave the pool usable
//! - The guard works standalone for ad hoc background threads

use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tokio::runtime::Handle;

use viewcore::{
    ControlQueue, Disposition, JobError, JobGuard, JobManager, JobOutcome, JobState, OutcomeKind,
};

use super::test_utils::WAIT;

fn setup(workers: usize) -> (ControlQueue, JobManager) {
    let control = ControlQueue::new();
    let jobs = JobManager::new(
        Handle::current(),
        workers,
        Arc::new(JobGuard::new()),
        control.poster(),
    );
    (control, jobs)
}

async fn settle(control: &mut ControlQueue, jobs: &JobManager) {
    tokio::time::timeout(WAIT, async {
        while jobs.in_flight() > 0 {
            control.run_next().await;
        }
    })
    .await
    .expect("jobs did not settle");
}

type Applied<T> = Arc<Mutex<Vec<T>>>;

/// Continuation that records completed values.
fn record<T: Send + 'static>(applied: &Applied<T>) -> impl FnOnce(JobOutcome<T>) + Send + 'static {
    let applied = applied.clone();
    move |outcome| {
        if let JobOutcome::Completed(value) = outcome {
            applied.lock().unwrap().push(value);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_storm_applies_last_submission() {
    let (mut control, jobs) = setup(4);
    let applied: Applied<u32> = Arc::default();

    let handles: Vec<_> = (0..20u32)
        .map(|i| jobs.submit("render", |i: u32, _ctx| Ok(i), i, record(&applied)))
        .collect();
    settle(&mut control, &jobs).await;

    assert_eq!(*applied.lock().unwrap(), vec![19]);
    let discarded = handles
        .iter()
        .filter(|h| h.state() == JobState::Delivered(OutcomeKind::Completed, Disposition::Discarded))
        .count();
    assert_eq!(discarded, 19);
    assert_eq!(jobs.guard().current_job_id("render"), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reverse_finish_order() {
    let (mut control, jobs) = setup(3);
    let applied: Applied<&'static str> = Arc::default();

    // Three jobs that finish newest-first.
    let (tx_a, rx_a) = mpsc::channel::<()>();
    let (tx_b, rx_b) = mpsc::channel::<()>();
    jobs.submit(
        "stats",
        move |_: (), _ctx| {
            rx_a.recv().ok();
            Ok("a")
        },
        (),
        record(&applied),
    );
    jobs.submit(
        "stats",
        move |_: (), _ctx| {
            rx_b.recv().ok();
            Ok("b")
        },
        (),
        record(&applied),
    );
    jobs.submit("stats", |_: (), _ctx| Ok("c"), (), record(&applied));

    tokio::time::timeout(WAIT, control.run_next()).await.unwrap();
    tx_b.send(()).unwrap();
    tokio::time::timeout(WAIT, control.run_next()).await.unwrap();
    tx_a.send(()).unwrap();
    settle(&mut control, &jobs).await;

    assert_eq!(*applied.lock().unwrap(), vec!["c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_job_types_are_independent() {
    let (mut control, jobs) = setup(2);
    let applied: Applied<String> = Arc::default();

    for job_type in ["render:1:frame", "render:1:mean", "histogram"] {
        jobs.submit(
            job_type,
            |name: String, ctx| Ok(format!("{name}@{}", ctx.job_type())),
            job_type.to_string(),
            record(&applied),
        );
    }
    settle(&mut control, &jobs).await;

    let mut applied = applied.lock().unwrap().clone();
    applied.sort();
    assert_eq!(
        applied,
        vec![
            "histogram@histogram",
            "render:1:frame@render:1:frame",
            "render:1:mean@render:1:mean",
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_survives_panics() {
    let (mut control, jobs) = setup(1);
    let failures = Arc::new(Mutex::new(Vec::new()));
    let applied: Applied<u8> = Arc::default();

    for _ in 0..3 {
        let failures = failures.clone();
        jobs.submit(
            "fragile",
            |_: (), _ctx| -> Result<u8, JobError> { panic!("boom") },
            (),
            move |outcome| {
                if let JobOutcome::Failed(err) = outcome {
                    failures.lock().unwrap().push(err);
                }
            },
        );
        settle(&mut control, &jobs).await;
    }
    jobs.submit("sturdy", |_: (), _ctx| Ok(1u8), (), record(&applied));
    settle(&mut control, &jobs).await;

    assert_eq!(
        *failures.lock().unwrap(),
        vec![JobError::Panicked("boom".to_string()); 3]
    );
    assert_eq!(*applied.lock().unwrap(), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_all_then_resubmit() {
    let (mut control, jobs) = setup(2);
    let applied: Applied<u32> = Arc::default();
    let (started_tx, started_rx) = mpsc::channel::<()>();

    for i in 0..2u32 {
        let started = started_tx.clone();
        jobs.submit(
            &format!("slow-{i}"),
            move |i: u32, ctx| {
                started.send(()).ok();
                while !ctx.is_cancelled() {
                    thread::yield_now();
                }
                ctx.checkpoint()?;
                Ok(i)
            },
            i,
            record(&applied),
        );
    }
    for _ in 0..2 {
        started_rx.recv_timeout(WAIT).unwrap();
    }

    jobs.cancel_all();
    settle(&mut control, &jobs).await;
    assert!(applied.lock().unwrap().is_empty());

    jobs.submit("slow-0", |_: (), _ctx| Ok(42), (), record(&applied));
    settle(&mut control, &jobs).await;
    assert_eq!(*applied.lock().unwrap(), vec![42]);
}

#[test]
fn test_guard_standalone_with_threads() {
    let guard = Arc::new(JobGuard::new());
    let (done_tx, done_rx) = mpsc::channel();

    // Each thread publishes its id before starting, as a collaborator
    // running its own background work would.
    let workers: Vec<_> = (0..4)
        .map(|n| {
            let id = guard.gen_job_id();
            guard.store_current_job_id("export", id);
            let done = done_tx.clone();
            thread::spawn(move || done.send((n, id)).unwrap())
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    drop(done_tx);

    let current: Vec<_> = done_rx
        .iter()
        .filter(|(_, id)| guard.is_current_job("export", *id))
        .map(|(n, _)| n)
        .collect();
    assert_eq!(current, vec![3]);

    guard.clear_job_id("export");
    assert_eq!(guard.current_job_id("export"), None);
}
