//! Tests for the bounded worker pool: execution, priority classes, queue
//! saturation, and shutdown semantics.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use shoal::{Priority, SubmitError, WorkerPool, WorkerPoolConfig};

fn pool(threads: usize, queue_depth: usize) -> WorkerPool {
    WorkerPool::new(WorkerPoolConfig {
        threads,
        queue_depth,
    })
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Occupy one worker thread until the returned sender fires, and confirm the
/// task is actually running before returning.
fn park_one_worker(pool: &WorkerPool) -> mpsc::Sender<()> {
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    pool.submit(
        Box::new(move || {
            started_tx.send(()).expect("signal start");
            let _ = gate_rx.recv();
        }),
        Priority::Normal,
    )
    .expect("submit blocker");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("blocker did not start");
    gate_tx
}

#[test]
fn tasks_execute_exactly_once() {
    let pool = pool(4, 64);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..32 {
        let counter = counter.clone();
        pool.submit(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Priority::Normal,
        )
        .expect("submit");
    }

    wait_for(|| counter.load(Ordering::SeqCst) == 32);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(counter.load(Ordering::SeqCst), 32, "a task ran twice");
    pool.shutdown();
}

#[test]
fn saturated_queue_rejects_submission() {
    let pool = pool(1, 2);
    let gate = park_one_worker(&pool);

    // The single worker is parked; these fill the bounded queue.
    pool.submit(Box::new(|| {}), Priority::Normal)
        .expect("queued 1");
    pool.submit(Box::new(|| {}), Priority::Normal)
        .expect("queued 2");

    match pool.submit(Box::new(|| {}), Priority::Normal) {
        Err(SubmitError::QueueSaturated { capacity }) => assert_eq!(capacity, 2),
        other => panic!("expected QueueSaturated, got {other:?}"),
    }

    gate.send(()).expect("release blocker");
    pool.shutdown();
}

#[test]
fn high_priority_tasks_run_first() {
    let pool = pool(1, 16);
    let gate = park_one_worker(&pool);

    let order = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel::<()>();

    for (label, priority) in [("normal", Priority::Normal), ("high", Priority::High)] {
        let order = order.clone();
        let done_tx = done_tx.clone();
        pool.submit(
            Box::new(move || {
                order.lock().expect("order lock").push(label);
                done_tx.send(()).expect("signal done");
            }),
            priority,
        )
        .expect("submit");
    }

    gate.send(()).expect("release blocker");
    for _ in 0..2 {
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("task completion");
    }
    assert_eq!(*order.lock().expect("order lock"), vec!["high", "normal"]);
    pool.shutdown();
}

#[test]
fn shutdown_waits_for_running_tasks() {
    let pool = pool(1, 4);
    let finished = Arc::new(AtomicBool::new(false));
    let (started_tx, started_rx) = mpsc::channel::<()>();

    let flag = finished.clone();
    pool.submit(
        Box::new(move || {
            started_tx.send(()).expect("signal start");
            thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        }),
        Priority::Normal,
    )
    .expect("submit");

    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("task did not start");
    pool.shutdown();
    assert!(
        finished.load(Ordering::SeqCst),
        "shutdown returned before the running task finished"
    );
}

#[test]
fn shutdown_discards_queued_tasks() {
    let pool = Arc::new(pool(1, 8));
    let gate = park_one_worker(&pool);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    pool.submit(
        Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        }),
        Priority::Normal,
    )
    .expect("submit queued task");

    let shutdown_pool = pool.clone();
    let shutdown_thread = thread::spawn(move || shutdown_pool.shutdown());
    // let the shutdown flag land before the worker becomes free
    thread::sleep(Duration::from_millis(50));
    gate.send(()).expect("release blocker");
    shutdown_thread.join().expect("join shutdown");

    assert!(
        !ran.load(Ordering::SeqCst),
        "queued task ran after shutdown began"
    );
}

#[test]
fn submit_after_shutdown_is_rejected() {
    let pool = pool(1, 4);
    pool.shutdown();
    match pool.submit(Box::new(|| {}), Priority::Normal) {
        Err(SubmitError::Shutdown) => {}
        other => panic!("expected Shutdown, got {other:?}"),
    }
}
