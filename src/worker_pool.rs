//! # Worker Pool Module
//!
//! A bounded set of persistent worker threads consuming a task queue. The
//! pool decouples reactor threads from handler execution latency: a slow
//! handler occupies one worker thread, never an event loop.
//!
//! ## Features
//!
//! - **Two priority classes**: `High` is used once per reactor at startup to
//!   bootstrap the event loops; `Normal` carries handler work.
//! - **Bounded queues**: each class has a fixed-capacity queue; submission
//!   fails with [`SubmitError::QueueSaturated`] when full, and the caller
//!   decides how to answer the client.
//! - **At-most-once execution**: a task is popped by exactly one worker and
//!   run to completion. There is no ordering guarantee between tasks beyond
//!   the priority classes, and no cancellation or timeout.
//!
//! ## Shutdown
//!
//! [`WorkerPool::shutdown`] finishes tasks that are already running,
//! discards tasks still queued, and joins every worker thread. It must not
//! be called while reactors might still submit; the engine enforces this by
//! draining the reactors first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use thiserror::Error;
use tracing::{debug, info};

/// A unit of work executed on a worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Priority class for [`WorkerPool::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Long-lived engine tasks (reactor bootstrap). Always popped first.
    High,
    /// Handler execution.
    Normal,
}

/// Errors from [`WorkerPool::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The bounded queue for the requested priority class is full. The task
    /// was not enqueued; the caller must reject, retry, or answer the client
    /// with a capacity error. Nothing is dropped silently.
    #[error("worker queue saturated (capacity {capacity})")]
    QueueSaturated { capacity: usize },
    /// The pool has begun shutting down and accepts no further tasks.
    #[error("worker pool is shut down")]
    Shutdown,
}

/// Configuration for a worker pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of persistent worker threads.
    pub threads: usize,
    /// Capacity of each priority queue.
    pub queue_depth: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            threads: 20,
            queue_depth: 1000,
        }
    }
}

struct PoolShared {
    high: ArrayQueue<Task>,
    normal: ArrayQueue<Task>,
    idle_lock: Mutex<()>,
    idle_cvar: Condvar,
    shutdown: AtomicBool,
}

impl PoolShared {
    fn pop(&self) -> Option<Task> {
        self.high.pop().or_else(|| self.normal.pop())
    }
}

/// Bounded pool of persistent worker threads.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    queue_depth: usize,
}

impl WorkerPool {
    /// Spawn the worker threads. They park until work arrives.
    #[must_use]
    pub fn new(config: WorkerPoolConfig) -> Self {
        let threads = config.threads.max(1);
        let queue_depth = config.queue_depth.max(1);

        let shared = Arc::new(PoolShared {
            high: ArrayQueue::new(queue_depth),
            normal: ArrayQueue::new(queue_depth),
            idle_lock: Mutex::new(()),
            idle_cvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        info!(threads, queue_depth, "starting worker pool");

        let handles = (0..threads)
            .map(|worker_id| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("shoal-worker-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, &shared))
                    .unwrap_or_else(|err| panic!("failed to spawn worker thread: {err}"))
            })
            .collect();

        Self {
            shared,
            threads: Mutex::new(handles),
            queue_depth,
        }
    }

    /// Enqueue a task for execution by some worker thread.
    ///
    /// Returns immediately. Fails with [`SubmitError::QueueSaturated`] when
    /// the priority class's queue is at capacity, or
    /// [`SubmitError::Shutdown`] once shutdown has begun.
    pub fn submit(&self, task: Task, priority: Priority) -> Result<(), SubmitError> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown);
        }

        let queue = match priority {
            Priority::High => &self.shared.high,
            Priority::Normal => &self.shared.normal,
        };
        queue.push(task).map_err(|_| SubmitError::QueueSaturated {
            capacity: self.queue_depth,
        })?;

        self.shared.idle_cvar.notify_one();
        Ok(())
    }

    /// Stop the pool: running tasks finish, queued tasks are discarded, and
    /// every worker thread is joined. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.idle_cvar.notify_all();

        let handles = match self.threads.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            let _ = handle.join();
        }
        debug!("worker pool stopped");
    }

    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }
}

fn worker_loop(worker_id: usize, shared: &PoolShared) {
    debug!(worker_id, "worker thread started");
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if let Some(task) = shared.pop() {
            task();
            continue;
        }

        // Park until submit() notifies. The timeout is a backstop against a
        // notify racing with the empty-queue check above.
        let guard = match shared.idle_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if shared.high.is_empty()
            && shared.normal.is_empty()
            && !shared.shutdown.load(Ordering::Acquire)
        {
            let _ = shared
                .idle_cvar
                .wait_timeout(guard, Duration::from_millis(100));
        }
    }
    debug!(worker_id, "worker thread exiting");
}
