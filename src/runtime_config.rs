//! # Runtime Configuration Module
//!
//! Environment-variable tuning for the engine's concurrency knobs.
//!
//! ## Environment Variables
//!
//! ### `SHOAL_REACTORS`
//!
//! Number of reactor event loops. `0` (the default) means "one per logical
//! CPU, minimum 1". Pin this in tests or containers where the detected CPU
//! count is not what you want to run with.
//!
//! ### `SHOAL_WORKER_THREADS`
//!
//! Maximum worker threads in the shared pool (default: 20). Reactor
//! bootstrap tasks occupy one worker thread each for the lifetime of the
//! engine, so the effective pool size is never below `reactors + 2`.
//!
//! ### `SHOAL_QUEUE_DEPTH`
//!
//! Maximum queued tasks per priority class (default: 1000). When the queue
//! is full, handler dispatch fails with
//! [`SubmitError::QueueSaturated`](crate::worker_pool::SubmitError) and the
//! client receives a `503`.

use std::env;

/// Runtime configuration loaded from environment variables.
///
/// Load this at startup using [`RuntimeConfig::from_env()`], or build one by
/// hand when embedding the engine in tests.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Reactor event loops; `0` means one per logical CPU (minimum 1).
    pub reactors: usize,
    /// Maximum worker threads in the shared pool (default: 20).
    pub worker_threads: usize,
    /// Maximum queued tasks per priority class (default: 1000).
    pub queue_depth: usize,
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reactors: env_usize("SHOAL_REACTORS").unwrap_or(defaults.reactors),
            worker_threads: env_usize("SHOAL_WORKER_THREADS").unwrap_or(defaults.worker_threads),
            queue_depth: env_usize("SHOAL_QUEUE_DEPTH").unwrap_or(defaults.queue_depth),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            reactors: 0,
            worker_threads: 20,
            queue_depth: 1000,
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
