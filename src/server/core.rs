//! Engine lifecycle: startup fan-out, cooperative shutdown, drain.
//!
//! The lifecycle manager owns everything the reactors share, gathered into
//! one explicit context instead of process globals: the listening socket,
//! the immutable route table, the optional static root, the live-reactor
//! count, the stop flag, and the per-reactor waker slots. `start` is
//! fire-and-forget: it returns once the bootstrap tasks are submitted,
//! without waiting for any reactor to reach its loop. Callers that need
//! readiness poll [`Server::live_reactors`] (or use
//! [`Server::wait_ready`]).

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mio::Waker;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::listener::{acquire_listener, ListenerError};
use crate::router::RouteTable;
use crate::runtime_config::RuntimeConfig;
use crate::server::reactor;
use crate::static_files::StaticFiles;
use crate::worker_pool::{Priority, WorkerPool, WorkerPoolConfig};

/// Sleep interval of the drain-wait loop. Shutdown is rare and not
/// latency-sensitive, so a simple poll is used instead of a join primitive.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors surfaced by [`Server::start`]. Only socket acquisition can fail
/// startup; a reactor that fails to bootstrap is logged and reduces
/// capacity instead.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to acquire listening socket: {0}")]
    Listener(#[from] ListenerError),
}

/// Startup configuration for [`Server::start`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind on `0.0.0.0`. Port 0 requests a kernel-assigned port.
    pub port: u16,
    /// Root directory for the static-file fallback. `None` disables it.
    pub static_root: Option<PathBuf>,
    /// Concurrency tuning, defaulting to the environment.
    pub runtime: RuntimeConfig,
}

impl ServerConfig {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            static_root: None,
            runtime: RuntimeConfig::from_env(),
        }
    }

    #[must_use]
    pub fn static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }
}

/// Everything the reactors share, constructed once by the lifecycle manager
/// and passed by `Arc` instead of living in process-wide statics.
pub(crate) struct EngineContext {
    /// The single listening socket; the same fd is polled by every reactor.
    pub listener: TcpListener,
    /// Immutable after start; read lock-free by every reactor.
    pub routes: RouteTable,
    pub static_files: Option<StaticFiles>,
    /// Live reactors. Initialized to N at startup, decremented exactly once
    /// per reactor on its own termination; 0 is the fully drained state.
    pub live_reactors: AtomicUsize,
    pub stop: AtomicBool,
    /// One slot per reactor; a reactor publishes its waker on startup and
    /// clears the slot on exit.
    pub wakers: Mutex<Vec<Option<Arc<Waker>>>>,
    pub pool: Arc<WorkerPool>,
}

/// A running engine.
pub struct Server {
    ctx: Arc<EngineContext>,
    pool: Arc<WorkerPool>,
    local_addr: SocketAddr,
    reactor_count: usize,
}

impl Server {
    /// Acquire the listening socket, size and start the worker pool, and
    /// submit one reactor bootstrap task per configured reactor (one per
    /// logical CPU by default).
    ///
    /// Returns as soon as the bootstrap tasks are submitted. Errors only on
    /// socket acquisition; no partially started engine is ever left behind
    /// on error.
    pub fn start(config: ServerConfig, routes: RouteTable) -> Result<Self, StartError> {
        let listener = acquire_listener(config.port)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Config)?;

        let reactors = if config.runtime.reactors == 0 {
            num_cpus::get().max(1)
        } else {
            config.runtime.reactors
        };
        // Bootstrap tasks occupy a worker thread each for the engine's
        // lifetime; the floor keeps threads available for handler work.
        let threads = config.runtime.worker_threads.max(reactors + 2);
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig {
            threads,
            queue_depth: config.runtime.queue_depth,
        }));

        let ctx = Arc::new(EngineContext {
            listener,
            routes,
            static_files: config.static_root.map(StaticFiles::new),
            live_reactors: AtomicUsize::new(reactors),
            stop: AtomicBool::new(false),
            wakers: Mutex::new(vec![None; reactors]),
            pool: pool.clone(),
        });

        for index in 0..reactors {
            let task_ctx = ctx.clone();
            let submitted = pool.submit(
                Box::new(move || reactor::run(index, task_ctx)),
                Priority::High,
            );
            if let Err(err) = submitted {
                error!(reactor = index, error = %err, "could not submit reactor bootstrap task");
                ctx.live_reactors.fetch_sub(1, Ordering::AcqRel);
            }
        }

        info!(addr = %local_addr, reactors, "engine started");
        Ok(Self {
            ctx,
            pool,
            local_addr,
            reactor_count: reactors,
        })
    }

    /// Current live-reactor count. Doubles as a liveness probe: non-zero
    /// means at least one reactor is serving.
    #[must_use]
    pub fn live_reactors(&self) -> usize {
        self.ctx.live_reactors.load(Ordering::Acquire)
    }

    /// Number of reactors this engine was configured with.
    #[must_use]
    pub fn reactor_count(&self) -> usize {
        self.reactor_count
    }

    /// The bound listening address (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the engine to accept connections.
    ///
    /// Polls the listening address by attempting TCP connections until one
    /// succeeds. Useful in tests to ensure the engine is up before sending
    /// requests.
    pub fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.local_addr).is_ok() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Signal every live reactor to break out of its event loop.
    ///
    /// Idempotent: empty waker slots are skipped and the count can never be
    /// decremented below zero. With `wait` the call blocks, polling the
    /// live count every 10 ms, until the engine is fully drained. Reactors
    /// are never forcibly terminated.
    pub fn stop(&self, wait: bool) {
        self.ctx.stop.store(true, Ordering::Release);
        if let Ok(slots) = self.ctx.wakers.lock() {
            for waker in slots.iter().flatten() {
                let _ = waker.wake();
            }
        }
        if wait {
            while self.live_reactors() > 0 {
                thread::sleep(DRAIN_POLL_INTERVAL);
            }
            debug!("engine drained");
        }
    }
}

impl Drop for Server {
    /// Drain the reactors, then stop the worker pool. The pool is only torn
    /// down after the drain so no reactor can submit to a dead pool.
    fn drop(&mut self) {
        self.stop(true);
        self.pool.shutdown();
    }
}
