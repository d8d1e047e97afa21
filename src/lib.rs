//! # Shoal
//!
//! **Shoal** is an embeddable HTTP serving engine built around a pool of
//! reactor threads that all multiplex accept-readiness on a *single* shared
//! listening socket.
//!
//! ## Overview
//!
//! The engine accepts connections on one port, distributes them across one
//! event loop per CPU core, routes requests to registered handlers (or a
//! static-file fallback), and runs handler bodies on a bounded worker pool so
//! reactor threads never block on application logic. Shutdown is cooperative
//! and observable: every reactor decrements a shared atomic counter exactly
//! once on exit, and callers can poll that counter to drain the engine.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - **[`listener`]** - acquisition of the shared nonblocking listening socket
//! - **[`router`]** - exact-match table from URI path to [`router::Handler`]
//! - **[`static_files`]** - sandboxed static-file fallback with a fixed MIME table
//! - **[`worker_pool`]** - bounded worker threads with two priority classes
//! - **[`dispatcher`]** - request/response types and the completion hand-off
//!   between worker threads and the reactor that owns the connection
//! - **[`server`]** - the reactor event loops and the engine lifecycle
//! - **[`runtime_config`]** - environment-variable runtime tuning
//!
//! ## Request Handling Flow
//!
//! ```text
//! client ── connect ──▶ kernel accept queue
//!                           │ (one shared listening socket, N reactors
//!                           │  polling it; the kernel load-balances)
//!                           ▼
//!                    reactor thread i
//!              parse head ── route lookup
//!                 │                │
//!          registered path    no match
//!                 │                │
//!        worker pool task    static file fallback
//!                 │           (served on the reactor)
//!        handler runs, builds
//!        a HandlerResponse
//!                 │
//!        completion queue + waker
//!                 ▼
//!        owning reactor serializes
//!        and writes the socket
//! ```
//!
//! Worker threads never touch a connection. A handler produces a
//! [`dispatcher::HandlerResponse`] value; the worker posts it back to the
//! reactor that accepted the connection, and only that reactor performs
//! socket writes. This keeps every connection single-owner without locks.
//!
//! ## Quick Start
//!
//! ```no_run
//! use shoal::{RouteTable, Server, ServerConfig};
//!
//! let mut routes = RouteTable::new();
//! routes.register("/json", |_req: &shoal::Request, res: &mut shoal::HandlerResponse| {
//!     res.set_header("Content-Type", "application/json");
//!     res.write_body(b"{\"message\":\"Hello, World!\"}");
//! });
//!
//! let server = Server::start(ServerConfig::new(8080), routes).expect("start");
//! // ... serve traffic ...
//! server.stop(true); // cooperative drain
//! ```
//!
//! ## Runtime Considerations
//!
//! - Reactor count defaults to the number of logical CPUs (minimum 1) and can
//!   be pinned with `SHOAL_REACTORS`.
//! - The worker pool defaults to 20 threads and a 1000-deep task queue
//!   (`SHOAL_WORKER_THREADS`, `SHOAL_QUEUE_DEPTH`). Reactor bootstrap tasks
//!   occupy a worker thread for the lifetime of the engine, so the pool is
//!   never sized below `reactors + 2`.
//! - When the task queue is saturated the engine answers the client with
//!   `503` rather than dropping the request silently.

pub mod dispatcher;
pub mod listener;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod static_files;
pub mod worker_pool;

pub use dispatcher::{HandlerResponse, Request};
pub use listener::{acquire_listener, ListenerError};
pub use router::{Handler, Route, RouteTable};
pub use runtime_config::RuntimeConfig;
pub use server::{Server, ServerConfig, StartError};
pub use static_files::StaticFiles;
pub use worker_pool::{Priority, SubmitError, WorkerPool, WorkerPoolConfig};
