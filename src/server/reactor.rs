//! Reactor event loops.
//!
//! Each reactor is one OS thread (occupying a high-priority worker-pool
//! slot) running its own `mio::Poll`. Every reactor registers the *same*
//! listening socket file descriptor, so the kernel's accept queue is the
//! load balancer: a readiness event fans out to all reactors, each attempts
//! a nonblocking accept, and either wins a connection or gets WouldBlock.
//! No lock guards the socket because both outcomes are safe.
//!
//! A connection belongs to the reactor that accepted it for its whole life.
//! Handler work leaves the thread as a [`WorkItem`] and comes back through
//! the reactor's completion queue plus its waker; the reactor alone
//! serializes and writes response bytes. Connection slots live in a slab,
//! and a generation id per connection lets the reactor discard completions
//! for slots that were recycled while the handler ran.
//!
//! Startup failure of a single reactor (poll, waker, or listener
//! registration) is logged and degrades capacity instead of crashing the
//! process; the live-reactor count is decremented on every exit path by an
//! RAII guard.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, error, info, trace, warn};

use crate::dispatcher::{CompletionSender, HandlerResponse, Request, WorkItem};
use crate::server::core::EngineContext;
use crate::server::http::{self, ParseOutcome};
use crate::static_files;
use crate::worker_pool::{Priority, SubmitError};

const LISTENER: Token = Token(usize::MAX - 1);
const WAKER: Token = Token(usize::MAX - 2);

const EVENTS_CAPACITY: usize = 1024;
const READ_CHUNK: usize = 4096;

/// Backstop poll timeout; the stop flag is re-checked at least this often
/// even if a wakeup is lost.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Reactor entry point, run as a high-priority worker-pool task.
pub(crate) fn run(index: usize, ctx: Arc<EngineContext>) {
    let _guard = ReactorGuard {
        index,
        ctx: ctx.clone(),
    };
    match Reactor::new(index, ctx) {
        Ok(mut reactor) => reactor.run_loop(),
        Err(err) => {
            error!(reactor = index, error = %err, "reactor failed to start, continuing degraded");
        }
    }
}

/// Decrements the live-reactor count and clears the waker slot exactly once,
/// on every exit path of the reactor task.
struct ReactorGuard {
    index: usize,
    ctx: Arc<EngineContext>,
}

impl Drop for ReactorGuard {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.ctx.wakers.lock() {
            if let Some(slot) = slots.get_mut(self.index) {
                *slot = None;
            }
        }
        let remaining = self.ctx.live_reactors.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(reactor = self.index, remaining, "reactor slot released");
    }
}

enum ConnState {
    /// Accumulating request bytes.
    Reading,
    /// A handler owns the request; parsing is paused until its completion
    /// arrives.
    AwaitingHandler,
    /// Draining the serialized response.
    Writing,
}

struct Conn {
    stream: TcpStream,
    peer: SocketAddr,
    /// Generation id; distinguishes this connection from a later one that
    /// reuses the same slab slot.
    id: u64,
    state: ConnState,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    written: usize,
    keep_alive: bool,
    writable_registered: bool,
}

struct Reactor {
    index: usize,
    ctx: Arc<EngineContext>,
    poll: Poll,
    events: Events,
    conns: Slab<Conn>,
    completions_rx: Receiver<crate::dispatcher::Completion>,
    completions: CompletionSender,
    next_conn_id: u64,
}

impl Reactor {
    fn new(index: usize, ctx: Arc<EngineContext>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let listener_fd = ctx.listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&listener_fd), LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let (tx, rx) = mpsc::channel();

        // Publish the waker so stop() can interrupt the loop. The stop flag
        // is checked again at the top of the loop, so a stop issued before
        // this point is still observed.
        if let Ok(mut slots) = ctx.wakers.lock() {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(waker.clone());
            }
        }

        Ok(Self {
            index,
            ctx,
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            conns: Slab::new(),
            completions_rx: rx,
            completions: CompletionSender { tx, waker },
            next_conn_id: 0,
        })
    }

    fn run_loop(&mut self) {
        info!(reactor = self.index, "reactor running");
        loop {
            if self.ctx.stop.load(Ordering::Acquire) {
                break;
            }
            if let Err(err) = self.poll.poll(&mut self.events, Some(POLL_INTERVAL)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(reactor = self.index, error = %err, "event loop poll failed");
                break;
            }

            let ready: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .map(|event| (event.token(), event.is_readable(), event.is_writable()))
                .collect();

            for (token, readable, writable) in ready {
                match token {
                    LISTENER => self.accept_ready(),
                    WAKER => {}
                    _ => {
                        if readable {
                            self.conn_readable(token);
                        }
                        if writable {
                            self.conn_writable(token);
                        }
                    }
                }
            }

            self.drain_completions();
        }
        info!(reactor = self.index, "reactor stopping");
    }

    fn accept_ready(&mut self) {
        loop {
            match self.ctx.listener.accept() {
                Ok((stream, peer)) => self.register_conn(stream, peer),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(reactor = self.index, error = %err, "accept failed");
                    break;
                }
            }
        }
    }

    fn register_conn(&mut self, stream: std::net::TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nonblocking(true) {
            warn!(error = %err, "could not make accepted connection nonblocking");
            return;
        }
        let mut stream = TcpStream::from_std(stream);

        let id = self.next_conn_id;
        self.next_conn_id += 1;

        let entry = self.conns.vacant_entry();
        let token = Token(entry.key());
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            warn!(error = %err, "could not register accepted connection");
            return;
        }
        entry.insert(Conn {
            stream,
            peer,
            id,
            state: ConnState::Reading,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            written: 0,
            keep_alive: true,
            writable_registered: false,
        });
        trace!(reactor = self.index, conn = token.0, peer = %peer, "connection accepted");
    }

    fn conn_readable(&mut self, token: Token) {
        let mut closed = false;
        {
            let Some(conn) = self.conns.get_mut(token.0) else {
                return;
            };
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match conn.stream.read(&mut chunk) {
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(n) => conn.read_buf.extend_from_slice(&chunk[..n]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        trace!(conn = token.0, error = %err, "read failed");
                        closed = true;
                        break;
                    }
                }
            }
        }
        if closed {
            self.close_conn(token);
            return;
        }
        self.advance_conn(token);
    }

    /// Parse and dispatch as many buffered requests as the connection state
    /// allows. Returns when more bytes are needed, when a handler owns the
    /// connection, or when a response is still being flushed.
    fn advance_conn(&mut self, token: Token) {
        loop {
            let parsed = {
                let Some(conn) = self.conns.get_mut(token.0) else {
                    return;
                };
                if !matches!(conn.state, ConnState::Reading) {
                    return;
                }
                match http::parse_request_head(&conn.read_buf) {
                    ParseOutcome::Partial => return,
                    ParseOutcome::Invalid => {
                        conn.keep_alive = false;
                        None
                    }
                    ParseOutcome::Complete(head) => {
                        let total = head.head_len + head.content_length;
                        if conn.read_buf.len() < total {
                            // wait for the body so it can be discarded
                            return;
                        }
                        conn.read_buf.drain(..total);
                        conn.keep_alive = head.keep_alive;
                        Some((head, conn.peer, conn.id))
                    }
                }
            };

            let Some((head, peer, conn_id)) = parsed else {
                self.queue_response(token, HandlerResponse::error(400, "malformed request"));
                return;
            };

            // observability hook: one line per request, before dispatch
            info!(peer = %peer, method = %head.method, uri = %head.uri, "request");

            let request = Request::new(head.method, head.uri, peer, head.headers);

            match self.ctx.routes.resolve(&request.path) {
                Some(handler) => {
                    if let Some(conn) = self.conns.get_mut(token.0) {
                        conn.state = ConnState::AwaitingHandler;
                    }
                    let item = WorkItem {
                        request,
                        handler,
                        token: token.0,
                        conn_id,
                        completions: self.completions.clone(),
                    };
                    match self
                        .ctx
                        .pool
                        .submit(Box::new(move || item.run()), Priority::Normal)
                    {
                        Ok(()) => return,
                        Err(err @ SubmitError::QueueSaturated { .. }) => {
                            warn!(error = %err, "handler offload rejected");
                            self.queue_response(
                                token,
                                HandlerResponse::error(503, "server is at capacity"),
                            );
                        }
                        Err(err @ SubmitError::Shutdown) => {
                            debug!(error = %err, "handler offload after shutdown");
                            self.queue_response(
                                token,
                                HandlerResponse::error(503, "server is shutting down"),
                            );
                        }
                    }
                    // rejected synchronously; loop again as for the fallback
                }
                None => {
                    // The fallback is filesystem-bound and cheap; it runs on
                    // the reactor thread. The raw URI goes through so the
                    // fallback applies its own sanitization contract.
                    let response =
                        static_files::serve(&request.uri, self.ctx.static_files.as_ref());
                    self.queue_response(token, response);
                    // loop again for a pipelined request; the state check at
                    // the top exits if the response is still flushing
                }
            }
        }
    }

    fn queue_response(&mut self, token: Token, response: HandlerResponse) {
        {
            let Some(conn) = self.conns.get_mut(token.0) else {
                return;
            };
            conn.write_buf = http::serialize_response(&response, conn.keep_alive);
            conn.written = 0;
            conn.state = ConnState::Writing;
        }
        self.flush_conn(token);
    }

    fn flush_conn(&mut self, token: Token) {
        enum Flush {
            Done,
            Blocked,
            Closed,
        }

        let outcome = {
            let Some(conn) = self.conns.get_mut(token.0) else {
                return;
            };
            if !matches!(conn.state, ConnState::Writing) {
                return;
            }
            loop {
                if conn.written >= conn.write_buf.len() {
                    break Flush::Done;
                }
                match conn.stream.write(&conn.write_buf[conn.written..]) {
                    Ok(0) => break Flush::Closed,
                    Ok(n) => conn.written += n,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Flush::Blocked,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        trace!(conn = token.0, error = %err, "write failed");
                        break Flush::Closed;
                    }
                }
            }
        };

        match outcome {
            Flush::Closed => self.close_conn(token),
            Flush::Blocked => {
                let mut failed = false;
                if let Some(conn) = self.conns.get_mut(token.0) {
                    if !conn.writable_registered {
                        match self.poll.registry().reregister(
                            &mut conn.stream,
                            token,
                            Interest::READABLE | Interest::WRITABLE,
                        ) {
                            Ok(()) => conn.writable_registered = true,
                            Err(_) => failed = true,
                        }
                    }
                }
                if failed {
                    self.close_conn(token);
                }
            }
            Flush::Done => self.finish_response(token),
        }
    }

    /// The response buffer is released here, once the reply is fully handed
    /// to the transport.
    fn finish_response(&mut self, token: Token) {
        let keep_alive = {
            let Some(conn) = self.conns.get_mut(token.0) else {
                return;
            };
            conn.write_buf = Vec::new();
            conn.written = 0;
            conn.keep_alive
        };
        if !keep_alive {
            self.close_conn(token);
            return;
        }

        let mut failed = false;
        if let Some(conn) = self.conns.get_mut(token.0) {
            conn.state = ConnState::Reading;
            if conn.writable_registered {
                match self
                    .poll
                    .registry()
                    .reregister(&mut conn.stream, token, Interest::READABLE)
                {
                    Ok(()) => conn.writable_registered = false,
                    Err(_) => failed = true,
                }
            }
        }
        if failed {
            self.close_conn(token);
        }
    }

    fn conn_writable(&mut self, token: Token) {
        let writing = self
            .conns
            .get(token.0)
            .map(|conn| matches!(conn.state, ConnState::Writing))
            .unwrap_or(false);
        if !writing {
            return;
        }
        self.flush_conn(token);
        self.advance_if_pipelined(token);
    }

    fn drain_completions(&mut self) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            let token = Token(completion.token);
            let valid = self
                .conns
                .get(completion.token)
                .map(|conn| {
                    conn.id == completion.conn_id
                        && matches!(conn.state, ConnState::AwaitingHandler)
                })
                .unwrap_or(false);
            if !valid {
                trace!(
                    conn = completion.token,
                    "dropping completion for a connection that is gone"
                );
                continue;
            }
            self.queue_response(token, completion.response);
            self.advance_if_pipelined(token);
        }
    }

    fn advance_if_pipelined(&mut self, token: Token) {
        let ready = self
            .conns
            .get(token.0)
            .map(|conn| matches!(conn.state, ConnState::Reading) && !conn.read_buf.is_empty())
            .unwrap_or(false);
        if ready {
            self.advance_conn(token);
        }
    }

    fn close_conn(&mut self, token: Token) {
        if !self.conns.contains(token.0) {
            return;
        }
        let mut conn = self.conns.remove(token.0);
        let _ = self.poll.registry().deregister(&mut conn.stream);
        trace!(reactor = self.index, conn = token.0, peer = %conn.peer, "connection closed");
    }
}
