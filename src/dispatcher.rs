//! Request/response types and the worker → reactor completion hand-off.
//!
//! A connection is owned by the reactor that accepted it, and only that
//! reactor ever writes to the socket. When a registered handler is invoked,
//! the reactor snapshots the request into an owned [`Request`], packages it
//! with the handler into a [`WorkItem`], and submits it to the worker pool.
//! The worker runs the handler (with panic recovery), then posts the finished
//! [`HandlerResponse`] into the owning reactor's completion queue and rings
//! its waker. Stale completions, for connections that died while the handler
//! ran, are identified by a per-connection generation id and dropped.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use http::Method;
use mio::Waker;
use serde_json::Value;
use tracing::error;

use crate::router::Handler;

/// Owned snapshot of one HTTP request, handed to a handler.
///
/// Handlers may read every field; the response side lives in the separate
/// [`HandlerResponse`] so that nothing a handler does can touch the
/// connection itself.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method (GET, POST, ...).
    pub method: Method,
    /// Raw request URI as received, including any query string.
    pub uri: String,
    /// Path component of the URI, with query/fragment stripped.
    pub path: String,
    /// Address of the connected peer.
    pub peer_addr: SocketAddr,
    /// Request headers with lowercased names, in wire order.
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Build a request snapshot. The path component is derived from the URI
    /// by stripping everything from the first `?` or `#`.
    #[must_use]
    pub fn new(
        method: Method,
        uri: impl Into<String>,
        peer_addr: SocketAddr,
        headers: Vec<(String, String)>,
    ) -> Self {
        let uri = uri.into();
        let path = path_component(&uri).to_string();
        Self {
            method,
            uri,
            path,
            peer_addr,
            headers,
        }
    }

    /// Look up a request header by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Path component of a URI: everything before the first `?` or `#`.
pub(crate) fn path_component(uri: &str) -> &str {
    let end = uri.find(['?', '#']).unwrap_or(uri.len());
    &uri[..end]
}

/// Response under construction by a handler.
///
/// Output header names are unique: setting a header that already exists
/// replaces it. The body is an append-only sink.
#[derive(Debug, Clone)]
pub struct HandlerResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Default for HandlerResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerResponse {
    /// An empty `200 OK` response with no headers or body.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_status(status: u16) -> Self {
        let mut res = Self::new();
        res.status = status;
        res
    }

    /// A JSON response with the given status.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        let mut res = Self::with_status(status);
        res.set_header("Content-Type", "application/json");
        res.write_body(body.to_string().as_bytes());
        res
    }

    /// A plain-text response with the given status.
    #[must_use]
    pub fn text(status: u16, body: &str) -> Self {
        let mut res = Self::with_status(status);
        res.set_header("Content-Type", "text/plain");
        res.write_body(body.as_bytes());
        res
    }

    /// A JSON error body, `{"error": message}`.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Add or replace an output header. Names are unique per response.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Append bytes to the body sink.
    pub fn write_body(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Route back to the reactor that owns a connection: its completion queue
/// plus the waker that interrupts its poll.
#[derive(Clone)]
pub(crate) struct CompletionSender {
    pub tx: Sender<Completion>,
    pub waker: Arc<Waker>,
}

impl CompletionSender {
    /// Post a completion and ring the reactor. Both can fail only when the
    /// reactor is already gone; the cooperative shutdown drops in-flight
    /// responses rather than blocking on them.
    pub fn send(&self, completion: Completion) {
        let _ = self.tx.send(completion);
        let _ = self.waker.wake();
    }
}

/// A finished handler response on its way back to the owning reactor.
pub(crate) struct Completion {
    /// Slab key of the connection within the owning reactor.
    pub token: usize,
    /// Generation id guarding against slab-slot reuse.
    pub conn_id: u64,
    pub response: HandlerResponse,
}

/// One offloaded handler invocation. Created by a reactor, consumed exactly
/// once by a worker thread.
pub(crate) struct WorkItem {
    pub request: Request,
    pub handler: Arc<dyn Handler>,
    pub token: usize,
    pub conn_id: u64,
    pub completions: CompletionSender,
}

impl WorkItem {
    /// Run the handler to completion on the current (worker) thread and post
    /// the result back to the owning reactor. Panics are caught and surface
    /// to the client as `500`.
    pub fn run(self) {
        let WorkItem {
            request,
            handler,
            token,
            conn_id,
            completions,
        } = self;

        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut res = HandlerResponse::new();
            handler.handle(&request, &mut res);
            res
        }));

        let response = match result {
            Ok(res) => res,
            Err(panic) => {
                error!(
                    uri = %request.uri,
                    peer = %request.peer_addr,
                    panic = ?panic,
                    "handler panicked"
                );
                HandlerResponse::error(500, "handler panicked")
            }
        };

        completions.send(Completion {
            token,
            conn_id,
            response,
        });
    }
}
