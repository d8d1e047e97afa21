//! Exact-match route registry.
//!
//! The table is built once, before any reactor starts, and is read
//! concurrently by every reactor without locking: registration order is
//! preserved, resolution is a linear scan, and the first exact match wins.
//! There is no wildcard or prefix matching, so there is no precedence
//! ambiguity to resolve. A miss falls through to the static-file fallback
//! when one is configured, otherwise to `404`.

use std::fmt;
use std::sync::Arc;

use crate::dispatcher::{HandlerResponse, Request};

/// A request handler.
///
/// Handlers run on a worker thread, receive an owned snapshot of the request,
/// and must fill in the response before returning: set a status code,
/// optionally add output headers, and write a body. A handler that returns
/// without writing anything still produces a well-formed (empty `200`)
/// response; it never leaves the connection hanging.
///
/// Closures with the matching signature implement `Handler` automatically:
///
/// ```
/// use shoal::{HandlerResponse, Request, RouteTable};
///
/// let mut routes = RouteTable::new();
/// routes.register("/ping", |_req: &Request, res: &mut HandlerResponse| {
///     res.write_body(b"pong");
/// });
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: &Request, res: &mut HandlerResponse);
}

impl<F> Handler for F
where
    F: Fn(&Request, &mut HandlerResponse) + Send + Sync + 'static,
{
    fn handle(&self, req: &Request, res: &mut HandlerResponse) {
        self(req, res)
    }
}

/// One registered path → handler mapping. Immutable after registration.
#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("path", &self.path).finish()
    }
}

/// Ordered, fixed-after-startup table of routes.
#[derive(Default, Clone, Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a handler for an exact URI path.
    ///
    /// Duplicate registrations are allowed; resolution returns the earliest
    /// one.
    pub fn register<H: Handler>(&mut self, path: impl Into<String>, handler: H) -> &mut Self {
        self.routes.push(Route {
            path: path.into(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Resolve a query-stripped URI path to its handler.
    ///
    /// Linear scan in registration order; first exact match wins. `None`
    /// means "fall through to static-file serving if configured, else 404".
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn Handler>> {
        self.routes
            .iter()
            .find(|route| route.path == path)
            .map(|route| route.handler.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered paths in registration order, for startup logging.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|route| route.path.as_str())
    }
}
