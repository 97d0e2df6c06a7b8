//! Service trait for request-handling nodes.
//!
//! Brokers and publishers both answer framed requests. This trait is the
//! contract between the listener (which owns sockets and framing) and the
//! node logic (which only sees decoded requests).

use std::future::Future;

use encore_core::{Request, Response};

/// A node that turns one request into one response.
///
/// Handlers never fail at this level: anything that goes wrong is logged by
/// the handler and answered with [`Response::Empty`].
pub trait RequestHandler: Send + Sync + 'static {
    /// Short role name used in logs ("broker", "publisher").
    fn role(&self) -> &'static str;

    fn handle(&self, request: Request) -> impl Future<Output = Response> + Send;
}
