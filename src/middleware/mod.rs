//! Request middleware.
//!
//! A middleware wraps everything downstream of it: it receives the request
//! context, calls [`RequestContext::next`] exactly once to run the rest of
//! the chain, and may mutate the response it gets back. Short-circuiting is
//! returning without calling `next()`.

mod cors;

pub use cors::{CorsMiddleware, OriginMatcher};

use crate::app::Invocation;
use crate::context::RequestContext;
use crate::error::Result;
use crate::server::Response;
use http::Method;
use std::sync::Arc;

pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Response>;

    /// Methods this middleware wants synthesized as shadow routes for every
    /// route it wraps (e.g. `OPTIONS` for CORS preflight). Shadow terminals
    /// point at an OK invocation but still traverse the chain.
    fn shadow_route_methods(&self) -> Vec<Method> {
        Vec::new()
    }
}

/// The pre-composed responder stored on a cached route: the ordered
/// middleware list ending in the endpoint invocation. Traversal is driven
/// by the context's cursor, not by nested calls.
pub struct MiddlewareChain {
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub invocation: Invocation,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>, invocation: Invocation) -> Self {
        MiddlewareChain {
            middlewares,
            invocation,
        }
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}
