//! Trie-based per-app router.
//!
//! The trie is keyed by method plus path components; each terminal carries a
//! [`CachedRoute`]: the endpoint, its pre-composed middleware chain, and a
//! flag marking synthesized shadow entries. Lookup walks literal children
//! first, then parameter children with backtracking, then a trailing
//! catch-all.

use crate::app::Endpoint;
use crate::error::{ErrorKind, Result, WrapError};
use crate::middleware::MiddlewareChain;
use http::Method;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Path/query parameter storage; stays inline for routes with few params.
pub type ParamVec = SmallVec<[(Arc<str>, String); 8]>;

/// Name under which a catch-all's remaining path is recorded.
pub const CATCH_ALL_PARAM: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathComponent {
    Literal(String),
    Param(String),
    CatchAll,
}

/// One HTTP method plus a compiled component path.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub components: Vec<PathComponent>,
}

impl Route {
    /// Parse a path string: `/users/:id/orders`, optionally ending in `**`.
    pub fn parse(method: Method, path: &str) -> Result<Self> {
        Route::from_components(method, path.split('/'))
    }

    /// Build from explicit components. A component containing the URL
    /// separator is split further, so `["api", "v1/users"]` compiles the
    /// same as `/api/v1/users`.
    pub fn from_components<'a>(
        method: Method,
        components: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let mut compiled = Vec::new();
        for raw in components {
            for part in raw.split('/') {
                if part.is_empty() {
                    continue;
                }
                if matches!(compiled.last(), Some(PathComponent::CatchAll)) {
                    return Err(WrapError::new(ErrorKind::InvalidParameter)
                        .with_message("catch-all must be the final component"));
                }
                if part == "**" {
                    compiled.push(PathComponent::CatchAll);
                } else if let Some(name) = part.strip_prefix(':') {
                    if name.is_empty() {
                        return Err(WrapError::new(ErrorKind::InvalidParameter)
                            .with_message("parameter component needs a name"));
                    }
                    compiled.push(PathComponent::Param(name.to_string()));
                } else {
                    compiled.push(PathComponent::Literal(part.to_string()));
                }
            }
        }
        Ok(Route {
            method,
            components: compiled,
        })
    }

    pub fn with_method(&self, method: Method) -> Route {
        Route {
            method,
            components: self.components.clone(),
        }
    }

    pub fn is_all_literal(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, PathComponent::Literal(_)))
    }

    /// Human-readable pattern for logs.
    pub fn pattern(&self) -> String {
        if self.components.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for c in &self.components {
            out.push('/');
            match c {
                PathComponent::Literal(s) => out.push_str(s),
                PathComponent::Param(name) => {
                    out.push(':');
                    out.push_str(name);
                }
                PathComponent::CatchAll => out.push_str("**"),
            }
        }
        out
    }
}

/// The terminal payload of a routed path.
pub struct CachedRoute {
    pub endpoint: Arc<Endpoint>,
    pub chain: Arc<MiddlewareChain>,
    /// Synthesized entry (HEAD shadow or middleware-declared method), not
    /// user-registered.
    pub shadow: bool,
}

/// A successful lookup.
pub struct RouteHit {
    pub cached: Arc<CachedRoute>,
    pub params: ParamVec,
    /// Set when a HEAD request fell back to the GET terminal; the response
    /// body must be discarded.
    pub discard_body: bool,
}

#[derive(Default)]
struct TrieNode {
    literals: HashMap<String, TrieNode>,
    params: Vec<(Arc<str>, TrieNode)>,
    terminals: HashMap<Method, Arc<CachedRoute>>,
    catch_all: HashMap<Method, Arc<CachedRoute>>,
}

#[derive(Default)]
pub struct Router {
    root: TrieNode,
    terminal_count: usize,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    pub fn len(&self) -> usize {
        self.terminal_count
    }

    pub fn is_empty(&self) -> bool {
        self.terminal_count == 0
    }

    /// Insert a terminal. Two terminals for the same `(method, path)` are
    /// rejected; shadow synthesis checks for existing terminals first, so a
    /// collision here is always a registration error.
    pub fn insert(&mut self, route: &Route, cached: Arc<CachedRoute>) -> Result<()> {
        let mut node = &mut self.root;
        let mut has_catch_all = false;
        for component in &route.components {
            match component {
                PathComponent::Literal(seg) => {
                    node = node.literals.entry(seg.clone()).or_default();
                }
                PathComponent::Param(name) => {
                    let idx = match node.params.iter().position(|(n, _)| n.as_ref() == name) {
                        Some(idx) => idx,
                        None => {
                            node.params.push((Arc::from(name.as_str()), TrieNode::default()));
                            node.params.len() - 1
                        }
                    };
                    node = &mut node.params[idx].1;
                }
                PathComponent::CatchAll => {
                    has_catch_all = true;
                }
            }
        }
        let slot = if has_catch_all {
            &mut node.catch_all
        } else {
            &mut node.terminals
        };
        if slot.contains_key(&route.method) {
            return Err(WrapError::new(ErrorKind::Forbidden)
                .with_message("route already registered")
                .with_extra("method", route.method.to_string())
                .with_extra("path", route.pattern()));
        }
        debug!(
            method = %route.method,
            path = %route.pattern(),
            endpoint = %cached.endpoint.name,
            shadow = cached.shadow,
            "route terminal added"
        );
        slot.insert(route.method.clone(), cached);
        self.terminal_count += 1;
        Ok(())
    }

    pub fn has_terminal(&self, route: &Route) -> bool {
        let mut node = &self.root;
        let mut has_catch_all = false;
        for component in &route.components {
            match component {
                PathComponent::Literal(seg) => match node.literals.get(seg) {
                    Some(child) => node = child,
                    None => return false,
                },
                PathComponent::Param(name) => {
                    match node.params.iter().find(|(n, _)| n.as_ref() == name) {
                        Some((_, child)) => node = child,
                        None => return false,
                    }
                }
                PathComponent::CatchAll => has_catch_all = true,
            }
        }
        if has_catch_all {
            node.catch_all.contains_key(&route.method)
        } else {
            node.terminals.contains_key(&route.method)
        }
    }

    /// Exact-method lookup.
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteHit> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = ParamVec::new();
        let cached = search(&self.root, &segments, method, &mut params)?;
        Some(RouteHit {
            cached,
            params,
            discard_body: false,
        })
    }

    /// Lookup with the HEAD→GET fallback: a HEAD request without a HEAD
    /// terminal dispatches to the GET terminal, discarding the body.
    pub fn find_with_fallback(&self, method: &Method, path: &str) -> Option<RouteHit> {
        if let Some(hit) = self.find(method, path) {
            return Some(hit);
        }
        if *method == Method::HEAD {
            if let Some(mut hit) = self.find(&Method::GET, path) {
                hit.discard_body = true;
                return Some(hit);
            }
        }
        None
    }
}

fn search(
    node: &TrieNode,
    segments: &[&str],
    method: &Method,
    params: &mut ParamVec,
) -> Option<Arc<CachedRoute>> {
    if segments.is_empty() {
        if let Some(hit) = node.terminals.get(method) {
            return Some(hit.clone());
        }
        // a trailing catch-all also matches the empty remainder
        if let Some(hit) = node.catch_all.get(method) {
            params.push((Arc::from(CATCH_ALL_PARAM), String::new()));
            return Some(hit.clone());
        }
        return None;
    }
    let segment = segments[0];
    let rest = &segments[1..];

    if let Some(child) = node.literals.get(segment) {
        if let Some(hit) = search(child, rest, method, params) {
            return Some(hit);
        }
    }
    for (name, child) in &node.params {
        params.push((name.clone(), segment.to_string()));
        if let Some(hit) = search(child, rest, method, params) {
            return Some(hit);
        }
        params.pop();
    }
    if let Some(hit) = node.catch_all.get(method) {
        params.push((Arc::from(CATCH_ALL_PARAM), segments.join("/")));
        return Some(hit.clone());
    }
    None
}

/// Last-write-wins parameter lookup.
pub fn get_param<'a>(params: &'a ParamVec, name: &str) -> Option<&'a str> {
    params
        .iter()
        .rfind(|(k, _)| k.as_ref() == name)
        .map(|(_, v)| v.as_str())
}
