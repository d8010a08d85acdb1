//! Per-app CORS middleware.
//!
//! Built from the app's `cors_options` when enabled. Preflight OPTIONS
//! requests are answered directly (short-circuit); other requests run the
//! chain and get response headers appended on the way out. Declares
//! `OPTIONS` as a shadow route method so preflights route even when no
//! OPTIONS endpoint is registered.

use crate::config::{AllowedOrigin, CorsOptions};
use crate::context::RequestContext;
use crate::error::{ErrorKind, Result, WrapError};
use crate::middleware::Middleware;
use crate::server::Response;
use http::Method;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

pub type OriginMatcher = Arc<dyn Fn(&str) -> bool + Send + Sync>;

enum OriginPolicy {
    OriginBased,
    All,
    Suppressed,
    List {
        exact: Vec<String>,
        patterns: Vec<Regex>,
    },
    Custom(OriginMatcher),
}

pub struct CorsMiddleware {
    policy: OriginPolicy,
    allowed_methods: Vec<Method>,
    allowed_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<u32>,
    expose_headers: Vec<String>,
}

impl CorsMiddleware {
    /// Build from app config. `matcher` backs the `custom` policy and must
    /// be present when that policy is chosen.
    pub fn from_options(options: CorsOptions, matcher: Option<OriginMatcher>) -> Result<Self> {
        let policy = match options.allowed_origin {
            AllowedOrigin::OriginBased => OriginPolicy::OriginBased,
            AllowedOrigin::All => {
                if options.allow_credentials {
                    // the CORS spec forbids wildcard origins with credentials
                    return Err(WrapError::new(ErrorKind::InvalidAppConfig)
                        .with_message("allowed_origin \"all\" cannot be combined with credentials"));
                }
                OriginPolicy::All
            }
            AllowedOrigin::None => OriginPolicy::Suppressed,
            AllowedOrigin::Any(entries) => {
                let mut exact = Vec::new();
                let mut patterns = Vec::new();
                for entry in entries {
                    // entries anchored with `^` are treated as patterns
                    if entry.starts_with('^') {
                        let re = Regex::new(&entry).map_err(|e| {
                            WrapError::new(ErrorKind::InvalidAppConfig)
                                .with_cause(e)
                                .with_extra("origin_pattern", entry.clone())
                        })?;
                        patterns.push(re);
                    } else {
                        exact.push(entry);
                    }
                }
                OriginPolicy::List { exact, patterns }
            }
            AllowedOrigin::Custom => match matcher {
                Some(m) => OriginPolicy::Custom(m),
                None => {
                    return Err(WrapError::new(ErrorKind::InvalidAppConfig)
                        .with_message("custom allowed_origin needs an origin matcher"));
                }
            },
        };
        let mut allowed_methods = Vec::new();
        for m in &options.allowed_methods {
            let method: Method = m.parse().map_err(|_| {
                WrapError::new(ErrorKind::InvalidAppConfig)
                    .with_message("bad method in cors allowed_methods")
                    .with_extra("method", m.clone())
            })?;
            allowed_methods.push(method);
        }
        if allowed_methods.is_empty() {
            allowed_methods = vec![Method::GET, Method::POST, Method::PUT, Method::DELETE];
        }
        let allowed_headers = if options.allowed_headers.is_empty() {
            vec!["Content-Type".to_string(), "Authorization".to_string()]
        } else {
            options.allowed_headers
        };
        Ok(CorsMiddleware {
            policy,
            allowed_methods,
            allowed_headers,
            allow_credentials: options.allow_credentials,
            max_age: options.cache_expiration,
            expose_headers: options.exposed_headers,
        })
    }

    /// The origin value to answer with, or `None` when headers must not be
    /// added (policy `none`, or a disallowed origin).
    fn resolve_origin(&self, origin: &str) -> Option<String> {
        match &self.policy {
            OriginPolicy::Suppressed => None,
            OriginPolicy::All => Some("*".to_string()),
            OriginPolicy::OriginBased => Some(origin.to_string()),
            OriginPolicy::List { exact, patterns } => {
                if exact.iter().any(|o| o == origin)
                    || patterns.iter().any(|re| re.is_match(origin))
                {
                    Some(origin.to_string())
                } else {
                    None
                }
            }
            OriginPolicy::Custom(matcher) => {
                if matcher(origin) {
                    Some(origin.to_string())
                } else {
                    None
                }
            }
        }
    }

    fn preflight(&self, ctx: &RequestContext, allowed_origin: &str) -> Option<Response> {
        let requested = ctx.request.get_header("access-control-request-method")?;
        let requested: Method = match requested.parse() {
            Ok(m) => m,
            Err(_) => return None,
        };
        if !self.allowed_methods.contains(&requested) {
            warn!(
                logger = %ctx.logger_label(),
                method = %requested,
                "cors preflight rejected: method not allowed"
            );
            return Some(Response::new(403, crate::server::Body::Empty));
        }
        if let Some(headers) = ctx.request.get_header("access-control-request-headers") {
            let allow_all = self.allowed_headers.iter().any(|h| h == "*");
            if !allow_all {
                for header in headers.split(',').map(str::trim) {
                    if !self
                        .allowed_headers
                        .iter()
                        .any(|h| h.eq_ignore_ascii_case(header))
                    {
                        warn!(
                            logger = %ctx.logger_label(),
                            header = header,
                            "cors preflight rejected: header not allowed"
                        );
                        return Some(Response::new(403, crate::server::Body::Empty));
                    }
                }
            }
        }
        let mut resp = Response::ok();
        resp.set_header("access-control-allow-origin", allowed_origin);
        resp.set_header(
            "access-control-allow-methods",
            self.allowed_methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        );
        resp.set_header(
            "access-control-allow-headers",
            self.allowed_headers.join(", "),
        );
        if self.allow_credentials {
            resp.set_header("access-control-allow-credentials", "true");
        }
        if let Some(age) = self.max_age {
            resp.set_header("access-control-max-age", age.to_string());
        }
        resp.set_header("vary", "Origin");
        Some(resp)
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Response> {
        let origin = ctx.request.get_header("origin").map(str::to_string);

        if ctx.request.method == Method::OPTIONS {
            if let Some(origin) = &origin {
                match self.resolve_origin(origin) {
                    Some(allowed) => {
                        // a real preflight is answered here; a plain OPTIONS
                        // request continues down the chain
                        if let Some(resp) = self.preflight(ctx, &allowed) {
                            return Ok(resp);
                        }
                    }
                    None if matches!(self.policy, OriginPolicy::Suppressed) => {}
                    None => {
                        warn!(logger = %ctx.logger_label(), origin = %origin, "cors origin rejected");
                        return Ok(Response::new(403, crate::server::Body::Empty));
                    }
                }
            }
            return ctx.next();
        }

        if let Some(origin) = &origin {
            if self.resolve_origin(origin).is_none()
                && !matches!(self.policy, OriginPolicy::Suppressed)
            {
                warn!(logger = %ctx.logger_label(), origin = %origin, "cors origin rejected");
                return Ok(Response::new(403, crate::server::Body::Empty));
            }
        }

        let mut response = ctx.next()?;

        if let Some(origin) = &origin {
            if let Some(allowed) = self.resolve_origin(origin) {
                response.set_header("access-control-allow-origin", allowed);
                if self.allow_credentials {
                    response.set_header("access-control-allow-credentials", "true");
                }
                if !self.expose_headers.is_empty() {
                    response.set_header(
                        "access-control-expose-headers",
                        self.expose_headers.join(", "),
                    );
                }
                response.set_header("vary", "Origin");
            }
        }
        Ok(response)
    }

    fn shadow_route_methods(&self) -> Vec<Method> {
        vec![Method::OPTIONS]
    }
}
