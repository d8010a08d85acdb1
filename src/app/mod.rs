//! A tenant app: endpoints, middleware stack, router and per-app hooks.

use crate::config::{AppConfig, AppConfigSet};
use crate::context::RequestContext;
use crate::error::{ErrorKind, Result, WrapError};
use crate::middleware::{CorsMiddleware, Middleware, MiddlewareChain, OriginMatcher};
use crate::router::{CachedRoute, Route, Router};
use crate::server::{HttpRequest, Response};
use crate::websocket::WebSocketHandler;
use http::Method;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What actually handles a matched request.
#[derive(Clone)]
pub enum Invocation {
    Handler(Arc<dyn RequestHandler>),
    WebSocket(Arc<dyn WebSocketHandler>),
}

impl Invocation {
    pub fn is_websocket(&self) -> bool {
        matches!(self, Invocation::WebSocket(_))
    }
}

pub trait RequestHandler: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Response>;
}

impl<F> RequestHandler for F
where
    F: Fn(&mut RequestContext) -> Result<Response> + Send + Sync,
{
    fn handle(&self, ctx: &mut RequestContext) -> Result<Response> {
        self(ctx)
    }
}

/// The invocation behind synthesized shadow routes: `200 OK`, empty body.
pub struct OkInvocation;

impl RequestHandler for OkInvocation {
    fn handle(&self, _ctx: &mut RequestContext) -> Result<Response> {
        Ok(Response::ok())
    }
}

/// A named route group plus its invocation and endpoint-scoped middleware.
pub struct Endpoint {
    pub name: String,
    pub routes: Vec<Route>,
    pub invocation: Invocation,
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, invocation: Invocation) -> Self {
        Endpoint {
            name: name.into(),
            routes: Vec::new(),
            invocation,
            middlewares: Vec::new(),
        }
    }

    pub fn handler<H>(name: impl Into<String>, handler: H) -> Self
    where
        H: RequestHandler + 'static,
    {
        Endpoint::new(name, Invocation::Handler(Arc::new(handler)))
    }

    pub fn websocket<H>(name: impl Into<String>, handler: H) -> Self
    where
        H: WebSocketHandler + 'static,
    {
        Endpoint::new(name, Invocation::WebSocket(Arc::new(handler)))
    }

    pub fn route(mut self, method: Method, path: &str) -> Result<Self> {
        self.routes.push(Route::parse(method, path)?);
        Ok(self)
    }

    pub fn with_middleware(mut self, mw: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(mw);
        self
    }
}

/// Body pre/post-processing hook, one per app. The processed body replaces
/// the context's cached body on first access.
pub trait RequestProcessor: Send + Sync {
    fn prepare(&self, _app: &App) -> Result<()> {
        Ok(())
    }

    fn process_request(&self, request: &HttpRequest, body: Vec<u8>) -> Result<Vec<u8>>;

    fn process_response(&self, _ctx: &RequestContext, response: Response) -> Result<Response> {
        Ok(response)
    }
}

/// Optional per-module hooks run while an app is being built from config.
/// The default implementations are no-ops.
pub trait AppModule: Send + Sync {
    fn name(&self) -> &str;

    /// Parse module config and register endpoints/middleware on the app.
    /// A hard error here fails the whole app build.
    fn configure(&self, _app: &mut App, _set: &AppConfigSet) -> Result<()> {
        Ok(())
    }

    /// Non-fatal diagnostics for one environment's config, collected into
    /// the app's warnings file.
    fn warnings(&self, _config: &AppConfig) -> Vec<String> {
        Vec::new()
    }
}

/// A live app. Built from an [`AppConfigSet`], configured by modules, then
/// sealed by [`App::prepare`], which compiles the router and shadow routes.
pub struct App {
    config_set: Arc<AppConfigSet>,
    endpoints: Vec<Arc<Endpoint>>,
    endpoint_names: HashMap<String, usize>,
    middlewares: Vec<Arc<dyn Middleware>>,
    processor: Option<Arc<dyn RequestProcessor>>,
    origin_matcher: Option<OriginMatcher>,
    router: OnceCell<Router>,
}

impl App {
    pub fn new(config_set: Arc<AppConfigSet>) -> Self {
        App {
            config_set,
            endpoints: Vec::new(),
            endpoint_names: HashMap::new(),
            middlewares: Vec::new(),
            processor: None,
            origin_matcher: None,
            router: OnceCell::new(),
        }
    }

    pub fn app_id(&self) -> &str {
        self.config_set.app_id()
    }

    pub fn config_set(&self) -> &Arc<AppConfigSet> {
        &self.config_set
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config_set.main.clone()
    }

    /// Resolve the config for an environment; `None` is the main config.
    pub fn resolve_config(&self, environment: Option<&str>) -> Result<Arc<AppConfig>> {
        self.config_set.resolve(environment)
    }

    pub fn processor(&self) -> Option<Arc<dyn RequestProcessor>> {
        self.processor.clone()
    }

    pub fn set_processor(&mut self, processor: Arc<dyn RequestProcessor>) {
        self.processor = Some(processor);
    }

    /// Matcher backing the `custom` CORS origin policy.
    pub fn set_origin_matcher<F>(&mut self, matcher: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.origin_matcher = Some(Arc::new(matcher));
    }

    pub fn add_middleware(&mut self, mw: Arc<dyn Middleware>) {
        self.middlewares.push(mw);
    }

    /// Register an endpoint. Endpoint names are unique within an app;
    /// a second registration under the same name is `forbidden`.
    pub fn register_endpoint(&mut self, endpoint: Endpoint) -> Result<()> {
        if self.endpoint_names.contains_key(&endpoint.name) {
            return Err(WrapError::new(ErrorKind::Forbidden)
                .with_message("duplicate endpoint name")
                .with_extra("app_id", self.app_id().to_string())
                .with_extra("endpoint", endpoint.name.clone()));
        }
        debug!(
            app_id = %self.app_id(),
            endpoint = %endpoint.name,
            routes = endpoint.routes.len(),
            "endpoint registered"
        );
        self.endpoint_names
            .insert(endpoint.name.clone(), self.endpoints.len());
        self.endpoints.push(Arc::new(endpoint));
        Ok(())
    }

    pub fn endpoint(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoint_names
            .get(name)
            .and_then(|idx| self.endpoints.get(*idx))
    }

    /// Compile the router: per-route chains, HEAD shadows for all-literal
    /// GET routes, and middleware-declared shadow methods. Also attaches
    /// the config-driven CORS middleware and runs the processor's prepare
    /// hook. Call once, after all endpoints are registered.
    pub fn prepare(&mut self) -> Result<()> {
        if self.router.get().is_some() {
            return Err(WrapError::new(ErrorKind::Internal)
                .with_message("app already prepared")
                .with_extra("app_id", self.app_id().to_string()));
        }

        if let Some(cors) = &self.config_set.main.cors {
            if cors.enabled {
                let cors_mw =
                    CorsMiddleware::from_options(cors.clone(), self.origin_matcher.clone())?;
                self.middlewares.insert(0, Arc::new(cors_mw));
            }
        }

        if let Some(processor) = self.processor.clone() {
            processor.prepare(self)?;
        }

        let mut router = Router::new();
        for endpoint in &self.endpoints {
            let chain = Arc::new(MiddlewareChain::new(
                self.middlewares
                    .iter()
                    .chain(endpoint.middlewares.iter())
                    .cloned()
                    .collect(),
                endpoint.invocation.clone(),
            ));
            for route in &endpoint.routes {
                router.insert(
                    route,
                    Arc::new(CachedRoute {
                        endpoint: endpoint.clone(),
                        chain: chain.clone(),
                        shadow: false,
                    }),
                )?;
            }

            // HEAD shadows: literal-only GET routes answer HEAD with a bare
            // 200 without traversing the chain.
            for route in &endpoint.routes {
                if route.method != Method::GET || !route.is_all_literal() {
                    continue;
                }
                let head = route.with_method(Method::HEAD);
                if router.has_terminal(&head) {
                    continue;
                }
                let shadow_chain = Arc::new(MiddlewareChain::new(
                    Vec::new(),
                    Invocation::Handler(Arc::new(OkInvocation)),
                ));
                router.insert(
                    &head,
                    Arc::new(CachedRoute {
                        endpoint: endpoint.clone(),
                        chain: shadow_chain,
                        shadow: true,
                    }),
                )?;
            }

            // Middleware-declared shadow methods traverse the chain but end
            // in the OK invocation.
            let mut declared: Vec<Method> = chain
                .middlewares
                .iter()
                .flat_map(|m| m.shadow_route_methods())
                .collect();
            declared.dedup();
            for method in declared {
                for route in &endpoint.routes {
                    let shadow = route.with_method(method.clone());
                    if router.has_terminal(&shadow) {
                        continue;
                    }
                    let shadow_chain = Arc::new(MiddlewareChain::new(
                        chain.middlewares.clone(),
                        Invocation::Handler(Arc::new(OkInvocation)),
                    ));
                    router.insert(
                        &shadow,
                        Arc::new(CachedRoute {
                            endpoint: endpoint.clone(),
                            chain: shadow_chain,
                            shadow: true,
                        }),
                    )?;
                }
            }
        }

        info!(
            app_id = %self.app_id(),
            endpoints = self.endpoints.len(),
            terminals = router.len(),
            "app prepared"
        );
        self.router
            .set(router)
            .map_err(|_| WrapError::new(ErrorKind::Internal).with_message("router already set"))?;
        Ok(())
    }

    pub fn router(&self) -> Result<&Router> {
        self.router.get().ok_or_else(|| {
            WrapError::new(ErrorKind::Internal)
                .with_message("app not prepared")
                .with_extra("app_id", self.app_id().to_string())
        })
    }
}

/// The live mapping of app id to app, replaced wholesale on config updates.
pub type AppMap = HashMap<String, Arc<App>>;
