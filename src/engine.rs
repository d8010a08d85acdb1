//! The engine: ownership root and top-level responder.
//!
//! An [`Engine`] owns the resource groups, the app-config provider (and
//! through it the live app map), the detector, the service register and the
//! Snowflake generator. Request flow: detect app → resolve environment →
//! route → context → middleware chain → encode. The two process-wide knobs
//! (logging bootstrap, error caller capture) are written exactly once, in
//! [`EngineBuilder::build`].

use crate::app::{App, AppMap, AppModule, Invocation};
use crate::config::engine::{FEATURE_EXTRACT_DEBUG_HOST, FEATURE_IGNORE_BODY_PROCESS};
use crate::config::{AppConfigSet, EngineConfig};
use crate::context::{ContextParts, RequestContext};
use crate::detector::{AppDetector, HostDetector};
use crate::error::{self, ErrorKind, Result, WrapError};
use crate::logging;
use crate::provider::{AppBuilder, AppConfigProvider, AppsListener};
use crate::register::{RegisterStore, ServiceRegister};
use crate::resource::{DatabaseDriver, DatabaseRegistry, ResourceGroups};
use crate::runtime_config::RuntimeConfig;
use crate::server::{HttpRequest, Response};
use crate::snowflake::SnowflakeGenerator;
use crate::updater::{ConfigUpdater, LocalDirUpdater};
use crate::websocket::{CloseFrame, WebSocketSession};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What a dispatched request produced. HTTP responses are written back
/// directly; websocket outcomes are handed to the upgrade transport.
pub enum Dispatched {
    Http(Response),
    /// Chain completed without error on a websocket invocation: lifecycle
    /// callbacks are installed and ready to drive.
    WebSocket(WebSocketSession),
    /// Middleware failed on a websocket invocation: the socket must be
    /// closed immediately with the structured payload.
    WebSocketRejected { response: Response, close: CloseFrame },
}

struct DetectorListener(Arc<dyn AppDetector>);

impl AppsListener for DetectorListener {
    fn apps_updated(&self, apps: &AppMap) {
        self.0.apps_updated(apps);
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    modules: Vec<Arc<dyn AppModule>>,
    updater: Option<Arc<dyn ConfigUpdater>>,
    detector: Option<Arc<dyn AppDetector>>,
    register_store: Option<Arc<dyn RegisterStore>>,
    drivers: DatabaseRegistry,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        EngineBuilder {
            config,
            modules: Vec::new(),
            updater: None,
            detector: None,
            register_store: None,
            drivers: DatabaseRegistry::new(),
        }
    }

    pub fn module(mut self, module: Arc<dyn AppModule>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn updater(mut self, updater: Arc<dyn ConfigUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn AppDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn register_store(mut self, store: Arc<dyn RegisterStore>) -> Self {
        self.register_store = Some(store);
        self
    }

    pub fn database_driver(
        mut self,
        name: impl Into<String>,
        driver: Arc<dyn DatabaseDriver>,
    ) -> Self {
        self.drivers.register(name, driver);
        self
    }

    pub fn build(self) -> Result<Arc<Engine>> {
        let config = self.config;
        logging::init(&config);
        let runtime = RuntimeConfig::from_env();
        error::set_capture_caller(runtime.verbose.error_caller);
        info!(
            service = %config.service_name,
            work_dir = %config.work_dir.display(),
            "engine starting"
        );

        let resources = Arc::new(ResourceGroups::build(&config.resource_groups, &self.drivers)?);

        let register = Arc::new(ServiceRegister::new(
            config.service_name.clone(),
            &config.work_dir,
            self.register_store,
        ));
        let node = register.initialize()?;
        config.seed_snowflake_node(node)?;
        let snowflake = Arc::new(SnowflakeGenerator::new(node));

        let detector: Arc<dyn AppDetector> = match self.detector {
            Some(detector) => detector,
            None => Arc::new(HostDetector::new(
                config.debug_features.is_enabled(FEATURE_EXTRACT_DEBUG_HOST),
            )),
        };
        let updater: Arc<dyn ConfigUpdater> = match self.updater {
            Some(updater) => updater,
            None => Arc::new(LocalDirUpdater::new()),
        };

        let modules = self.modules;
        let module_names: Vec<String> = modules.iter().map(|m| m.name().to_string()).collect();
        let builder: AppBuilder = Arc::new(move |mut set: AppConfigSet| -> Result<App> {
            for module in &modules {
                let mut collected: Vec<(String, String)> = module
                    .warnings(&set.main)
                    .into_iter()
                    .map(|w| (String::new(), w))
                    .collect();
                for (env, cfg) in &set.environments {
                    for w in module.warnings(cfg) {
                        collected.push((env.clone(), w));
                    }
                }
                for (env, warning) in collected {
                    set.add_warning(&env, module.name(), warning);
                }
            }
            let set = Arc::new(set);
            let mut app = App::new(set.clone());
            for module in &modules {
                module.configure(&mut app, &set)?;
            }
            app.prepare()?;
            Ok(app)
        });

        let includes: HashSet<String> = config
            .debug_features
            .includes_app_ids()
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default();
        let provider = Arc::new(AppConfigProvider::new(
            config.app_source.clone(),
            config.warnings_dir(),
            updater,
            builder,
            module_names,
            includes,
        ));
        provider.add_listener(Arc::new(DetectorListener(detector.clone())));

        Ok(Arc::new(Engine {
            config: Arc::new(config),
            runtime,
            resources,
            snowflake,
            detector,
            provider,
            register,
        }))
    }
}

pub struct Engine {
    config: Arc<EngineConfig>,
    runtime: RuntimeConfig,
    resources: Arc<ResourceGroups>,
    snowflake: Arc<SnowflakeGenerator>,
    detector: Arc<dyn AppDetector>,
    provider: Arc<AppConfigProvider>,
    register: Arc<ServiceRegister>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    pub fn resources(&self) -> &Arc<ResourceGroups> {
        &self.resources
    }

    pub fn snowflake(&self) -> &Arc<SnowflakeGenerator> {
        &self.snowflake
    }

    pub fn register(&self) -> &Arc<ServiceRegister> {
        &self.register
    }

    pub fn provider(&self) -> &Arc<AppConfigProvider> {
        &self.provider
    }

    /// The current app snapshot; immutable for as long as the caller holds
    /// it.
    pub fn apps(&self) -> Arc<AppMap> {
        self.provider.apps()
    }

    /// Run the initial synchronous update, then start the pull loop and
    /// the lease renewal loop.
    pub fn start(self: &Arc<Self>) {
        if let Err(err) = self.provider.update_once(false) {
            error!(error = %err, "initial app update failed, starting with no apps");
        }
        self.provider.schedule();
        self.register.start_renewal();
    }

    /// Trigger one update cycle outside the schedule.
    pub fn update_apps_now(&self) -> Result<()> {
        self.provider.update_once(false)
    }

    /// Dispatch a request and encode any error per the wire contract.
    pub fn respond(&self, request: HttpRequest) -> Dispatched {
        let plain = request.accepts_plain_text();
        let url = request.path.clone();
        let method = request.method.clone();
        let started = std::time::Instant::now();
        match self.dispatch(request) {
            Ok(dispatched) => {
                if self.runtime.verbose.metric {
                    let status = match &dispatched {
                        Dispatched::Http(response) => response.status,
                        Dispatched::WebSocket(_) => 101,
                        Dispatched::WebSocketRejected { response, .. } => response.status,
                    };
                    info!(
                        url = %url,
                        method = %method,
                        status = status,
                        elapsed_us = started.elapsed().as_micros() as u64,
                        "request served"
                    );
                }
                dispatched
            }
            Err(err) => {
                match err.kind() {
                    ErrorKind::Database | ErrorKind::Internal => {
                        error!(url = %url, method = %method, error = %err, "request failed");
                    }
                    _ => {
                        debug!(url = %url, method = %method, error = %err, "request rejected");
                    }
                }
                Dispatched::Http(Response::from_error(&err, plain))
            }
        }
    }

    fn dispatch(&self, request: HttpRequest) -> Result<Dispatched> {
        let apps = self.apps();

        let detection = self.detector.detect(&request).ok_or_else(|| {
            let err = WrapError::new(ErrorKind::AppNotFound);
            match request.host() {
                Some(host) => err.with_extra("host", host),
                None => err.with_message("request carries no host"),
            }
        })?;
        let app = apps.get(&detection.app_id).cloned().ok_or_else(|| {
            WrapError::new(ErrorKind::AppNotFound).with_extra("app_id", detection.app_id.clone())
        })?;
        let config = app.resolve_config(detection.environment.as_deref())?;

        let hit = app
            .router()?
            .find_with_fallback(&request.method, &request.path)
            .ok_or_else(|| {
                WrapError::new(ErrorKind::RouteNotFound)
                    .with_extra("app_id", detection.app_id.clone())
                    .with_extra("method", request.method.to_string())
                    .with_extra("path", request.path.clone())
            })?;

        let trace_id = self.snowflake.generate_base36();
        if self.runtime.verbose.route {
            debug!(
                app_id = %detection.app_id,
                endpoint = %hit.cached.endpoint.name,
                shadow = hit.cached.shadow,
                trace_id = %trace_id,
                "route matched"
            );
        }

        let websocket = match (&hit.cached.chain.invocation, hit.cached.shadow) {
            (Invocation::WebSocket(handler), false) => Some(handler.clone()),
            _ => None,
        };

        let mut ctx = RequestContext::new(ContextParts {
            request,
            endpoint: hit.cached.endpoint.clone(),
            app: app.clone(),
            config,
            params: hit.params,
            chain: hit.cached.chain.clone(),
            trace_id,
            engine_offset_secs: self.config.time_offset_secs,
            ignore_body_process: self
                .config
                .debug_features
                .is_enabled(FEATURE_IGNORE_BODY_PROCESS),
        });

        match ctx.next() {
            Ok(mut response) => {
                if let Some(handler) = websocket {
                    return Ok(Dispatched::WebSocket(WebSocketSession::new(ctx, handler)));
                }
                if let Some(processor) = app.processor() {
                    response = processor.process_response(&ctx, response)?;
                }
                if hit.discard_body {
                    response.discard_body();
                }
                Ok(Dispatched::Http(response))
            }
            Err(err) => {
                if websocket.is_some() {
                    return Ok(Dispatched::WebSocketRejected {
                        response: Response::from_error(&err, false),
                        close: CloseFrame::from_error(&err),
                    });
                }
                Err(err)
            }
        }
    }

    /// Bind the HTTP listener and serve until stopped.
    pub fn serve(self: &Arc<Self>) -> std::io::Result<crate::server::ServerHandle> {
        crate::server::serve(self.clone())
    }
}
