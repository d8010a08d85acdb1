//! Per-request context and cooperative middleware traversal.
//!
//! The context owns the cursor that drives the chain: each middleware calls
//! [`RequestContext::next`] exactly once, the call at the end of the chain
//! invokes the endpoint, and every returned response is recorded on the way
//! back so outer middleware can mutate what inner stages produced.

use crate::app::{App, Endpoint, Invocation};
use crate::config::AppConfig;
use crate::error::{ErrorKind, Result, WrapError};
use crate::middleware::MiddlewareChain;
use crate::router::{get_param, ParamVec};
use crate::server::{HttpRequest, Response};
use crate::store::TypedStore;
use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

/// Header that, together with the `engine_ignoreBodyProcess` debug feature,
/// bypasses body processing for one request.
pub const IGNORE_BODY_PROCESS_HEADER: &str = "x-ignore-body-process";

pub struct ContextParts {
    pub request: HttpRequest,
    pub endpoint: Arc<Endpoint>,
    pub app: Arc<App>,
    pub config: Arc<AppConfig>,
    pub params: ParamVec,
    pub chain: Arc<MiddlewareChain>,
    pub trace_id: String,
    /// Engine-level offset used when the app config carries none.
    pub engine_offset_secs: i32,
    pub ignore_body_process: bool,
}

pub struct RequestContext {
    pub request: HttpRequest,
    pub endpoint: Arc<Endpoint>,
    pub app: Arc<App>,
    pub config: Arc<AppConfig>,
    pub params: ParamVec,
    pub trace_id: String,
    pub started_at: DateTime<FixedOffset>,
    pub user_id: Option<String>,
    logger_label: String,
    chain: Arc<MiddlewareChain>,
    cursor: isize,
    last_response: Option<Response>,
    body_cache: Option<Arc<Vec<u8>>>,
    body_taken: bool,
    ignore_body_process: bool,
    store: TypedStore,
}

impl RequestContext {
    pub fn new(parts: ContextParts) -> Self {
        let offset_secs = if parts.config.time_offset_secs != 0 {
            parts.config.time_offset_secs
        } else {
            parts.engine_offset_secs
        };
        let offset =
            FixedOffset::east_opt(offset_secs).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        let logger_label = format!(
            "{}.request.{}",
            parts.config.app_id, parts.trace_id
        );
        RequestContext {
            request: parts.request,
            endpoint: parts.endpoint,
            app: parts.app,
            config: parts.config,
            params: parts.params,
            trace_id: parts.trace_id,
            started_at: Utc::now().with_timezone(&offset),
            user_id: None,
            logger_label,
            chain: parts.chain,
            cursor: -1,
            last_response: None,
            body_cache: None,
            body_taken: false,
            ignore_body_process: parts.ignore_body_process,
            store: TypedStore::new(),
        }
    }

    /// The structured-log label of this request: `<appID>.request.<traceID>`.
    pub fn logger_label(&self) -> &str {
        &self.logger_label
    }

    pub fn environment(&self) -> Option<&str> {
        self.config.environment.as_deref()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        get_param(&self.params, name)
    }

    /// Typed per-request storage.
    pub fn store(&self) -> &TypedStore {
        &self.store
    }

    /// Advance the chain cursor and run the next stage.
    ///
    /// Calling past the endpoint is a programming error (a middleware that
    /// called `next()` twice); the recorded response is returned and nothing
    /// downstream re-runs.
    pub fn next(&mut self) -> Result<Response> {
        self.cursor += 1;
        let index = self.cursor as usize;
        let count = self.chain.len();
        if index < count {
            let middleware = self.chain.middlewares[index].clone();
            let response = middleware.handle(self)?;
            self.last_response = Some(response.clone());
            Ok(response)
        } else if index == count {
            let chain = self.chain.clone();
            let response = match &chain.invocation {
                Invocation::Handler(handler) => handler.handle(self)?,
                // websocket callbacks are installed by the engine after the
                // chain completes; the recorded response is the upgrade
                Invocation::WebSocket(_) => Response::switching_protocols(),
            };
            self.last_response = Some(response.clone());
            Ok(response)
        } else {
            warn!(
                logger = %self.logger_label,
                endpoint = %self.endpoint.name,
                "next() called past the endpoint"
            );
            Ok(self
                .last_response
                .clone()
                .unwrap_or_else(Response::ok))
        }
    }

    /// The request body after processing, cached on first access.
    ///
    /// When the app has a [`crate::app::RequestProcessor`] and this request
    /// does not bypass it, the processed bytes replace the raw body so
    /// later reads are cheap.
    pub fn body(&mut self) -> Result<Option<Arc<Vec<u8>>>> {
        if let Some(cached) = &self.body_cache {
            return Ok(Some(cached.clone()));
        }
        if self.body_taken {
            return Ok(None);
        }
        self.body_taken = true;
        let raw = match self.request.body.take() {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let bypass = self.ignore_body_process
            && self.request.get_header(IGNORE_BODY_PROCESS_HEADER).is_some();
        let processed = match self.app.processor() {
            Some(processor) if !bypass => processor.process_request(&self.request, raw)?,
            _ => raw,
        };
        let cached = Arc::new(processed);
        self.body_cache = Some(cached.clone());
        Ok(Some(cached))
    }

    /// Decode the body as `T`, requiring a known content type.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.decode_with(None)
    }

    /// Decode the body as `T`; `default_content_type` stands in when the
    /// request does not declare one. A missing body or content type is
    /// `bad_request`; a decoder failure is `invalid_parameter`.
    pub fn decode_with<T: DeserializeOwned>(
        &mut self,
        default_content_type: Option<&str>,
    ) -> Result<T> {
        let content_type = self
            .request
            .get_header("content-type")
            .map(str::to_string)
            .or_else(|| default_content_type.map(str::to_string))
            .ok_or_else(|| {
                WrapError::new(ErrorKind::BadRequest).with_message("missing content-type")
            })?;
        let body = self.body()?.ok_or_else(|| {
            WrapError::new(ErrorKind::BadRequest).with_message("missing request body")
        })?;
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match media_type.as_str() {
            "application/json" => serde_json::from_slice(&body).map_err(|e| {
                WrapError::new(ErrorKind::InvalidParameter)
                    .with_cause(e)
                    .with_extra("content_type", media_type)
            }),
            "application/x-www-form-urlencoded" => {
                let mut map = serde_json::Map::new();
                for (k, v) in url::form_urlencoded::parse(&body) {
                    map.insert(k.to_string(), serde_json::Value::String(v.to_string()));
                }
                serde_json::from_value(serde_json::Value::Object(map)).map_err(|e| {
                    WrapError::new(ErrorKind::InvalidParameter)
                        .with_cause(e)
                        .with_extra("content_type", media_type)
                })
            }
            other => Err(WrapError::new(ErrorKind::InvalidParameter)
                .with_message("unsupported content type")
                .with_extra("content_type", other)),
        }
    }

    /// The response most recently recorded by the chain, if any stage has
    /// returned yet.
    pub fn recorded_response(&self) -> Option<&Response> {
        self.last_response.as_ref()
    }
}
