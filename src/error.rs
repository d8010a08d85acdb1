//! Framework error model.
//!
//! Every user-facing failure is a [`WrapError`]: a base [`ErrorKind`] from a
//! closed taxonomy, an optional original cause, an optional wrapped inner
//! error, and an extras map that merges upward when errors are re-wrapped.
//! The HTTP status of a response is always derived from the base kind.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide switch for capturing the caller stack on error construction.
///
/// Set once during engine startup (from the `error_caller` word of
/// `RUNTIME_VERBOSE`); never written afterwards.
static CAPTURE_CALLER: AtomicBool = AtomicBool::new(false);

pub fn set_capture_caller(enabled: bool) {
    CAPTURE_CALLER.store(enabled, Ordering::Relaxed);
}

pub fn capture_caller_enabled() -> bool {
    CAPTURE_CALLER.load(Ordering::Relaxed)
}

/// Closed taxonomy of base error kinds with pre-assigned HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    BadRequest,
    AppNotFound,
    EnvironmentNotFound,
    RouteNotFound,
    DatabaseConstraintViolation,
    Unauthorized,
    Forbidden,
    NotFound,
    Timeout,
    NotModified,
    ApiRateLimit,
    InvalidAppConfig,
    Internal,
    InvalidEngineConfig,
    Database,
    Cache,
    OssUnavailable,
}

impl ErrorKind {
    /// Stable wire name of the kind, used in response bodies and logs.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::AppNotFound => "app_not_found",
            ErrorKind::EnvironmentNotFound => "environment_not_found",
            ErrorKind::RouteNotFound => "route_not_found",
            ErrorKind::DatabaseConstraintViolation => "database_constraint_violation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotModified => "not_modified",
            ErrorKind::ApiRateLimit => "api_rate_limit",
            ErrorKind::InvalidAppConfig => "invalid_app_config",
            ErrorKind::Internal => "internal",
            ErrorKind::InvalidEngineConfig => "invalid_engine_config",
            ErrorKind::Database => "database",
            ErrorKind::Cache => "cache",
            ErrorKind::OssUnavailable => "oss_unavailable",
        }
    }

    /// HTTP status derived from the kind.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::InvalidParameter
            | ErrorKind::BadRequest
            | ErrorKind::AppNotFound
            | ErrorKind::EnvironmentNotFound
            | ErrorKind::RouteNotFound
            | ErrorKind::DatabaseConstraintViolation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::NotModified => 304,
            ErrorKind::ApiRateLimit => 429,
            ErrorKind::InvalidAppConfig => 417,
            ErrorKind::Internal
            | ErrorKind::InvalidEngineConfig
            | ErrorKind::Database
            | ErrorKind::Cache
            | ErrorKind::OssUnavailable => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The framework's wrappable error.
#[derive(Debug)]
pub struct WrapError {
    kind: ErrorKind,
    message: Option<String>,
    cause: Option<String>,
    inner: Option<Box<WrapError>>,
    extras: BTreeMap<String, Value>,
    caller: Option<String>,
}

pub type Result<T> = std::result::Result<T, WrapError>;

impl WrapError {
    pub fn new(kind: ErrorKind) -> Self {
        let caller = if capture_caller_enabled() {
            Some(std::backtrace::Backtrace::force_capture().to_string())
        } else {
            None
        };
        WrapError {
            kind,
            message: None,
            cause: None,
            inner: None,
            extras: BTreeMap::new(),
            caller,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Wrap this error under a new base kind.
    ///
    /// The new outer error takes over the inner extras; keys already present
    /// on the outer error win.
    pub fn wrap(self, kind: ErrorKind) -> Self {
        let mut outer = WrapError::new(kind);
        for (k, v) in &self.extras {
            outer.extras.entry(k.clone()).or_insert_with(|| v.clone());
        }
        outer.inner = Some(Box::new(self));
        outer
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn inner(&self) -> Option<&WrapError> {
        self.inner.as_deref()
    }

    pub fn extras(&self) -> &BTreeMap<String, Value> {
        &self.extras
    }

    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Number of wrapped errors in the chain, this one included.
    pub fn chain_len(&self) -> usize {
        1 + self.inner.as_ref().map_or(0, |e| e.chain_len())
    }

    /// The `<base>(<original>)` rendering used in JSON error bodies.
    pub fn response_message(&self) -> String {
        match self.original() {
            Some(orig) => format!("{}({})", self.kind.name(), orig),
            None => self.kind.name().to_string(),
        }
    }

    /// The innermost cause or message, whichever the chain reaches first.
    fn original(&self) -> Option<&str> {
        if let Some(inner) = &self.inner {
            if let Some(orig) = inner.original() {
                return Some(orig);
            }
        }
        self.cause.as_deref().or(self.message.as_deref())
    }

    /// Default error body: a single-field JSON object.
    pub fn json_body(&self) -> Value {
        serde_json::json!({ "error": self.response_message() })
    }

    /// Plain-text variant: description plus a newline-separated extras dump.
    pub fn plain_body(&self) -> String {
        let mut out = self.to_string();
        for (k, v) in &self.extras {
            out.push('\n');
            out.push_str(&serde_json::json!({ k: v }).to_string());
        }
        out
    }
}

impl fmt::Display for WrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())?;
        if let Some(m) = &self.message {
            write!(f, ": {m}")?;
        }
        if let Some(c) = &self.cause {
            write!(f, " ({c})")?;
        }
        if let Some(inner) = &self.inner {
            write!(f, " <- {inner}")?;
        }
        Ok(())
    }
}

impl std::error::Error for WrapError {}

/// Convert an arbitrary error into a [`WrapError`].
///
/// An error that already is one passes through unchanged, which makes the
/// conversion idempotent: converting twice yields the same base kind and the
/// same chain length.
pub fn convert_or_wrap(err: anyhow::Error) -> WrapError {
    match err.downcast::<WrapError>() {
        Ok(wrapped) => wrapped,
        Err(other) => WrapError::new(ErrorKind::Internal).with_cause(other),
    }
}

impl From<std::io::Error> for WrapError {
    fn from(err: std::io::Error) -> Self {
        WrapError::new(ErrorKind::Internal).with_cause(err)
    }
}

impl From<serde_json::Error> for WrapError {
    fn from(err: serde_json::Error) -> Self {
        WrapError::new(ErrorKind::InvalidParameter).with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_kind() {
        assert_eq!(ErrorKind::RouteNotFound.status(), 400);
        assert_eq!(ErrorKind::InvalidAppConfig.status(), 417);
        assert_eq!(ErrorKind::NotModified.status(), 304);
        assert_eq!(WrapError::new(ErrorKind::Cache).status(), 500);
    }

    #[test]
    fn wrap_merges_extras_upward() {
        let inner = WrapError::new(ErrorKind::Database)
            .with_extra("table", "service_register")
            .with_extra("shared", "inner");
        let outer = inner.wrap(ErrorKind::Internal).with_extra("shared", "outer");
        assert_eq!(outer.extras()["table"], "service_register");
        // outer values win over merged inner values
        assert_eq!(outer.extras()["shared"], "outer");
        assert_eq!(outer.chain_len(), 2);
    }

    #[test]
    fn response_message_reaches_innermost_cause() {
        let err = WrapError::new(ErrorKind::Database)
            .with_cause("connection refused")
            .wrap(ErrorKind::Internal);
        assert_eq!(err.response_message(), "internal(connection refused)");
        assert_eq!(err.json_body()["error"], "internal(connection refused)");
    }
}
