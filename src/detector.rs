//! App detection: mapping an inbound request to `(app_id, environment?)`.

use crate::app::AppMap;
use crate::server::HttpRequest;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Header consulted for the environment overlay by the default detector.
pub const ENVIRONMENT_HEADER: &str = "x-app-environment";

/// Host override honored when the `engine_extractDebugHost` feature is on.
pub const DEBUG_HOST_HEADER: &str = "x-debug-host";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub app_id: String,
    pub environment: Option<String>,
}

pub trait AppDetector: Send + Sync {
    fn detect(&self, request: &HttpRequest) -> Option<Detection>;

    /// Called after every app-map swap so detectors can rebuild derived
    /// indexes. Default is a no-op.
    fn apps_updated(&self, _apps: &AppMap) {}
}

/// The default detector: a host → app-id index over every app's
/// request-tagged hosts, rebuilt on each app-map swap.
pub struct HostDetector {
    index: RwLock<HashMap<String, String>>,
    extract_debug_host: bool,
}

impl HostDetector {
    pub fn new(extract_debug_host: bool) -> Self {
        HostDetector {
            index: RwLock::new(HashMap::new()),
            extract_debug_host,
        }
    }

    fn lookup(&self, host: &str) -> Option<String> {
        self.index.read().unwrap().get(host).cloned()
    }
}

impl AppDetector for HostDetector {
    fn detect(&self, request: &HttpRequest) -> Option<Detection> {
        let debug_host = if self.extract_debug_host {
            request
                .get_header(DEBUG_HOST_HEADER)
                .map(|h| h.split(':').next().unwrap_or(h).to_string())
        } else {
            None
        };
        let host = match &debug_host {
            Some(h) => h.as_str(),
            None => request.host()?,
        };
        let app_id = self.lookup(host)?;
        let environment = request
            .get_header(ENVIRONMENT_HEADER)
            .map(str::to_string);
        Some(Detection {
            app_id,
            environment,
        })
    }

    fn apps_updated(&self, apps: &AppMap) {
        let mut index = HashMap::new();
        for (app_id, app) in apps {
            for host in app.config_set().main.request_hosts() {
                index.insert(host.to_string(), app_id.clone());
            }
        }
        debug!(hosts = index.len(), apps = apps.len(), "host index rebuilt");
        *self.index.write().unwrap() = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfigSet;
    use http::Method;
    use serde_json::json;
    use std::sync::Arc;

    fn app(app_id: &str, host: &str) -> (String, Arc<crate::app::App>) {
        let set = AppConfigSet::from_value(json!({
            "app_id": app_id,
            "hosts": [host],
        }))
        .unwrap();
        (
            app_id.to_string(),
            Arc::new(crate::app::App::new(Arc::new(set))),
        )
    }

    #[test]
    fn host_detection_after_rebuild() {
        let detector = HostDetector::new(false);
        let apps: AppMap = [app("app1", "a.example"), app("app2", "b.example")]
            .into_iter()
            .collect();
        detector.apps_updated(&apps);

        let req = HttpRequest::new(Method::GET, "/ping").with_header("host", "a.example:8080");
        let hit = detector.detect(&req).unwrap();
        assert_eq!(hit.app_id, "app1");
        assert_eq!(hit.environment, None);

        let req = HttpRequest::new(Method::GET, "/ping").with_header("host", "c.example");
        assert!(detector.detect(&req).is_none());
    }

    #[test]
    fn environment_header_selects_variant() {
        let detector = HostDetector::new(false);
        let apps: AppMap = [app("app1", "a.example")].into_iter().collect();
        detector.apps_updated(&apps);
        let req = HttpRequest::new(Method::GET, "/")
            .with_header("host", "a.example")
            .with_header(ENVIRONMENT_HEADER, "staging");
        let hit = detector.detect(&req).unwrap();
        assert_eq!(hit.environment.as_deref(), Some("staging"));
    }

    #[test]
    fn debug_host_override_needs_feature() {
        let apps: AppMap = [app("app1", "a.example")].into_iter().collect();

        let plain = HostDetector::new(false);
        plain.apps_updated(&apps);
        let req = HttpRequest::new(Method::GET, "/")
            .with_header("host", "other.example")
            .with_header(DEBUG_HOST_HEADER, "a.example");
        assert!(plain.detect(&req).is_none());

        let debugging = HostDetector::new(true);
        debugging.apps_updated(&apps);
        assert_eq!(debugging.detect(&req).unwrap().app_id, "app1");
    }
}
