#![allow(dead_code)]

use apphive::app::AppModule;
use apphive::engine::{Dispatched, Engine};
use apphive::register::MemoryRegisterStore;
use apphive::server::Response;
use apphive::EngineConfig;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Engine config rooted in a temp dir, manual updates only.
pub fn engine_config(root: &Path) -> EngineConfig {
    let apps_dir = root.join("apps");
    std::fs::create_dir_all(&apps_dir).unwrap();
    EngineConfig::from_value(json!({
        "service_name": "apphive-test",
        "work_dir": root,
        "app_source": {
            "local_path": apps_dir,
            "pull_interval_secs": 0
        }
    }))
    .unwrap()
}

/// Like [`engine_config`], but bound to a loopback port with a short
/// shutdown timeout, for tests that run the real listener.
pub fn engine_config_on_port(root: &Path, port: u16) -> EngineConfig {
    let apps_dir = root.join("apps");
    std::fs::create_dir_all(&apps_dir).unwrap();
    EngineConfig::from_value(json!({
        "service_name": "apphive-test",
        "work_dir": root,
        "server": {
            "host": "127.0.0.1",
            "port": port,
            "shutdown_timeout_secs": 5
        },
        "app_source": {
            "local_path": apps_dir,
            "pull_interval_secs": 0
        }
    }))
    .unwrap()
}

/// Write one app directory with its `config.json`.
pub fn write_app_config(root: &Path, app_id: &str, value: &Value) {
    let dir = root.join("apps").join(app_id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.json"), value.to_string()).unwrap();
}

/// Build an engine over the temp dir with the given modules and run the
/// first update cycle.
pub fn build_engine(tmp: &TempDir, modules: Vec<Arc<dyn AppModule>>) -> Arc<Engine> {
    build_engine_with(engine_config(tmp.path()), modules)
}

pub fn build_engine_with(config: EngineConfig, modules: Vec<Arc<dyn AppModule>>) -> Arc<Engine> {
    let mut builder = Engine::builder(config).register_store(Arc::new(MemoryRegisterStore::new()));
    for module in modules {
        builder = builder.module(module);
    }
    let engine = builder.build().unwrap();
    engine.update_apps_now().unwrap();
    engine
}

pub fn expect_http(dispatched: Dispatched) -> Response {
    match dispatched {
        Dispatched::Http(response) => response,
        Dispatched::WebSocket(_) => panic!("expected http response, got websocket session"),
        Dispatched::WebSocketRejected { .. } => {
            panic!("expected http response, got websocket rejection")
        }
    }
}

pub fn body_json(response: &Response) -> Value {
    match &response.body {
        apphive::server::Body::Json(value) => value.clone(),
        apphive::server::Body::Bytes(bytes) => serde_json::from_slice(bytes).unwrap(),
        other => panic!("expected json body, got {other:?}"),
    }
}

pub fn body_text(response: &Response) -> String {
    match &response.body {
        apphive::server::Body::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        apphive::server::Body::Json(value) => value.to_string(),
        apphive::server::Body::Empty => String::new(),
        other => panic!("expected text body, got {other:?}"),
    }
}
