#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use apphive::app::{App, AppModule, Endpoint};
use apphive::config::AppConfigSet;
use apphive::context::RequestContext;
use apphive::error::Result;
use apphive::server::{HttpRequest, Response};
use common::{body_json, body_text, build_engine, expect_http, write_app_config};
use http::Method;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registers `GET /ping` answering with the app's configured ping body,
/// and counts endpoint invocations.
struct PingModule {
    hits: Arc<AtomicUsize>,
}

impl PingModule {
    fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(PingModule { hits: hits.clone() }),
            hits,
        )
    }
}

impl AppModule for PingModule {
    fn name(&self) -> &str {
        "ping"
    }

    fn configure(&self, app: &mut App, set: &AppConfigSet) -> Result<()> {
        let body = set
            .main
            .section("ping")
            .and_then(|v| v.get("body"))
            .and_then(|v| v.as_str())
            .unwrap_or("pong")
            .to_string();
        let hits = self.hits.clone();
        let endpoint = Endpoint::handler("ping", move |ctx: &mut RequestContext| {
            hits.fetch_add(1, Ordering::SeqCst);
            let env = ctx.environment().unwrap_or("main").to_string();
            let mut resp = Response::text(200, body.clone());
            resp.set_header("x-env", env);
            Ok(resp)
        })
        .route(Method::GET, "/ping")?;
        app.register_endpoint(endpoint)
    }
}

fn app_doc(app_id: &str, host: &str, body: &str) -> serde_json::Value {
    json!({
        "app_id": app_id,
        "hosts": [host],
        "ping": { "body": body },
        "environments": {
            "staging": { "environment": "staging", "ping": { "body": format!("{body}-staging") } }
        }
    })
}

#[test]
fn host_routing_picks_the_right_app() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "from-app1"));
    write_app_config(tmp.path(), "app2", &app_doc("app2", "b.example", "from-app2"));
    let (module, _) = PingModule::new();
    let engine = build_engine(&tmp, vec![module]);

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/ping").with_header("host", "a.example"),
    ));
    assert_eq!(resp.status, 200);
    assert_eq!(body_text(&resp), "from-app1");

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/ping").with_header("host", "b.example"),
    ));
    assert_eq!(body_text(&resp), "from-app2");
}

#[test]
fn unknown_host_is_app_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "x"));
    let (module, _) = PingModule::new();
    let engine = build_engine(&tmp, vec![module]);

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/ping").with_header("host", "c.example"),
    ));
    assert_eq!(resp.status, 400);
    let body = body_json(&resp);
    assert!(body["error"].as_str().unwrap().starts_with("app_not_found"));
}

#[test]
fn unknown_route_is_route_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "x"));
    let (module, _) = PingModule::new();
    let engine = build_engine(&tmp, vec![module]);

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/nope").with_header("host", "a.example"),
    ));
    assert_eq!(resp.status, 400);
    assert!(body_json(&resp)["error"]
        .as_str()
        .unwrap()
        .starts_with("route_not_found"));
}

#[test]
fn head_shadow_answers_without_running_the_endpoint() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "x"));
    let (module, hits) = PingModule::new();
    let engine = build_engine(&tmp, vec![module]);

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::HEAD, "/ping").with_header("host", "a.example"),
    ));
    assert_eq!(resp.status, 200);
    assert_eq!(body_text(&resp), "");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn environment_header_selects_the_variant() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "base"));
    let (module, _) = PingModule::new();
    let engine = build_engine(&tmp, vec![module]);

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/ping")
            .with_header("host", "a.example")
            .with_header("x-app-environment", "staging"),
    ));
    assert_eq!(resp.get_header("x-env"), Some("staging"));

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/ping")
            .with_header("host", "a.example")
            .with_header("x-app-environment", "nope"),
    ));
    assert_eq!(resp.status, 400);
    assert!(body_json(&resp)["error"]
        .as_str()
        .unwrap()
        .starts_with("environment_not_found"));
}

#[test]
fn plain_text_errors_when_accept_prefers_it() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "x"));
    let (module, _) = PingModule::new();
    let engine = build_engine(&tmp, vec![module]);

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/ping")
            .with_header("host", "zzz.example")
            .with_header("accept", "text/plain"),
    ));
    assert_eq!(resp.status, 400);
    assert_eq!(resp.get_header("content-type"), Some("text/plain"));
    assert!(body_text(&resp).starts_with("app_not_found"));
}

#[test]
fn hot_reload_changes_responses_and_keeps_old_snapshots_intact() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "v1"));
    let (module, _) = PingModule::new();
    let engine = build_engine(&tmp, vec![module]);

    let before = engine.apps();
    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/ping").with_header("host", "a.example"),
    ));
    assert_eq!(body_text(&resp), "v1");

    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "v2"));
    engine.update_apps_now().unwrap();

    let after = engine.apps();
    assert!(!Arc::ptr_eq(&before, &after));

    // a request begun against the old snapshot still sees the old config
    let old_app = before.get("app1").unwrap();
    assert_eq!(
        old_app.config_set().main.section("ping").unwrap()["body"],
        "v1"
    );

    let resp = expect_http(engine.respond(
        HttpRequest::new(Method::GET, "/ping").with_header("host", "a.example"),
    ));
    assert_eq!(body_text(&resp), "v2");
}

#[test]
fn trace_ids_are_distinct_snowflakes() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "app1", &app_doc("app1", "a.example", "x"));
    let (module, _) = PingModule::new();
    let engine = build_engine(&tmp, vec![module]);

    let a = engine.snowflake().generate_base36();
    let b = engine.snowflake().generate_base36();
    assert_ne!(a, b);
    assert_eq!(
        engine.config().snowflake_node(),
        Some(engine.snowflake().node())
    );
}
