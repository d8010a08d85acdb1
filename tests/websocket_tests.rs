#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use apphive::app::{App, AppModule, Endpoint};
use apphive::config::AppConfigSet;
use apphive::context::RequestContext;
use apphive::engine::Dispatched;
use apphive::error::{ErrorKind, Result, WrapError};
use apphive::middleware::Middleware;
use apphive::server::{HttpRequest, Response};
use apphive::websocket::{WebSocketHandler, CLOSE_GOING_AWAY};
use common::{build_engine, write_app_config};
use http::Method;
use serde_json::json;
use std::sync::{Arc, Mutex};

struct EchoSocket {
    frames: Arc<Mutex<Vec<String>>>,
}

impl WebSocketHandler for EchoSocket {
    fn on_text(&self, ctx: &mut RequestContext, text: &str) -> Result<()> {
        self.frames
            .lock()
            .unwrap()
            .push(format!("{}:{}", ctx.endpoint.name, text));
        Ok(())
    }

    fn on_close(&self, _ctx: &mut RequestContext, code: u16, _reason: &str) -> Result<()> {
        self.frames.lock().unwrap().push(format!("close:{code}"));
        Ok(())
    }
}

struct DenyAll;

impl Middleware for DenyAll {
    fn handle(&self, _ctx: &mut RequestContext) -> Result<Response> {
        Err(WrapError::new(ErrorKind::Unauthorized).with_message("no ticket"))
    }
}

struct FeedModule {
    frames: Arc<Mutex<Vec<String>>>,
    guarded: bool,
}

impl AppModule for FeedModule {
    fn name(&self) -> &str {
        "feed"
    }

    fn configure(&self, app: &mut App, _set: &AppConfigSet) -> Result<()> {
        let mut endpoint = Endpoint::websocket(
            "feed",
            EchoSocket {
                frames: self.frames.clone(),
            },
        )
        .route(Method::GET, "/feed")?;
        if self.guarded {
            endpoint = endpoint.with_middleware(Arc::new(DenyAll));
        }
        app.register_endpoint(endpoint)
    }
}

fn app_doc() -> serde_json::Value {
    json!({ "app_id": "feed", "hosts": ["feed.example"] })
}

#[test]
fn clean_chain_installs_lifecycle_callbacks() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "feed", &app_doc());
    let frames = Arc::new(Mutex::new(Vec::new()));
    let engine = build_engine(
        &tmp,
        vec![Arc::new(FeedModule {
            frames: frames.clone(),
            guarded: false,
        })],
    );

    let dispatched = engine.respond(
        HttpRequest::new(Method::GET, "/feed").with_header("host", "feed.example"),
    );
    let mut session = match dispatched {
        Dispatched::WebSocket(session) => session,
        _ => panic!("expected a websocket session"),
    };

    session.open().unwrap();
    session.text("hello").unwrap();
    session.text("again").unwrap();
    session.close(1000, "done").unwrap();

    assert_eq!(
        frames.lock().unwrap().as_slice(),
        ["feed:hello", "feed:again", "close:1000"]
    );
}

#[test]
fn middleware_error_rejects_with_going_away() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "feed", &app_doc());
    let frames = Arc::new(Mutex::new(Vec::new()));
    let engine = build_engine(
        &tmp,
        vec![Arc::new(FeedModule {
            frames: frames.clone(),
            guarded: true,
        })],
    );

    let dispatched = engine.respond(
        HttpRequest::new(Method::GET, "/feed").with_header("host", "feed.example"),
    );
    match dispatched {
        Dispatched::WebSocketRejected { response, close } => {
            assert_eq!(response.status, 401);
            assert_eq!(close.code, CLOSE_GOING_AWAY);
            let payload: serde_json::Value = serde_json::from_str(&close.payload).unwrap();
            assert!(payload["error"].as_str().unwrap().starts_with("unauthorized"));
        }
        _ => panic!("expected a websocket rejection"),
    }
    assert!(frames.lock().unwrap().is_empty());
}
