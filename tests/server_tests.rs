#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use apphive::app::{App, AppModule, Endpoint};
use apphive::config::AppConfigSet;
use apphive::context::RequestContext;
use apphive::error::Result;
use apphive::server::Response;
use common::{build_engine_with, engine_config_on_port, write_app_config};
use http::Method;
use serde_json::json;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `GET /ping` answers immediately; `GET /slow` parks the coroutine for a
/// while before answering, to keep a request in flight across `stop()`.
struct ServeModule;

impl AppModule for ServeModule {
    fn name(&self) -> &str {
        "serve"
    }

    fn configure(&self, app: &mut App, _set: &AppConfigSet) -> Result<()> {
        app.register_endpoint(
            Endpoint::handler("ping", |_ctx: &mut RequestContext| {
                Ok(Response::text(200, "pong"))
            })
            .route(Method::GET, "/ping")?,
        )?;
        app.register_endpoint(
            Endpoint::handler("slow", |_ctx: &mut RequestContext| {
                may::coroutine::sleep(Duration::from_millis(300));
                Ok(Response::text(200, "done"))
            })
            .route(Method::GET, "/slow")?,
        )
    }
}

fn app_doc() -> serde_json::Value {
    json!({ "app_id": "srv", "hosts": ["srv.example"] })
}

/// Send one raw request and read until `marker` shows up in the response
/// (or the read times out).
fn raw_request(addr: std::net::SocketAddr, path: &str, marker: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();
    write!(
        stream,
        "GET {path} HTTP/1.1\r\nHost: srv.example\r\nConnection: close\r\n\r\n"
    )
    .unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if String::from_utf8_lossy(&buf).contains(marker) {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[test]
fn serve_answers_and_stop_closes_the_port() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "srv", &app_doc());
    let engine = build_engine_with(
        engine_config_on_port(tmp.path(), 18472),
        vec![Arc::new(ServeModule)],
    );

    let handle = engine.serve().unwrap();
    handle.wait_ready().unwrap();
    let addr = handle.addr();

    let response = raw_request(addr, "/ping", "pong");
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("pong"));
    assert_eq!(handle.in_flight(), 0);

    handle.stop();

    // the listener socket must be gone shortly after stop returns
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        if TcpStream::connect(addr).is_err() {
            break;
        }
        assert!(Instant::now() < deadline, "port still accepting after stop");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn stop_drains_requests_in_flight() {
    let tmp = tempfile::tempdir().unwrap();
    write_app_config(tmp.path(), "srv", &app_doc());
    let engine = build_engine_with(
        engine_config_on_port(tmp.path(), 18473),
        vec![Arc::new(ServeModule)],
    );

    let handle = engine.serve().unwrap();
    handle.wait_ready().unwrap();
    let addr = handle.addr();

    let (tx, rx) = std::sync::mpsc::channel();
    let worker = std::thread::spawn(move || {
        let response = raw_request(addr, "/slow", "done");
        let _ = tx.send(response);
    });

    // give the request time to enter the engine, then shut down; the
    // configured shutdown timeout (5s) must let it finish
    std::thread::sleep(Duration::from_millis(120));
    handle.stop();

    let response = rx
        .recv_timeout(Duration::from_secs(3))
        .expect("in-flight request was cut off by stop()");
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains("done"));
    worker.join().unwrap();
}
