#![allow(clippy::unwrap_used, clippy::expect_used)]

use apphive::app::{App, Endpoint, Invocation, OkInvocation};
use apphive::config::AppConfigSet;
use apphive::context::RequestContext;
use apphive::error::ErrorKind;
use apphive::middleware::MiddlewareChain;
use apphive::router::{get_param, CachedRoute, Route, Router, CATCH_ALL_PARAM};
use apphive::server::Response;
use http::Method;
use serde_json::json;
use std::sync::Arc;

fn chain() -> Arc<MiddlewareChain> {
    Arc::new(MiddlewareChain::new(
        Vec::new(),
        Invocation::Handler(Arc::new(OkInvocation)),
    ))
}

fn endpoint(name: &str) -> Arc<Endpoint> {
    Arc::new(Endpoint::new(name, Invocation::Handler(Arc::new(OkInvocation))))
}

fn cached(name: &str) -> Arc<CachedRoute> {
    Arc::new(CachedRoute {
        endpoint: endpoint(name),
        chain: chain(),
        shadow: false,
    })
}

fn insert(router: &mut Router, method: Method, path: &str, name: &str) {
    router
        .insert(&Route::parse(method, path).unwrap(), cached(name))
        .unwrap();
}

#[test]
fn literal_and_param_matching() {
    let mut router = Router::new();
    insert(&mut router, Method::GET, "/users", "list_users");
    insert(&mut router, Method::GET, "/users/:id", "get_user");
    insert(&mut router, Method::GET, "/users/:id/orders", "user_orders");

    let hit = router.find(&Method::GET, "/users").unwrap();
    assert_eq!(hit.cached.endpoint.name, "list_users");

    let hit = router.find(&Method::GET, "/users/42").unwrap();
    assert_eq!(hit.cached.endpoint.name, "get_user");
    assert_eq!(get_param(&hit.params, "id"), Some("42"));

    let hit = router.find(&Method::GET, "/users/42/orders").unwrap();
    assert_eq!(hit.cached.endpoint.name, "user_orders");

    assert!(router.find(&Method::GET, "/users/42/nope").is_none());
    assert!(router.find(&Method::POST, "/users").is_none());
}

#[test]
fn literal_wins_over_param_with_backtracking() {
    let mut router = Router::new();
    insert(&mut router, Method::GET, "/files/special", "special");
    insert(&mut router, Method::GET, "/files/:name", "by_name");
    insert(&mut router, Method::GET, "/files/special/meta", "special_meta");
    insert(&mut router, Method::GET, "/files/:name/raw", "raw_by_name");

    assert_eq!(
        router.find(&Method::GET, "/files/special").unwrap().cached.endpoint.name,
        "special"
    );
    assert_eq!(
        router.find(&Method::GET, "/files/other").unwrap().cached.endpoint.name,
        "by_name"
    );
    // literal branch has no /raw child, so the param branch must take over
    let hit = router.find(&Method::GET, "/files/special/raw").unwrap();
    assert_eq!(hit.cached.endpoint.name, "raw_by_name");
    assert_eq!(get_param(&hit.params, "name"), Some("special"));
}

#[test]
fn different_param_names_at_the_same_depth() {
    let mut router = Router::new();
    insert(&mut router, Method::GET, "/v/:user_id/posts", "posts");
    insert(&mut router, Method::GET, "/v/:team_id/members", "members");

    let hit = router.find(&Method::GET, "/v/9/posts").unwrap();
    assert_eq!(get_param(&hit.params, "user_id"), Some("9"));
    assert_eq!(get_param(&hit.params, "team_id"), None);

    let hit = router.find(&Method::GET, "/v/7/members").unwrap();
    assert_eq!(get_param(&hit.params, "team_id"), Some("7"));
}

#[test]
fn catch_all_captures_the_remainder() {
    let mut router = Router::new();
    insert(&mut router, Method::GET, "/static/**", "static_files");

    let hit = router.find(&Method::GET, "/static/css/site.css").unwrap();
    assert_eq!(hit.cached.endpoint.name, "static_files");
    assert_eq!(get_param(&hit.params, CATCH_ALL_PARAM), Some("css/site.css"));

    let hit = router.find(&Method::GET, "/static").unwrap();
    assert_eq!(get_param(&hit.params, CATCH_ALL_PARAM), Some(""));
}

#[test]
fn duplicate_terminal_is_rejected() {
    let mut router = Router::new();
    insert(&mut router, Method::GET, "/dup", "first");
    let err = router
        .insert(&Route::parse(Method::GET, "/dup").unwrap(), cached("second"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // a different method on the same path is fine
    insert(&mut router, Method::POST, "/dup", "third");
}

#[test]
fn head_falls_back_to_get_with_discarded_body() {
    let mut router = Router::new();
    insert(&mut router, Method::GET, "/things/:id", "get_thing");

    let hit = router.find_with_fallback(&Method::HEAD, "/things/5").unwrap();
    assert!(hit.discard_body);
    assert_eq!(hit.cached.endpoint.name, "get_thing");

    let hit = router.find_with_fallback(&Method::GET, "/things/5").unwrap();
    assert!(!hit.discard_body);
}

#[test]
fn duplicate_endpoint_name_is_forbidden() {
    let set = AppConfigSet::from_value(json!({ "app_id": "a1" })).unwrap();
    let mut app = App::new(Arc::new(set));
    app.register_endpoint(
        Endpoint::handler("same", |_ctx: &mut RequestContext| Ok(Response::ok()))
            .route(Method::GET, "/x")
            .unwrap(),
    )
    .unwrap();
    let err = app
        .register_endpoint(
            Endpoint::handler("same", |_ctx: &mut RequestContext| Ok(Response::ok()))
                .route(Method::GET, "/y")
                .unwrap(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[test]
fn prepare_synthesizes_head_shadows_for_literal_gets_only() {
    let set = AppConfigSet::from_value(json!({ "app_id": "a1" })).unwrap();
    let mut app = App::new(Arc::new(set));
    app.register_endpoint(
        Endpoint::handler("lit", |_ctx: &mut RequestContext| Ok(Response::ok()))
            .route(Method::GET, "/plain/path")
            .unwrap(),
    )
    .unwrap();
    app.register_endpoint(
        Endpoint::handler("dyn", |_ctx: &mut RequestContext| Ok(Response::ok()))
            .route(Method::GET, "/things/:id")
            .unwrap(),
    )
    .unwrap();
    app.prepare().unwrap();

    let router = app.router().unwrap();
    let hit = router.find(&Method::HEAD, "/plain/path").unwrap();
    assert!(hit.cached.shadow);

    // parameterized GET gets no HEAD terminal, only the runtime fallback
    assert!(router.find(&Method::HEAD, "/things/3").is_none());
    assert!(router
        .find_with_fallback(&Method::HEAD, "/things/3")
        .unwrap()
        .discard_body);
}
