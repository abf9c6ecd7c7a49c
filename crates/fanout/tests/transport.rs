//! ReqwestTransport against real axum backends: redirects, body replay and
//! cancellation.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::http::header::LOCATION;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::any;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use url::Url;

use fanout::{
    Error, FanoutContext, Header, InboundRequest, OriginalBody, OriginalHeaders, OutboundRequest,
    RequestFunc, ReqwestTransport, Transport,
};

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    Json(json!({
        "method": method.as_str(),
        "body": String::from_utf8_lossy(&body),
        "content_type": header("content-type"),
        "upstream_token": header("x-upstream-token"),
        "tenant": header("x-tenant"),
    }))
}

async fn spawn_backend() -> SocketAddr {
    let app = Router::new()
        .route("/echo", any(echo))
        .route(
            "/temporary",
            any(|| async { (StatusCode::TEMPORARY_REDIRECT, [(LOCATION, "/echo")]) }),
        )
        .route(
            "/found",
            any(|| async { (StatusCode::FOUND, [(LOCATION, "/echo")]) }),
        )
        .route(
            "/loop",
            any(|| async { (StatusCode::FOUND, [(LOCATION, "/loop")]) }),
        )
        .route(
            "/slow",
            any(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "late"
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

/// Build the outbound request the way the handler would: method from the
/// inbound request, body and headers attached by the pipeline.
fn outbound(addr: SocketAddr, path: &str, follow_redirects: bool) -> OutboundRequest {
    let mut header = Header::new();
    header.set("Content-Type", "text/plain");
    header.set("X-Upstream-Token", "abc");
    header.set("X-Tenant", "acme");
    let original = InboundRequest::new(Method::POST, path)
        .unwrap()
        .with_header(header);
    let body = Bytes::from_static(b"hello backend");

    let mut request =
        OutboundRequest::from_original(&original, Url::parse(&format!("http://{addr}{path}")).unwrap());
    let ctx = FanoutContext::new();
    let ctx = OriginalBody::new(follow_redirects).apply(ctx, &original, &mut request, Some(&body));
    OriginalHeaders::new(["X-Upstream-Token", "X-Tenant"]).apply(ctx, &original, &mut request, Some(&body));
    request
}

fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_plain_request() {
    let addr = spawn_backend().await;
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(5)).unwrap();

    let response = transport
        .send(&FanoutContext::new(), &outbound(addr, "/echo", true))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header.get("Content-Type"), Some("application/json"));
    let body = json_body(&response.body);
    assert_eq!(body["method"], "POST");
    assert_eq!(body["body"], "hello backend");
    assert_eq!(body["content_type"], "text/plain");
    assert_eq!(body["tenant"], "acme");
}

#[tokio::test]
async fn test_temporary_redirect_replays_body() {
    let addr = spawn_backend().await;
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(5)).unwrap();

    let response = transport
        .send(&FanoutContext::new(), &outbound(addr, "/temporary", true))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    let body = json_body(&response.body);
    assert_eq!(body["method"], "POST");
    assert_eq!(body["body"], "hello backend");
    assert_eq!(body["content_type"], "text/plain");
}

#[tokio::test]
async fn test_temporary_redirect_without_replay_is_returned() {
    let addr = spawn_backend().await;
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(5)).unwrap();

    let response = transport
        .send(&FanoutContext::new(), &outbound(addr, "/temporary", false))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.header.get("Location"), Some("/echo"));
}

#[tokio::test]
async fn test_found_switches_to_get_and_strips_excluded_headers() {
    let addr = spawn_backend().await;
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(5))
        .unwrap()
        .redirect_exclude_headers(["X-Upstream-Token"]);

    let response = transport
        .send(&FanoutContext::new(), &outbound(addr, "/found", true))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    let body = json_body(&response.body);
    assert_eq!(body["method"], "GET");
    assert_eq!(body["body"], "");
    assert_eq!(body["content_type"], Value::Null);
    assert_eq!(body["upstream_token"], Value::Null);
    assert_eq!(body["tenant"], "acme");
}

#[tokio::test]
async fn test_redirect_limit_returns_last_redirect() {
    let addr = spawn_backend().await;
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(5))
        .unwrap()
        .max_redirects(3);

    let response = transport
        .send(&FanoutContext::new(), &outbound(addr, "/loop", true))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::FOUND);
}

#[tokio::test]
async fn test_deadline_abandons_slow_backend() {
    let addr = spawn_backend().await;
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(30)).unwrap();
    let ctx = FanoutContext::new().with_timeout(Duration::from_millis(100));

    let err = transport
        .send(&ctx, &outbound(addr, "/slow", true))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded));
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = ReqwestTransport::with_timeout(Duration::from_secs(5)).unwrap();
    let err = transport
        .send(&FanoutContext::new(), &outbound(addr, "/echo", true))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
}
