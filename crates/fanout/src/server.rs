//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use crate::config::{FanoutConfig, PolicyKind};
use crate::endpoints::FixedEndpoints;
use crate::error::Error;
use crate::handler::Handler;
use crate::header::Header;
use crate::policy::{AllSucceed, FirstSuccess};
use crate::request::{CorrelationHeader, FixedHeader, InboundRequest, OriginalBody, OriginalHeaders};
use crate::response::{FanoutHeaders, OutboundResponse};
use crate::transport::{ReqwestTransport, HOP_BY_HOP_HEADERS};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: FanoutConfig,
    pub handler: Arc<Handler>,
    pub semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: FanoutConfig, handler: Handler) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.server.concurrency_limit));
        Self {
            config,
            handler: Arc::new(handler),
            semaphore,
        }
    }
}

/// Wire the reqwest transport and the configured pipelines into a handler.
pub fn build_handler(config: &FanoutConfig) -> anyhow::Result<Handler> {
    let endpoints = FixedEndpoints::new(&config.fanout.endpoints)?;
    anyhow::ensure!(!endpoints.is_empty(), "no fanout endpoints configured");

    let transport = ReqwestTransport::with_timeout(Duration::from_millis(config.client.timeout_ms))?
        .max_redirects(config.client.max_redirects)
        .redirect_exclude_headers(config.client.redirect_exclude_headers.clone());

    let mut builder = Handler::builder(endpoints, transport)
        .before(OriginalBody::new(config.fanout.follow_redirects))
        .before(OriginalHeaders::new(config.fanout.original_headers.clone()))
        .before(CorrelationHeader)
        .after(FanoutHeaders::new(config.fanout.fanout_headers.clone()))
        .failure(FanoutHeaders::new(config.fanout.fanout_headers.clone()))
        .timeout(Duration::from_millis(config.fanout.timeout_ms));

    if let Some(authorization) = &config.fanout.authorization {
        builder = builder.before(FixedHeader::new("Authorization", authorization.clone()));
    }

    builder = match config.fanout.policy {
        PolicyKind::FirstSuccess => builder.policy(FirstSuccess::new()),
        PolicyKind::AllSucceed => builder.policy(AllSucceed::new()),
    };

    Ok(builder.build())
}

/// The router: `/health` plus a catch-all that fans every other request out.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .fallback(handle_fanout)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "fanout listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("fanout shut down gracefully");
    Ok(())
}

/// Catch-all handler: read the inbound request and fan it out.
///
/// Dropping this future (client disconnect) cancels every in-flight attempt.
async fn handle_fanout(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let _permit = match state.semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!("Concurrency limit reached, rejecting request");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "too many concurrent requests");
        }
    };

    let max_body_bytes = state.config.server.max_body_bytes;
    let declared_length = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_length.is_some_and(|len| len > max_body_bytes) {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
    }

    let method = request.method().clone();
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let header = Header::from(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let mut inbound = match InboundRequest::new(method, &target) {
        Ok(inbound) => inbound.with_header(header),
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if !body.is_empty() {
        inbound = inbound.with_body(body);
    }

    match state.handler.handle(inbound).await {
        Ok(response) => into_response(response),
        Err(e @ (Error::Resolution(_) | Error::NoEndpoints)) => {
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Write the reduced response, minus hop-by-hop headers.
fn into_response(response: OutboundResponse) -> Response {
    let mut headers = response.header.to_header_map();
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    (response.status, headers, response.body).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
