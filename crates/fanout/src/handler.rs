//! The fanout handler: resolve, dispatch, reduce, decorate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use tracing::Instrument;

use crate::context::FanoutContext;
use crate::correlation::{CorrelationId, CORRELATION_HEADER};
use crate::dispatch::Dispatcher;
use crate::endpoints::Endpoints;
use crate::error::Error;
use crate::policy::{FirstSuccess, Outcome, SelectionPolicy};
use crate::request::{InboundRequest, RequestFunc};
use crate::response::{self, FanoutResult, OutboundResponse, ResponseFunc};
use crate::transport::Transport;

/// Default bound on a whole fanout, from resolution to the final response.
pub const DEFAULT_FANOUT_TIMEOUT: Duration = Duration::from_secs(45);

/// Fans one inbound request out to every resolved endpoint and reduces the
/// results into one response.
pub struct Handler {
    endpoints: Arc<dyn Endpoints>,
    dispatcher: Dispatcher,
    after: Vec<Arc<dyn ResponseFunc>>,
    failure: Vec<Arc<dyn ResponseFunc>>,
    policy: Arc<dyn SelectionPolicy>,
    timeout: Duration,
}

/// Builder for [`Handler`].
pub struct HandlerBuilder {
    endpoints: Arc<dyn Endpoints>,
    transport: Arc<dyn Transport>,
    before: Vec<Arc<dyn RequestFunc>>,
    after: Vec<Arc<dyn ResponseFunc>>,
    failure: Vec<Arc<dyn ResponseFunc>>,
    policy: Arc<dyn SelectionPolicy>,
    timeout: Duration,
}

impl HandlerBuilder {
    /// Append a step to the request pipeline.
    pub fn before(mut self, step: impl RequestFunc + 'static) -> Self {
        self.before.push(Arc::new(step));
        self
    }

    /// Append a step applied to the winning result.
    pub fn after(mut self, step: impl ResponseFunc + 'static) -> Self {
        self.after.push(Arc::new(step));
        self
    }

    /// Append a step applied to the result standing for a failed fanout.
    pub fn failure(mut self, step: impl ResponseFunc + 'static) -> Self {
        self.failure.push(Arc::new(step));
        self
    }

    pub fn policy(mut self, policy: impl SelectionPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Handler {
        Handler {
            endpoints: self.endpoints,
            dispatcher: Dispatcher::new(self.transport, self.before),
            after: self.after,
            failure: self.failure,
            policy: self.policy,
            timeout: self.timeout,
        }
    }
}

impl Handler {
    pub fn builder(
        endpoints: impl Endpoints + 'static,
        transport: impl Transport + 'static,
    ) -> HandlerBuilder {
        HandlerBuilder {
            endpoints: Arc::new(endpoints),
            transport: Arc::new(transport),
            before: Vec::new(),
            after: Vec::new(),
            failure: Vec::new(),
            policy: Arc::new(FirstSuccess::new()),
            timeout: DEFAULT_FANOUT_TIMEOUT,
        }
    }

    /// Handle one inbound request under a fresh root scope.
    pub async fn handle(&self, original: InboundRequest) -> Result<OutboundResponse, Error> {
        self.handle_with(&FanoutContext::new(), original).await
    }

    /// Handle one inbound request under `parent`, e.g. a scope cancelled when
    /// the caller disconnects.
    ///
    /// Only resolution problems are returned as errors; every dispatch
    /// outcome, including total failure, becomes a response.
    pub async fn handle_with(
        &self,
        parent: &FanoutContext,
        mut original: InboundRequest,
    ) -> Result<OutboundResponse, Error> {
        let body = original.take_body();
        let correlation_id = CorrelationId::generate();
        let span = fanout_tracing::fanout_request_span!(
            correlation_id,
            original.method,
            original.url.path()
        );

        async move {
            let endpoints = match self.endpoints.new_endpoints(&original) {
                Ok(endpoints) if endpoints.is_empty() => {
                    tracing::warn!("No endpoints resolved");
                    return Err(Error::NoEndpoints);
                }
                Ok(endpoints) => endpoints,
                Err(e) => {
                    tracing::warn!(error = %e, "Endpoint resolution failed");
                    return Err(e);
                }
            };
            tracing::Span::current().record("endpoints", endpoints.len());

            let start = Instant::now();
            let ctx = parent
                .with_timeout(self.timeout)
                .with_value(correlation_id.clone());
            // Released once settled, or when the caller stops waiting.
            let _release = ctx.cancel_on_drop();

            let mut dispatch =
                self.dispatcher
                    .dispatch(&ctx, endpoints, Arc::new(original), body);
            let mut reduction = self.policy.start(dispatch.remaining());

            let outcome = loop {
                match dispatch.next().await {
                    Some(result) => {
                        if let Some(outcome) = reduction.observe(result) {
                            break outcome;
                        }
                    }
                    None => break reduction.finish(),
                }
            };

            // Settled: abandon whatever is still in flight.
            ctx.cancel();

            let response = self.write(ctx, outcome, &correlation_id);

            let latency = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("status", response.status.as_u16());
            tracing::Span::current().record("latency_ms", latency);
            tracing::info!(
                status = response.status.as_u16(),
                latency_ms = latency,
                "Fanout complete"
            );

            Ok(response)
        }
        .instrument(span)
        .await
    }

    fn write(
        &self,
        ctx: FanoutContext,
        outcome: Outcome,
        correlation_id: &CorrelationId,
    ) -> OutboundResponse {
        let mut response = match outcome {
            Outcome::Success(winner) => {
                let mut response = from_result(&winner);
                response::apply_all(&self.after, ctx, &mut response, &winner);
                response
            }
            Outcome::Failure(Some(failure)) => {
                tracing::warn!(
                    endpoint = %failure.request.url,
                    status = failure.status().as_u16(),
                    "All endpoints failed"
                );
                let mut response = from_result(&failure);
                response::apply_all(&self.failure, ctx, &mut response, &failure);
                response
            }
            Outcome::Failure(None) => {
                tracing::warn!("No endpoint produced a usable result");
                error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    "no endpoint produced a usable result",
                )
            }
        };

        response
            .header
            .set(CORRELATION_HEADER, correlation_id.as_str());
        response
    }
}

/// Status, body and content type of `result`; an error result becomes a JSON
/// error body.
fn from_result(result: &FanoutResult) -> OutboundResponse {
    match (&result.response, &result.error) {
        (Some(fanout), _) => {
            let mut response = OutboundResponse::new(fanout.status);
            response.body = fanout.body.clone();
            response.header.copy_from(&fanout.header, &["Content-Type"]);
            response
        }
        (None, Some(e)) => error_response(result.status(), &e.to_string()),
        (None, None) => error_response(result.status(), "endpoint attempt never completed"),
    }
}

fn error_response(status: StatusCode, message: &str) -> OutboundResponse {
    let mut response = OutboundResponse::new(status);
    let body = serde_json::json!({ "error": message });
    response.body = Bytes::from(body.to_string());
    response.header.set("Content-Type", "application/json");
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use http::Method;
    use url::Url;

    use super::*;
    use crate::endpoints::{EndpointsFunc, FixedEndpoints};
    use crate::header::Header;
    use crate::policy::AllSucceed;
    use crate::request::{CorrelationHeader, OriginalBody, OriginalHeaders, OutboundRequest};
    use crate::response::{response_func, FanoutHeaders, FanoutResponse};

    /// Answers by host name: "ok*" 200, "missing" 404, "broken" 500,
    /// "down" transport error, "hang" never. Records every request it sees.
    #[derive(Default)]
    struct HostTransport {
        seen: Mutex<Vec<OutboundRequest>>,
    }

    #[async_trait]
    impl Transport for HostTransport {
        async fn send(
            &self,
            _ctx: &FanoutContext,
            request: &OutboundRequest,
        ) -> Result<FanoutResponse, Error> {
            self.seen.lock().unwrap().push(request.clone());
            let host = request.url.host_str().unwrap_or_default().to_string();

            let status = match host.as_str() {
                "hang" => return std::future::pending().await,
                "down" => return Err(Error::transport("connection refused")),
                "missing" => StatusCode::NOT_FOUND,
                "broken" => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::OK,
            };

            let mut response = FanoutResponse::new(status);
            response.header.set("Content-Type", "text/plain");
            response.header.set("X-Backend", host.clone());
            response.header.set("X-Internal", "secret");
            response.body = Bytes::from(format!("from {host}"));
            Ok(response)
        }
    }

    fn fixed(hosts: &[&str]) -> FixedEndpoints {
        FixedEndpoints::new(hosts.iter().map(|h| format!("http://{h}"))).unwrap()
    }

    fn inbound() -> InboundRequest {
        let mut header = Header::new();
        header.set("X-Tenant", "acme");
        header.set("Content-Type", "application/json");
        InboundRequest::new(Method::PUT, "/api/v2/device?id=7")
            .unwrap()
            .with_header(header)
            .with_body(r#"{"on":true}"#)
    }

    #[tokio::test]
    async fn test_first_success_response() {
        let handler = Handler::builder(fixed(&["down", "ok"]), HostTransport::default())
            .before(OriginalBody::new(true))
            .before(OriginalHeaders::new(["x-tenant"]))
            .after(FanoutHeaders::new(["X-Backend"]))
            .build();

        let response = handler.handle(inbound()).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, Bytes::from_static(b"from ok"));
        assert_eq!(response.header.get("Content-Type"), Some("text/plain"));
        assert_eq!(response.header.get("X-Backend"), Some("ok"));
        assert!(response.header.get("X-Internal").is_none());
        assert!(response.header.get(CORRELATION_HEADER).is_some());
    }

    #[tokio::test]
    async fn test_outbound_requests_are_built_from_original() {
        let transport = Arc::new(HostTransport::default());
        let shared = transport.clone();
        let handler = Handler::builder(fixed(&["ok1", "ok2"]), SharedTransport(shared))
            .before(OriginalBody::new(false))
            .before(OriginalHeaders::new(["X-Tenant"]))
            .before(CorrelationHeader)
            .policy(AllSucceed::new())
            .build();

        let response = handler.handle(inbound()).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let correlation = response.header.get(CORRELATION_HEADER).unwrap();
        for request in seen.iter() {
            assert_eq!(request.method, Method::PUT);
            assert_eq!(request.url.path(), "/api/v2/device");
            assert_eq!(request.url.query(), Some("id=7"));
            assert_eq!(request.header.get("X-Tenant"), Some("acme"));
            assert_eq!(request.header.get("Content-Type"), Some("application/json"));
            assert_eq!(request.header.get(CORRELATION_HEADER), Some(correlation));
            assert_eq!(request.body.as_deref(), Some(&br#"{"on":true}"#[..]));
            assert!(request.get_body.is_none());
        }
    }

    struct SharedTransport(Arc<HostTransport>);

    #[async_trait]
    impl Transport for SharedTransport {
        async fn send(
            &self,
            ctx: &FanoutContext,
            request: &OutboundRequest,
        ) -> Result<FanoutResponse, Error> {
            self.0.send(ctx, request).await
        }
    }

    #[tokio::test]
    async fn test_all_failed_uses_worst_result_and_failure_pipeline() {
        let handler = Handler::builder(fixed(&["missing", "broken"]), HostTransport::default())
            .after(response_func(|ctx, response, _result| {
                response.header.set("X-After", "ran");
                ctx
            }))
            .failure(FanoutHeaders::new(["x-backend"]))
            .build();

        let response = handler.handle(inbound()).await.unwrap();

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body, Bytes::from_static(b"from broken"));
        assert_eq!(response.header.get("X-Backend"), Some("broken"));
        assert!(response.header.get("X-After").is_none());
    }

    #[tokio::test]
    async fn test_transport_failures_become_service_unavailable() {
        let handler = Handler::builder(fixed(&["down", "down"]), HostTransport::default()).build();

        let response = handler.handle(inbound()).await.unwrap();

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.header.get("Content-Type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_gateway_timeout() {
        let handler = Handler::builder(fixed(&["hang", "missing"]), HostTransport::default())
            .timeout(Duration::from_millis(50))
            .build();

        let response = handler.handle(inbound()).await.unwrap();

        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_winner_does_not_wait_for_hanging_endpoint() {
        let handler = Handler::builder(fixed(&["hang", "ok"]), HostTransport::default())
            .timeout(Duration::from_secs(30))
            .build();

        let response = tokio::time::timeout(Duration::from_secs(5), handler.handle(inbound()))
            .await
            .expect("winner settles the fanout")
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_resolution_errors_are_returned() {
        let failing = EndpointsFunc::new(|_: &InboundRequest| -> Result<Vec<Url>, Error> {
            Err(Error::resolution("no route"))
        });
        let transport = Arc::new(HostTransport::default());
        let handler = Handler::builder(failing, SharedTransport(transport.clone())).build();

        let err = handler.handle(inbound()).await.unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
        assert!(transport.seen.lock().unwrap().is_empty());

        let handler = Handler::builder(fixed(&[]), HostTransport::default()).build();
        assert!(matches!(
            handler.handle(inbound()).await.unwrap_err(),
            Error::NoEndpoints
        ));
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_attempts() {
        let handler = Handler::builder(fixed(&["hang"]), HostTransport::default()).build();
        let parent = FanoutContext::new();
        let cancel = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let response = handler.handle_with(&parent, inbound()).await.unwrap();
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"], "fanout canceled");
    }
}
