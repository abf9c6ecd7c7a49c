//! Per-endpoint results and the response decorator pipeline.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;

use crate::context::FanoutContext;
use crate::error::Error;
use crate::header::Header;
use crate::request::OutboundRequest;

/// A backend response, body fully read.
#[derive(Debug, Clone)]
pub struct FanoutResponse {
    pub status: StatusCode,
    pub header: Header,
    pub body: Bytes,
}

impl FanoutResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            header: Header::new(),
            body: Bytes::new(),
        }
    }
}

/// The outcome of one dispatch attempt. Exactly one of `response` and
/// `error` is set.
#[derive(Debug)]
pub struct FanoutResult {
    pub request: OutboundRequest,
    pub response: Option<FanoutResponse>,
    pub error: Option<Error>,
}

impl FanoutResult {
    pub fn ok(request: OutboundRequest, response: FanoutResponse) -> Self {
        Self {
            request,
            response: Some(response),
            error: None,
        }
    }

    pub fn err(request: OutboundRequest, error: Error) -> Self {
        Self {
            request,
            response: None,
            error: Some(error),
        }
    }

    /// The status this result stands for: the backend status when a response
    /// arrived, 504 for cancellation, 503 for any other dispatch error.
    pub fn status(&self) -> StatusCode {
        match (&self.response, &self.error) {
            (Some(response), _) => response.status,
            (None, Some(e)) if e.is_cancellation() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// True when a response arrived with a status below 400.
    pub fn is_success(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(|r| r.status.as_u16() < 400)
    }
}

/// The response being assembled for the caller.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub header: Header,
    pub body: Bytes,
}

impl OutboundResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            header: Header::new(),
            body: Bytes::new(),
        }
    }
}

impl Default for OutboundResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

/// A step of the response pipeline, applied to the result chosen by the
/// selection policy.
pub trait ResponseFunc: Send + Sync {
    fn apply(
        &self,
        ctx: FanoutContext,
        response: &mut OutboundResponse,
        result: &FanoutResult,
    ) -> FanoutContext;
}

impl<F> ResponseFunc for F
where
    F: Fn(FanoutContext, &mut OutboundResponse, &FanoutResult) -> FanoutContext + Send + Sync,
{
    fn apply(
        &self,
        ctx: FanoutContext,
        response: &mut OutboundResponse,
        result: &FanoutResult,
    ) -> FanoutContext {
        self(ctx, response, result)
    }
}

/// Pin a closure to the [`ResponseFunc`] signature so its argument types are
/// inferred.
pub fn response_func<F>(f: F) -> F
where
    F: Fn(FanoutContext, &mut OutboundResponse, &FanoutResult) -> FanoutContext
        + Send
        + Sync
        + 'static,
{
    f
}

/// Run `pipeline` in order against the outbound response.
pub fn apply_all(
    pipeline: &[Arc<dyn ResponseFunc>],
    mut ctx: FanoutContext,
    response: &mut OutboundResponse,
    result: &FanoutResult,
) -> FanoutContext {
    for step in pipeline {
        ctx = step.apply(ctx, response, result);
    }
    ctx
}

/// Copy the named headers of a backend response onto the outbound response.
#[derive(Debug, Clone, Default)]
pub struct FanoutHeaders {
    names: Vec<String>,
}

impl FanoutHeaders {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ResponseFunc for FanoutHeaders {
    fn apply(
        &self,
        ctx: FanoutContext,
        response: &mut OutboundResponse,
        result: &FanoutResult,
    ) -> FanoutContext {
        if let Some(fanout) = &result.response {
            response.header.copy_from(&fanout.header, self.names.as_slice());
        }
        ctx
    }
}
