//! Inbound/outbound request types and the request decorator pipeline.
//!
//! Every outbound request starts as a structural clone of the inbound one
//! (method kept, URL pointed at one endpoint, headers empty, no body). The
//! configured [`RequestFunc`]s then fill it in, in order, threading a
//! [`FanoutContext`] from one step to the next.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::context::FanoutContext;
use crate::correlation::{CorrelationId, CORRELATION_HEADER};
use crate::error::Error;
use crate::header::Header;

const CONTENT_TYPE: &str = "Content-Type";

/// Origin prepended to origin-form request targets (`/path?query`).
const INBOUND_ORIGIN: &str = "http://localhost";

/// The request received from the caller.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub url: Url,
    pub header: Header,
    body: Option<Bytes>,
}

impl InboundRequest {
    /// Build a request from a method and a request target, which may be an
    /// absolute URL or an origin-form path such as `/api?x=1#frag`.
    ///
    /// An origin-form target is taken verbatim as path, query and fragment;
    /// a leading `//` stays part of the path.
    pub fn new(method: Method, target: &str) -> Result<Self, Error> {
        let parsed = if target.starts_with('/') {
            Url::parse(&format!("{INBOUND_ORIGIN}{target}"))
        } else {
            Url::parse(target)
        };
        let url = parsed.map_err(|e| Error::InvalidRequest(format!("{target:?}: {e}")))?;

        Ok(Self {
            method,
            url,
            header: Header::new(),
            body: None,
        })
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Take the body. Returns `None` on every call after the first.
    pub fn take_body(&mut self) -> Option<Bytes> {
        self.body.take()
    }
}

/// Produces a fresh copy of an outbound body, used to resend it on redirects.
pub type BodyFactory = Arc<dyn Fn() -> Bytes + Send + Sync>;

/// One request headed to one endpoint.
#[derive(Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub header: Header,
    pub content_length: u64,
    pub body: Option<Bytes>,
    pub get_body: Option<BodyFactory>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            header: Header::new(),
            content_length: 0,
            body: None,
            get_body: None,
        }
    }

    /// Clone the inbound request structurally, targeting `endpoint`.
    pub fn from_original(original: &InboundRequest, endpoint: Url) -> Self {
        Self::new(original.method.clone(), endpoint)
    }
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("header", &self.header)
            .field("content_length", &self.content_length)
            .field("body", &self.body.as_ref().map(Bytes::len))
            .field("get_body", &self.get_body.is_some())
            .finish()
    }
}

/// A step of the request pipeline.
///
/// Implementations mutate `fanout` in place and return the context handed
/// to the next step (and finally to the transport). They never fail: a step
/// that must stop the attempt cancels the context instead.
pub trait RequestFunc: Send + Sync {
    fn apply(
        &self,
        ctx: FanoutContext,
        original: &InboundRequest,
        fanout: &mut OutboundRequest,
        body: Option<&Bytes>,
    ) -> FanoutContext;
}

impl<F> RequestFunc for F
where
    F: Fn(FanoutContext, &InboundRequest, &mut OutboundRequest, Option<&Bytes>) -> FanoutContext
        + Send
        + Sync,
{
    fn apply(
        &self,
        ctx: FanoutContext,
        original: &InboundRequest,
        fanout: &mut OutboundRequest,
        body: Option<&Bytes>,
    ) -> FanoutContext {
        self(ctx, original, fanout, body)
    }
}

/// Pin a closure to the [`RequestFunc`] signature so its argument types are
/// inferred.
pub fn request_func<F>(f: F) -> F
where
    F: Fn(FanoutContext, &InboundRequest, &mut OutboundRequest, Option<&Bytes>) -> FanoutContext
        + Send
        + Sync
        + 'static,
{
    f
}

/// Run `pipeline` in order against one outbound request.
pub fn apply_all(
    pipeline: &[Arc<dyn RequestFunc>],
    mut ctx: FanoutContext,
    original: &InboundRequest,
    fanout: &mut OutboundRequest,
    body: Option<&Bytes>,
) -> FanoutContext {
    for step in pipeline {
        ctx = step.apply(ctx, original, fanout, body);
    }
    ctx
}

/// Attach the already-read inbound body to the outbound request.
///
/// The body buffer is shared by every outbound request; it is only ever
/// cloned, never drained.
#[derive(Debug, Clone, Copy)]
pub struct OriginalBody {
    follow_redirects: bool,
}

impl OriginalBody {
    /// With `follow_redirects`, a [`BodyFactory`] is installed so the
    /// transport can resend the body when it follows a redirect.
    pub fn new(follow_redirects: bool) -> Self {
        Self { follow_redirects }
    }
}

impl RequestFunc for OriginalBody {
    fn apply(
        &self,
        ctx: FanoutContext,
        original: &InboundRequest,
        fanout: &mut OutboundRequest,
        body: Option<&Bytes>,
    ) -> FanoutContext {
        let Some(body) = body.filter(|b| !b.is_empty()) else {
            fanout.header.remove(CONTENT_TYPE);
            fanout.content_length = 0;
            fanout.body = None;
            fanout.get_body = None;
            return ctx;
        };

        match original.header.get_all(CONTENT_TYPE) {
            [] => {
                fanout.header.remove(CONTENT_TYPE);
            }
            values => fanout.header.set_all(CONTENT_TYPE, values.to_vec()),
        }

        fanout.content_length = body.len() as u64;
        fanout.body = Some(body.clone());
        fanout.get_body = if self.follow_redirects {
            let replay = body.clone();
            Some(Arc::new(move || replay.clone()))
        } else {
            None
        };

        ctx
    }
}

/// Copy the named inbound headers onto the outbound request.
#[derive(Debug, Clone, Default)]
pub struct OriginalHeaders {
    names: Vec<String>,
}

impl OriginalHeaders {
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

impl RequestFunc for OriginalHeaders {
    fn apply(
        &self,
        ctx: FanoutContext,
        original: &InboundRequest,
        fanout: &mut OutboundRequest,
        _body: Option<&Bytes>,
    ) -> FanoutContext {
        fanout.header.copy_from(&original.header, self.names.as_slice());
        ctx
    }
}

/// Set one static header on every outbound request.
#[derive(Debug, Clone)]
pub struct FixedHeader {
    name: String,
    value: String,
}

impl FixedHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl RequestFunc for FixedHeader {
    fn apply(
        &self,
        ctx: FanoutContext,
        _original: &InboundRequest,
        fanout: &mut OutboundRequest,
        _body: Option<&Bytes>,
    ) -> FanoutContext {
        fanout.header.set(&self.name, self.value.clone());
        ctx
    }
}

/// Stamp the context's [`CorrelationId`] onto the outbound request.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationHeader;

impl RequestFunc for CorrelationHeader {
    fn apply(
        &self,
        ctx: FanoutContext,
        _original: &InboundRequest,
        fanout: &mut OutboundRequest,
        _body: Option<&Bytes>,
    ) -> FanoutContext {
        if let Some(id) = ctx.value::<CorrelationId>() {
            fanout.header.set(CORRELATION_HEADER, id.as_str());
        }
        ctx
    }
}
