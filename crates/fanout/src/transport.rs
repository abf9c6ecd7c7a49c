//! The transport capability and its reqwest implementation.
//!
//! `ReqwestTransport` follows redirects itself instead of letting reqwest do
//! it, so that body replay goes through the request's [`BodyFactory`]
//! (installed by `OriginalBody(true)`) and excluded headers are stripped.
//!
//! [`BodyFactory`]: crate::request::BodyFactory

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::context::FanoutContext;
use crate::error::Error;
use crate::header::Header;
use crate::request::OutboundRequest;
use crate::response::FanoutResponse;

/// Headers that should NOT be forwarded (hop-by-hop headers), plus
/// content-length which reqwest derives from the actual body.
pub(crate) const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "content-length",
];

/// Credentials dropped when a redirect leaves the original host.
const CROSS_HOST_STRIPPED: &[&str] = &["authorization", "www-authenticate", "cookie", "cookie2"];

const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Sends one outbound request and returns the fully-read response.
///
/// Implementations should return promptly once `ctx` is finished; the
/// dispatch engine also abandons the call at that point.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        ctx: &FanoutContext,
        request: &OutboundRequest,
    ) -> Result<FanoutResponse, Error>;
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_redirects: usize,
    redirect_exclude_headers: Vec<String>,
}

impl ReqwestTransport {
    /// Wrap an existing client. The client must be built with
    /// `redirect::Policy::none()`; redirects are handled here.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            redirect_exclude_headers: Vec::new(),
        }
    }

    /// Build a client with the given per-call timeout and no automatic
    /// redirect handling.
    pub fn with_timeout(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self::new(client))
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn redirect_exclude_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.redirect_exclude_headers = names.into_iter().map(Into::into).collect();
        self
    }
}

/// The request state carried across redirect hops.
struct Hop {
    method: Method,
    url: Url,
    header: Header,
    body: Option<Bytes>,
}

impl Hop {
    fn wire_headers(&self) -> HeaderMap {
        let mut map = self.header.to_header_map();
        for name in HOP_BY_HOP_HEADERS {
            map.remove(*name);
        }
        map
    }
}

impl ReqwestTransport {
    /// Decide the next hop for a redirect response, or `None` when the
    /// redirect must be handed back to the caller as-is.
    fn next_hop(
        &self,
        current: &Hop,
        status: StatusCode,
        headers: &HeaderMap,
        request: &OutboundRequest,
    ) -> Option<Hop> {
        let location = headers.get(LOCATION)?.to_str().ok()?;
        let url = current.url.join(location).ok()?;

        let (method, body, mut header) = match status {
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
                let method = if current.method == Method::HEAD {
                    Method::HEAD
                } else {
                    Method::GET
                };
                let mut header = current.header.clone();
                header.remove("Content-Type");
                (method, None, header)
            }
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => {
                let body = match (&current.body, &request.get_body) {
                    (None, _) => None,
                    (Some(_), Some(get_body)) => Some(get_body()),
                    (Some(_), None) => {
                        tracing::debug!(
                            location = %url,
                            "Redirect requires resending the body but no replay is installed"
                        );
                        return None;
                    }
                };
                (current.method.clone(), body, current.header.clone())
            }
            _ => return None,
        };

        for name in &self.redirect_exclude_headers {
            header.remove(name);
        }
        if url.host_str() != current.url.host_str() {
            for name in CROSS_HOST_STRIPPED {
                header.remove(name);
            }
        }

        Some(Hop {
            method,
            url,
            header,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        ctx: &FanoutContext,
        request: &OutboundRequest,
    ) -> Result<FanoutResponse, Error> {
        let mut hop = Hop {
            method: request.method.clone(),
            url: request.url.clone(),
            header: request.header.clone(),
            body: request.body.clone(),
        };
        let mut redirects = 0;

        loop {
            let mut req_builder = self
                .client
                .request(hop.method.clone(), hop.url.clone())
                .headers(hop.wire_headers());
            if let Some(body) = &hop.body {
                req_builder = req_builder.body(body.clone());
            }

            let upstream = ctx
                .run(async move { req_builder.send().await.map_err(Error::from) })
                .await?;
            let status = upstream.status();

            if status.is_redirection() && redirects < self.max_redirects {
                if let Some(next) = self.next_hop(&hop, status, upstream.headers(), request) {
                    tracing::debug!(
                        status = status.as_u16(),
                        from = %hop.url,
                        to = %next.url,
                        "Following redirect"
                    );
                    hop = next;
                    redirects += 1;
                    continue;
                }
            }

            let header = Header::from(upstream.headers());
            let body = ctx
                .run(async move { upstream.bytes().await.map_err(Error::from) })
                .await?;

            return Ok(FanoutResponse {
                status,
                header,
                body,
            });
        }
    }
}
