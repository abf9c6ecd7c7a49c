//! Concurrent dispatch of one inbound request to every resolved endpoint.
//!
//! Each endpoint gets its own tokio task. A task builds its outbound request,
//! runs the request pipeline, calls the transport inside the shared scope and
//! sends exactly one [`FanoutResult`] back over a channel, so results are
//! observed in completion order. A task never outlives the scope: once it is
//! cancelled or past its deadline, in-flight calls end with a cancellation
//! error instead of hanging.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::Instrument;
use url::Url;

use crate::context::FanoutContext;
use crate::correlation::CorrelationId;
use crate::request::{self, InboundRequest, OutboundRequest, RequestFunc};
use crate::response::FanoutResult;
use crate::transport::Transport;

/// Builds and sends the outbound requests of a fanout.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    before: Arc<[Arc<dyn RequestFunc>]>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, before: Vec<Arc<dyn RequestFunc>>) -> Self {
        Self {
            transport,
            before: before.into(),
        }
    }

    /// Start one attempt per endpoint. All attempts run concurrently under
    /// `ctx`; each gets a child scope so a request step cancelling its own
    /// context stops only that attempt.
    pub fn dispatch(
        &self,
        ctx: &FanoutContext,
        endpoints: Vec<Url>,
        original: Arc<InboundRequest>,
        body: Option<Bytes>,
    ) -> Dispatch {
        let expected = endpoints.len();
        let (tx, rx) = mpsc::channel(expected.max(1));

        for endpoint in endpoints {
            let tx = tx.clone();
            let attempt = Attempt {
                ctx: ctx.with_cancel(),
                transport: self.transport.clone(),
                before: self.before.clone(),
                original: original.clone(),
                body: body.clone(),
            };

            tokio::spawn(async move {
                let result = attempt.run(endpoint).await;
                // The reducer may already have settled and dropped the receiver.
                let _ = tx.send(result).await;
            }
            .in_current_span());
        }

        Dispatch {
            rx,
            remaining: expected,
        }
    }
}

struct Attempt {
    ctx: FanoutContext,
    transport: Arc<dyn Transport>,
    before: Arc<[Arc<dyn RequestFunc>]>,
    original: Arc<InboundRequest>,
    body: Option<Bytes>,
}

impl Attempt {
    async fn run(self, endpoint: Url) -> FanoutResult {
        let mut fanout = OutboundRequest::from_original(&self.original, endpoint);
        let ctx = request::apply_all(
            &self.before,
            self.ctx,
            &self.original,
            &mut fanout,
            self.body.as_ref(),
        );

        let correlation_id = ctx
            .value::<CorrelationId>()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let span = fanout_tracing::endpoint_span!(correlation_id, fanout.url);
        let transport = self.transport;

        async move {
            let start = Instant::now();
            let outcome = ctx.run(transport.send(&ctx, &fanout)).await;

            let latency = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("latency_ms", latency);

            match outcome {
                Ok(response) => {
                    tracing::Span::current().record("status", response.status.as_u16());
                    tracing::debug!(
                        status = response.status.as_u16(),
                        latency_ms = latency,
                        "Endpoint responded"
                    );
                    FanoutResult::ok(fanout, response)
                }
                Err(e) => {
                    tracing::Span::current().record("status", 0_u16);
                    if e.is_cancellation() {
                        tracing::debug!(error = %e, latency_ms = latency, "Endpoint attempt abandoned");
                    } else {
                        tracing::warn!(error = %e, latency_ms = latency, "Endpoint attempt failed");
                    }
                    FanoutResult::err(fanout, e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// The results of a running fanout, in completion order.
pub struct Dispatch {
    rx: mpsc::Receiver<FanoutResult>,
    remaining: usize,
}

impl Dispatch {
    /// Results not yet received.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// The next result to complete, or `None` once every attempt reported.
    pub async fn next(&mut self) -> Option<FanoutResult> {
        if self.remaining == 0 {
            return None;
        }
        let result = self.rx.recv().await;
        match result {
            Some(_) => self.remaining -= 1,
            // Every sender is gone: an attempt task died without reporting.
            None => self.remaining = 0,
        }
        result
    }

    /// Wait for every attempt.
    pub async fn collect_all(mut self) -> Vec<FanoutResult> {
        let mut results = Vec::with_capacity(self.remaining);
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }
}
