//! Span builder helpers for fanout instrumentation.

/// Create the top-level span for one inbound request being fanned out.
///
/// Usage: `let span = fanout_request_span!(correlation_id, method, path);`
///
/// Fields recorded once the reduction settles:
/// - `endpoints`: number of resolved endpoints
/// - `status`: status code written to the caller
/// - `latency_ms`: milliseconds from resolution to the final response
#[macro_export]
macro_rules! fanout_request_span {
    ($correlation_id:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "fanout_request",
            correlation_id = %$correlation_id,
            method = %$method,
            path = %$path,
            endpoints = tracing::field::Empty,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Create a span for a single dispatch attempt against one endpoint.
#[macro_export]
macro_rules! endpoint_span {
    ($correlation_id:expr, $endpoint:expr) => {
        tracing::info_span!(
            "fanout_endpoint",
            correlation_id = %$correlation_id,
            endpoint = %$endpoint,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
