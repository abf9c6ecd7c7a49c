//! HTTP fanout: one inbound request, N concurrent backend calls, one reduced
//! response.
//!
//! A [`Handler`] resolves the endpoints of an inbound request, dispatches a
//! decorated copy of it to each of them through a [`Transport`], reduces the
//! results with a [`SelectionPolicy`] and decorates the chosen result into
//! the response written to the caller.

pub mod config;
pub mod context;
pub mod correlation;
pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod handler;
pub mod header;
pub mod policy;
pub mod request;
pub mod response;
pub mod server;
pub mod transport;

pub use context::FanoutContext;
pub use correlation::{CorrelationId, CORRELATION_HEADER};
pub use dispatch::{Dispatch, Dispatcher};
pub use endpoints::{
    must_new_endpoints, must_new_fixed_endpoints, Endpoints, EndpointsFunc, FixedEndpoints,
};
pub use error::{BoxError, Error};
pub use handler::{Handler, HandlerBuilder};
pub use header::{canonical_header_key, Header};
pub use policy::{AllSucceed, FirstSuccess, Outcome, Reduction, SelectionPolicy};
pub use request::{
    request_func, BodyFactory, CorrelationHeader, FixedHeader, InboundRequest, OriginalBody,
    OriginalHeaders, OutboundRequest, RequestFunc,
};
pub use response::{
    response_func, FanoutHeaders, FanoutResponse, FanoutResult, OutboundResponse, ResponseFunc,
};
pub use transport::{ReqwestTransport, Transport};
