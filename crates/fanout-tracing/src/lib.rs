//! Reusable tracing setup for the fanout proxy: fmt logging, optional OTLP
//! span export and span builder macros.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{LogFormat, OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
