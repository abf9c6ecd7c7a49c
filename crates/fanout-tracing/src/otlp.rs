//! Subscriber installation: stderr logging plus optional OTLP span export.

use anyhow::Result;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, OtlpProtocol, TracingConfig};

/// Keeps the span exporter alive; flushes pending spans when dropped.
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    fn logging_only() -> Self {
        Self { provider: None }
    }

    /// Whether spans are being exported over OTLP.
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("fanout: span exporter shutdown failed: {e}");
        }
    }
}

fn log_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Unparseable directives fall back to `info`.
fn level_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn span_exporter(protocol: OtlpProtocol, endpoint: &str) -> Result<SpanExporter> {
    let exporter = match protocol {
        OtlpProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?,
        OtlpProtocol::Http => SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?,
    };
    Ok(exporter)
}

/// Install the global subscriber.
///
/// Must be called from inside a tokio runtime when OTLP export over gRPC is
/// configured. An exporter that cannot be built is reported and the process
/// keeps running with logging only. Hold the returned guard until shutdown.
pub fn init_tracing(config: &TracingConfig) -> TracingGuard {
    let Some(endpoint) = config.otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(log_layer(config.format))
            .with(level_filter(&config.log_level))
            .init();
        return TracingGuard::logging_only();
    };

    let exporter = match span_exporter(config.protocol, endpoint) {
        Ok(exporter) => exporter,
        Err(e) => {
            tracing_subscriber::registry()
                .with(log_layer(config.format))
                .with(level_filter(&config.log_level))
                .init();
            tracing::warn!(error = %e, endpoint, "Span export disabled: exporter could not be built");
            return TracingGuard::logging_only();
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();
    let tracer = provider.tracer(config.service_name.clone());

    tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(log_layer(config.format))
        .with(level_filter(&config.log_level))
        .init();

    tracing::info!(
        endpoint,
        service = %config.service_name,
        protocol = ?config.protocol,
        "Exporting spans over OTLP"
    );

    TracingGuard {
        provider: Some(provider),
    }
}
