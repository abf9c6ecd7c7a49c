//! fanout: HTTP fanout proxy that sends every inbound request to a set of
//! backends and writes one reduced response.

use fanout::config::FanoutConfig;
use fanout::server::{self, AppState};

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("FANOUT_CONFIG").ok())
        .unwrap_or_else(|| "fanout.toml".to_string());

    let config = FanoutConfig::load(&config_path)?;

    // Build the tokio runtime first: the tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        // Initialize tracing (OTLP export is optional, falls back to fmt-only)
        let tracing_guard = fanout_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            endpoints = ?config.fanout.endpoints,
            policy = ?config.fanout.policy,
            otlp_export = tracing_guard.is_exporting(),
            "Starting fanout"
        );

        run(config).await
    })
}

async fn run(config: FanoutConfig) -> anyhow::Result<()> {
    let handler = server::build_handler(&config)?;
    let state = AppState::new(config, handler);

    server::run(state).await
}
