//! `[tracing]` section of the fanout configuration.

use serde::Deserialize;

/// Log output and span export settings.
///
/// Every field has a default, so an absent `[tracing]` section yields
/// info-level text logs on stderr and no span export.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// `service.name` resource attribute on exported spans.
    pub service_name: String,

    /// Collector to export spans to, e.g. `http://localhost:4317`.
    pub otlp_endpoint: Option<String>,

    pub protocol: OtlpProtocol,

    /// `EnvFilter` directive such as `"fanout=debug,info"`.
    pub log_level: String,

    pub format: LogFormat,
}

/// Wire protocol used to reach the collector.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "fanout".to_string(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::Grpc,
            log_level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_section_uses_defaults() {
        let config: TracingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.service_name, "fanout");
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.protocol, OtlpProtocol::Grpc);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_section() {
        let config: TracingConfig = serde_json::from_str(
            r#"{"otlp_endpoint": "http://collector:4318", "protocol": "http", "format": "json"}"#,
        )
        .unwrap();
        assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4318"));
        assert_eq!(config.protocol, OtlpProtocol::Http);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.service_name, "fanout");
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(serde_json::from_str::<TracingConfig>(r#"{"format": "pretty"}"#).is_err());
    }
}
