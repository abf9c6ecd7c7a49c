//! Configuration types and loading logic.

use fanout_tracing::TracingConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Top-level fanout configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub server: ServerConfig,
    pub fanout: FanoutSection,
    pub client: ClientConfig,
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Largest inbound body accepted, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Inbound requests fanned out at the same time; excess requests get 503.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

/// What each inbound request is fanned out to, and how results are reduced.
#[derive(Debug, Clone, Deserialize)]
pub struct FanoutSection {
    /// Base URLs; the inbound path, query and fragment are overlaid on each.
    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default = "default_fanout_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub policy: PolicyKind,

    /// Install a body factory so 307/308 redirects can resend the body.
    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    /// Inbound headers copied onto every outbound request.
    #[serde(default)]
    pub original_headers: Vec<String>,

    /// Backend response headers copied onto the final response.
    #[serde(default)]
    pub fanout_headers: Vec<String>,

    /// Fixed `Authorization` value set on every outbound request.
    pub authorization: Option<String>,
}

/// Which selection policy reduces the results.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    FirstSuccess,
    AllSucceed,
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Per-call timeout of the reqwest client.
    #[serde(default = "default_client_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Headers dropped from the request when following a redirect.
    #[serde(default)]
    pub redirect_exclude_headers: Vec<String>,
}

fn default_listen_address() -> String {
    "0.0.0.0:6100".to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_concurrency_limit() -> usize {
    1000
}

fn default_fanout_timeout_ms() -> u64 {
    45_000
}

fn default_client_timeout_ms() -> u64 {
    30_000
}

fn default_max_redirects() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_body_bytes: default_max_body_bytes(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

impl Default for FanoutSection {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout_ms: default_fanout_timeout_ms(),
            policy: PolicyKind::default(),
            follow_redirects: true,
            original_headers: Vec::new(),
            fanout_headers: Vec::new(),
            authorization: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_client_timeout_ms(),
            max_redirects: default_max_redirects(),
            redirect_exclude_headers: Vec::new(),
        }
    }
}

impl FanoutConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (FANOUT_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: FanoutConfig = Self::figment(config_path).extract()?;
        Ok(config)
    }

    fn figment(config_path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("FANOUT_").split("__"))
    }
}
