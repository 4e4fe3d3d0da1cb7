//! Configuration management for Rategate.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `RATEGATE__*` environment variables (`RATEGATE__SERVER__HTTP_ADDR`,
//! `RATEGATE__LOG__LEVEL`, ...).

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::ratelimit::{default_rules, PolicyCatalog, PolicyRule};

const ENV_PREFIX: &str = "RATEGATE";

/// Main configuration for the Rategate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateGateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a policy file; replaces `policies` when set
    #[serde(default)]
    pub policies_path: Option<String>,

    /// Sweep interval in milliseconds; defaults to half the smallest window
    #[serde(default)]
    pub sweep_interval_ms: Option<u64>,

    /// Take the client address from `X-Forwarded-For`
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Inline policies
    #[serde(default = "default_rules")]
    pub policies: Vec<PolicyRule>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policies_path: None,
            sweep_interval_ms: None,
            trust_forwarded_for: false,
            policies: default_rules(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RateGateConfig {
    /// Load layered configuration: defaults, the optional file, then environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: RateGateConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded layers.
    pub fn with_http_addr(mut self, http_addr: Option<SocketAddr>) -> Self {
        if let Some(addr) = http_addr {
            self.server.http_addr = addr;
        }
        self
    }

    /// Build and validate the policy catalogue.
    pub fn policy_catalog(&self) -> Result<PolicyCatalog> {
        let catalog = match &self.rate_limiting.policies_path {
            Some(path) => PolicyCatalog::from_file(path)?,
            None => PolicyCatalog::from_rules(self.rate_limiting.policies.clone())?,
        };
        info!(policies = catalog.len(), "Rate limit policies registered");
        Ok(catalog)
    }

    /// Explicit sweep interval, if configured.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.rate_limiting.sweep_interval_ms.map(Duration::from_millis)
    }
}
