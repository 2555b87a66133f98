//! Configuration module for maxage.
//!
//! Settings come from an optional TOML file overlaid by `PROXY_*` environment
//! variables (`PROXY_LISTEN_PORT`, `PROXY_UPSTREAM_HOST`, `PROXY_MAX_AGE`, ...).
//! They are read as a flat [`Settings`] record and validated into [`Config`].

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use http::uri::Authority;
use serde::Deserialize;

use crate::error::{EstimationError, ProxyError, Result};
use crate::history::HistoryLimits;
use crate::key::KeyScope;
use crate::strategy::UpdateRisk;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PROXY";

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_NAME: &str = "maxage";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// The address the proxy listens on.
    pub address: SocketAddr,
    /// `host:port` of the upstream gRPC service.
    pub upstream: Authority,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 50051))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address(), upstream: Authority::from_static("127.0.0.1:50052") }
    }
}

/// Which estimation strategy answers for every response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MaxAgeMode {
    /// Never attach a header.
    #[default]
    Passthrough,
    /// Always attach the same max-age.
    Static(Duration),
    /// Update-risk based estimation.
    UpdateRisk,
    /// A `dynamic-*` mode with no algorithm behind it.
    Unimplemented(String),
}

impl FromStr for MaxAgeMode {
    type Err = EstimationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "passthrough" => return Ok(Self::Passthrough),
            "dynamic" | "update-risk" => return Ok(Self::UpdateRisk),
            mode if mode.starts_with("dynamic-") => return Ok(Self::Unimplemented(mode.to_string())),
            _ => {}
        }
        value.parse::<u64>().map(|secs| Self::Static(Duration::from_secs(secs))).map_err(|_| {
            EstimationError::Configuration(format!(
                "max_age must be 'passthrough', 'dynamic' or a number of seconds, got '{value}'"
            ))
        })
    }
}

/// Parameters of the update-risk strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRiskParams {
    /// Number of recent changes used for the rate estimate; `None` uses the default.
    pub k: Option<usize>,
    /// Accepted probability that a value changed before its TTL ran out.
    pub rho: f64,
}

impl Default for UpdateRiskParams {
    fn default() -> Self {
        Self { k: None, rho: 0.5 }
    }
}

/// Estimation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationConfig {
    pub mode: MaxAgeMode,
    pub update_risk: UpdateRiskParams,
    /// Floor for the delay between two re-estimations of one key.
    pub default_interval: Duration,
    pub history: HistoryLimits,
    pub key_scope: KeyScope,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            mode: MaxAgeMode::default(),
            update_risk: UpdateRiskParams::default(),
            default_interval: Duration::from_secs(5),
            history: HistoryLimits::default(),
            key_scope: KeyScope::default(),
        }
    }
}

/// Raw settings as read from file and environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_host: String,
    pub listen_port: u16,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub max_age: String,
    pub risk_k: Option<usize>,
    pub risk_rho: f64,
    pub default_interval_secs: u64,
    pub history_limit: usize,
    pub history_retention_secs: u64,
    pub key_scope: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 50051,
            upstream_host: "127.0.0.1".to_string(),
            upstream_port: 50052,
            max_age: "passthrough".to_string(),
            risk_k: None,
            risk_rho: 0.5,
            default_interval_secs: 5,
            history_limit: 128,
            history_retention_secs: 3600,
            key_scope: "method".to_string(),
        }
    }
}

impl TryFrom<Settings> for Config {
    type Error = ProxyError;

    fn try_from(settings: Settings) -> Result<Self> {
        let address: SocketAddr =
            format!("{}:{}", settings.listen_host, settings.listen_port).parse()?;

        if settings.upstream_host.trim().is_empty() {
            return Err(ProxyError::Config("upstream_host must not be empty".to_string()));
        }
        let upstream = format!("{}:{}", settings.upstream_host.trim(), settings.upstream_port)
            .parse::<Authority>()
            .map_err(|e| ProxyError::Config(format!("invalid upstream address: {e}")))?;

        if settings.history_limit == 0 {
            return Err(ProxyError::Config("history_limit must be greater than zero".to_string()));
        }

        let mode: MaxAgeMode = settings.max_age.parse()?;
        let update_risk = UpdateRiskParams { k: settings.risk_k, rho: settings.risk_rho };
        let default_interval = Duration::from_secs(settings.default_interval_secs);
        if default_interval.is_zero() {
            return Err(ProxyError::Config(
                "default_interval_secs must be greater than zero".to_string(),
            ));
        }
        if mode == MaxAgeMode::UpdateRisk {
            UpdateRisk::validate(update_risk.k, update_risk.rho, default_interval)?;
        }

        Ok(Self {
            server: ServerConfig { address, upstream },
            estimation: EstimationConfig {
                mode,
                update_risk,
                default_interval,
                history: HistoryLimits {
                    max_events: settings.history_limit,
                    retention: Duration::from_secs(settings.history_retention_secs),
                },
                key_scope: settings.key_scope.parse()?,
            },
        })
    }
}

/// Root configuration for maxage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub estimation: EstimationConfig,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from `maxage.toml` (if present) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the values are invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from `path` (required when given) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the values are invalid.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let source = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;
        Self::from_source(source)
    }

    /// Validate an already assembled `config` source.
    ///
    /// # Errors
    ///
    /// Returns an error if the values cannot be deserialized or are invalid.
    pub fn from_source(source: config::Config) -> Result<Self> {
        let settings: Settings = source.try_deserialize()?;
        settings.try_into()
    }
}
