//! maxage core - cache validity estimation for gRPC proxies.
//!
//! This crate sits in front of a gRPC service, relays calls to it and decides
//! how long each response may be cached downstream. The decision is
//! advertised as `cache-control: must-revalidate, max-age=<seconds>`:
//! - Per-key history of observed value changes
//! - Estimation strategies (passthrough, static, update-risk based)
//! - Validity estimator tying history and strategy together
//! - Response annotation as a tonic interceptor or a tower layer
//! - A transparent HTTP/2 proxy server
//!
//! # Example
//!
//! ```rust,no_run
//! use maxage_core::{config::Config, server};
//!
//! #[tokio::main]
//! async fn main() -> maxage_core::error::Result<()> {
//!     let config = Config::load()?;
//!     server::run(&config).await
//! }
//! ```

pub mod annotator;
pub mod body;
pub mod config;
pub mod error;
pub mod estimator;
pub mod history;
pub mod key;
pub mod server;
pub mod strategy;

pub use annotator::{CACHE_CONTROL, CacheControlInterceptor, MaxAgeLayer, cache_control_value};
pub use config::{Config, EstimationConfig, MaxAgeMode, ServerConfig, UpdateRiskParams};
pub use error::{EstimationError, ProxyError, Result};
pub use estimator::ValidityEstimator;
pub use history::{
    ChangeDetector, DigestDetector, Estimation, ExactDetector, Fingerprint, HistoryLimits,
    HistoryStore, Interval, KeyHistory, Verification,
};
pub use key::{CacheKey, KeyScope};
pub use strategy::{EstimationStrategy, Passthrough, StaticTtl, Strategy, UpdateRisk};
