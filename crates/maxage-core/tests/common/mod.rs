//! Shared test utilities for maxage-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use maxage_core::{
    CacheControlInterceptor, EstimationConfig, KeyScope, MaxAgeMode, UpdateRiskParams,
    ValidityEstimator,
};

/// Full method name used across tests.
pub const METHOD: &str = "/inventory.Stock/Get";

/// Builds an estimation configuration for `mode` with update-risk K = 2, rho = 0.9.
pub fn estimation_config(mode: MaxAgeMode) -> EstimationConfig {
    EstimationConfig {
        mode,
        update_risk: UpdateRiskParams { k: Some(2), rho: 0.9 },
        default_interval: Duration::from_secs(5),
        ..EstimationConfig::default()
    }
}

/// Creates an interceptor backed by a fresh estimator.
///
/// # Panics
/// Panics if the strategy for `mode` cannot be armed.
pub fn interceptor(mode: MaxAgeMode) -> CacheControlInterceptor {
    interceptor_with(&estimation_config(mode))
}

/// Creates an interceptor for an explicit estimation configuration.
///
/// # Panics
/// Panics if the configured strategy cannot be armed.
pub fn interceptor_with(config: &EstimationConfig) -> CacheControlInterceptor {
    let estimator = ValidityEstimator::new(config).expect("valid strategy");
    CacheControlInterceptor::new(Arc::new(estimator), KeyScope::Method)
}

/// Frames `message` as a single uncompressed gRPC message.
pub fn grpc_frame(message: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(message.len() + 5);
    frame.push(0);
    frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
    frame.extend_from_slice(message);
    frame
}
