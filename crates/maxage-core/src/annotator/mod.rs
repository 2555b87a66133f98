//! Response annotation: attach `cache-control` to successful responses.
//!
//! Two surfaces share one decision path:
//! - [`CacheControlInterceptor::intercept`] wraps a typed tonic handler.
//! - [`MaxAgeLayer`] wraps a raw HTTP/2 service, such as the transparent
//!   forwarder.

mod layer;

pub use layer::{MaxAgeLayer, MaxAgeService};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::estimator::ValidityEstimator;
use crate::key::{CacheKey, KeyScope};

/// Response header carrying the advertised validity.
pub const CACHE_CONTROL: &str = "cache-control";

/// Format the directive advertised for `max_age`.
pub fn cache_control_value(max_age: Duration) -> String {
    format!("must-revalidate, max-age={}", max_age.as_secs())
}

/// Asks the [`ValidityEstimator`] for a TTL after each successful call.
#[derive(Debug, Clone)]
pub struct CacheControlInterceptor {
    estimator: Arc<ValidityEstimator>,
    scope: KeyScope,
}

impl CacheControlInterceptor {
    pub fn new(estimator: Arc<ValidityEstimator>, scope: KeyScope) -> Self {
        Self { estimator, scope }
    }

    pub fn estimator(&self) -> &Arc<ValidityEstimator> {
        &self.estimator
    }

    /// The `cache-control` value for a completed call, if one should be sent.
    ///
    /// `max-age` is advertised in whole seconds, truncated, so a TTL below one
    /// second yields `None` like no opinion does. Estimator failures are logged
    /// and yield `None`; they never fail the call.
    pub fn directive(&self, method: &str, request: &[u8], response: &[u8]) -> Option<String> {
        let key = CacheKey::derive(self.scope, method, request);
        match self.estimator.estimate_max_age(&key, request, response) {
            Ok(Some(max_age)) if max_age.as_secs() > 0 => Some(cache_control_value(max_age)),
            Ok(_) => {
                debug!(method, key = %key, "No cache validity to advertise");
                None
            }
            Err(e) => {
                warn!(method, key = %key, error = %e, "Validity estimation failed, forwarding response without cache-control");
                None
            }
        }
    }

    /// Run `next` and annotate its response.
    ///
    /// Handler failures are returned unchanged and no estimation takes place.
    pub async fn intercept<Req, Res, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        next: F,
    ) -> Result<Response<Res>, Status>
    where
        Req: Message,
        Res: Message,
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Res>, Status>>,
    {
        let request_bytes = request.get_ref().encode_to_vec();
        let mut response = next(request).await?;
        let response_bytes = response.get_ref().encode_to_vec();

        if let Some(directive) = self.directive(method, &request_bytes, &response_bytes) {
            match MetadataValue::try_from(directive.as_str()) {
                Ok(value) => {
                    response.metadata_mut().insert(CACHE_CONTROL, value);
                }
                Err(e) => warn!(method, error = %e, "Invalid cache-control value"),
            }
        }
        Ok(response)
    }
}
