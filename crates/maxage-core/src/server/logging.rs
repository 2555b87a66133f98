//! Logging middleware for proxied gRPC calls with request IDs and timing.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use http::header::CACHE_CONTROL;
use http::{HeaderValue, Request, Response};
use tower::{Layer, Service};
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::body;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A `Layer` that adds logging with request IDs and timing to calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLoggerLayer;

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RequestLoggerService { service }
    }
}

/// A `Service` that logs each call with its request ID, gRPC outcome and
/// whether a cache-control header went out.
///
/// The request ID is sent upstream and echoed back to the caller.
#[derive(Debug, Clone)]
pub struct RequestLoggerService<S> {
    service: S,
}

impl<S, B, ResBody> Service<Request<B>> for RequestLoggerService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
    ResBody: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

        // Forward the ID upstream so both sides log the same value.
        if !request.headers().contains_key(REQUEST_ID_HEADER) {
            if let Ok(header_value) = HeaderValue::from_str(&request_id) {
                request.headers_mut().insert(REQUEST_ID_HEADER, header_value);
            }
        }

        let method = request.uri().path().to_string();
        let start_time = Instant::now();
        let span = tracing::info_span!("call", request_id = %request_id, method = %method);

        debug!(parent: &span, "Received call");

        let future: Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>> =
            Box::pin(self.service.call(request));
        Box::pin(
            async move {
                let mut result = future.await;
                let duration = start_time.elapsed();

                if let Ok(response) = &mut result {
                    if !response.headers().contains_key(REQUEST_ID_HEADER) {
                        if let Ok(header_value) = HeaderValue::from_str(&request_id) {
                            response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
                        }
                    }
                }

                match &result {
                    Ok(response) => {
                        let grpc_code = body::failure_code(response.headers());
                        let cache_control = response
                            .headers()
                            .get(CACHE_CONTROL)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-");
                        info!(
                            http_status = response.status().as_u16(),
                            grpc_failure = ?grpc_code,
                            cache_control,
                            duration_ms = duration.as_millis(),
                            "Call completed"
                        );
                    }
                    Err(_) => {
                        warn!(duration_ms = duration.as_millis(), "Call failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
