//! Tower middleware that annotates raw gRPC-over-HTTP/2 responses.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use http::header::CACHE_CONTROL;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::CacheControlInterceptor;
use crate::body::{self, BoxError, ProxyBody};

type CallFuture<E> = Pin<Box<dyn Future<Output = Result<Response<ProxyBody>, E>> + Send>>;

/// A `Layer` that attaches `cache-control` to successful unary gRPC responses.
#[derive(Debug, Clone)]
pub struct MaxAgeLayer {
    interceptor: CacheControlInterceptor,
}

impl MaxAgeLayer {
    pub fn new(interceptor: CacheControlInterceptor) -> Self {
        Self { interceptor }
    }
}

impl<S> Layer<S> for MaxAgeLayer {
    type Service = MaxAgeService<S>;

    fn layer(&self, service: S) -> Self::Service {
        MaxAgeService { service, interceptor: self.interceptor.clone() }
    }
}

/// Relays each gRPC exchange, asks the estimator for a TTL and rewrites the
/// response headers.
///
/// The request body streams upstream as it arrives. The response is held back
/// only while the exchange still looks unary: one request message that has
/// ended and at most one response message. As soon as either side streams,
/// the held frames are released and the rest is relayed without annotation.
/// Non-gRPC traffic is forwarded untouched.
#[derive(Debug, Clone)]
pub struct MaxAgeService<S> {
    service: S,
    interceptor: CacheControlInterceptor,
}

impl<S> Service<Request<ProxyBody>> for MaxAgeService<S>
where
    S: Service<Request<ProxyBody>, Response = Response<ProxyBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<ProxyBody>;
    type Error = S::Error;
    type Future = CallFuture<S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ProxyBody>) -> Self::Future {
        // Use the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.service.clone();
        let mut service = std::mem::replace(&mut self.service, clone);

        if !body::is_grpc(request.headers()) {
            return Box::pin(service.call(request));
        }

        let interceptor = self.interceptor.clone();
        let method = request.uri().path().to_string();
        let capture = Arc::new(Mutex::new(Capture::default()));
        let request = request.map(|inner| {
            body::boxed(CapturingBody { inner, capture: Arc::clone(&capture) })
        });
        let upstream: CallFuture<S::Error> = Box::pin(service.call(request));

        Box::pin(async move {
            let response = upstream.await?;

            if response.status() != StatusCode::OK {
                debug!(method = %method, status = %response.status(), "Upstream HTTP failure, not estimating");
                return Ok(response);
            }
            if let Some(code) = body::failure_code(response.headers()) {
                debug!(method = %method, code = ?code, "Upstream call failed, not estimating");
                return Ok(response);
            }

            let (mut parts, mut response_body) = response.into_parts();
            let mut frames = Vec::new();
            let mut data = BytesMut::new();
            while let Some(frame) = response_body.frame().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(method = %method, error = %e, "Upstream response body interrupted");
                        return Ok(Response::from_parts(parts, body::prepend(frames, body::failed(e))));
                    }
                };
                if let Some(chunk) = frame.data_ref() {
                    data.extend_from_slice(chunk);
                }
                frames.push(frame);
                if body::holds_multiple_messages(&data) || unary_request(&capture).is_none() {
                    debug!(method = %method, "Streaming call, relaying without estimation");
                    return Ok(Response::from_parts(parts, body::prepend(frames, response_body)));
                }
            }

            let failed = frames.iter().filter_map(Frame::trailers_ref).find_map(body::failure_code);
            match (failed, unary_request(&capture)) {
                (Some(code), _) => {
                    debug!(method = %method, code = ?code, "Upstream call failed, not estimating");
                }
                (None, None) => {
                    debug!(method = %method, "Request did not complete as a single message, not estimating");
                }
                (None, Some(request_bytes)) => {
                    if let Some(directive) = interceptor.directive(&method, &request_bytes, &data) {
                        match HeaderValue::try_from(directive) {
                            Ok(value) => {
                                parts.headers.insert(CACHE_CONTROL, value);
                            }
                            Err(e) => warn!(method = %method, error = %e, "Invalid cache-control value"),
                        }
                    }
                }
            }

            Ok(Response::from_parts(parts, body::prepend(frames, body::empty())))
        })
    }
}

/// What the proxy saw of a request body while relaying it.
#[derive(Debug, Default)]
struct Capture {
    bytes: BytesMut,
    ended: bool,
    /// More than one message went by; `bytes` is no longer kept.
    streaming: bool,
}

impl Capture {
    fn record(&mut self, data: &Bytes) {
        if self.streaming {
            return;
        }
        self.bytes.extend_from_slice(data);
        if body::holds_multiple_messages(&self.bytes) {
            self.streaming = true;
            self.bytes = BytesMut::new();
        }
    }
}

/// The complete request payload, if it ended after at most one message.
fn unary_request(capture: &Mutex<Capture>) -> Option<Bytes> {
    let capture = capture.lock().ok()?;
    (capture.ended && !capture.streaming).then(|| Bytes::copy_from_slice(&capture.bytes))
}

/// Request body that relays frames untouched and copies them into a [`Capture`].
struct CapturingBody {
    inner: ProxyBody,
    capture: Arc<Mutex<Capture>>,
}

impl CapturingBody {
    fn update(&self, f: impl FnOnce(&mut Capture)) {
        if let Ok(mut capture) = self.capture.lock() {
            f(&mut capture);
        }
    }
}

impl Body for CapturingBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                let ended = this.inner.is_end_stream();
                this.update(|capture| {
                    if let Some(data) = frame.data_ref() {
                        capture.record(data);
                    }
                    capture.ended |= ended;
                });
            }
            Poll::Ready(None) => this.update(|capture| capture.ended = true),
            Poll::Ready(Some(Err(_))) | Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        let ended = self.inner.is_end_stream();
        if ended {
            self.update(|capture| capture.ended = true);
        }
        ended
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture_of(chunks: &[&'static [u8]], end: bool) -> Option<Bytes> {
        let capture = Mutex::new(Capture::default());
        {
            let mut guard = capture.lock().unwrap();
            for chunk in chunks {
                guard.record(&Bytes::from_static(chunk));
            }
            guard.ended = end;
        }
        unary_request(&capture)
    }

    #[test]
    fn test_single_message_request_is_unary() {
        let bytes = capture_of(&[b"\0\0\0\0\x02", b"ab"], true).unwrap();
        assert_eq!(bytes, Bytes::from_static(b"\0\0\0\0\x02ab"));
    }

    #[test]
    fn test_open_request_is_not_unary() {
        assert!(capture_of(&[b"\0\0\0\0\x02ab"], false).is_none());
    }

    #[test]
    fn test_second_message_marks_streaming() {
        assert!(capture_of(&[b"\0\0\0\0\x01a", b"\0\0\0\0\x01b"], true).is_none());
    }

    #[tokio::test]
    async fn test_capturing_body_relays_and_records() {
        let capture = Arc::new(Mutex::new(Capture::default()));
        let body = CapturingBody {
            inner: body::full(Bytes::from_static(b"\0\0\0\0\x01z")),
            capture: Arc::clone(&capture),
        };
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"\0\0\0\0\x01z"));
        assert_eq!(unary_request(&capture), Some(collected));
    }
}
