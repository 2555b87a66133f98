//! Transparent forwarding of gRPC calls to the upstream service.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::uri::{Authority, Scheme};
use http::{Request, Response, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tonic::Status;
use tower::Service;
use tracing::warn;

use crate::body::{self, ProxyBody};

/// Relays every call, byte for byte, to one upstream over cleartext HTTP/2.
#[derive(Debug, Clone)]
pub struct UpstreamForwarder {
    client: Client<HttpConnector, ProxyBody>,
    upstream: Authority,
}

impl UpstreamForwarder {
    pub fn new(upstream: Authority) -> Self {
        let client = Client::builder(TokioExecutor::new()).http2_only(true).build_http();
        Self { client, upstream }
    }

    pub fn upstream(&self) -> &Authority {
        &self.upstream
    }
}

/// Point `original` at `upstream`, keeping path and query.
pub fn upstream_uri(upstream: &Authority, original: &Uri) -> Result<Uri, http::Error> {
    let path = original.path_and_query().map_or("/", |pq| pq.as_str());
    Uri::builder().scheme(Scheme::HTTP).authority(upstream.clone()).path_and_query(path).build()
}

impl Service<Request<ProxyBody>> for UpstreamForwarder {
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut request: Request<ProxyBody>) -> Self::Future {
        let client = self.client.clone();
        let upstream = self.upstream.clone();

        Box::pin(async move {
            match upstream_uri(&upstream, request.uri()) {
                Ok(uri) => *request.uri_mut() = uri,
                Err(e) => {
                    warn!(upstream = %upstream, error = %e, "Cannot build upstream URI");
                    return Ok(body::status_response(&Status::internal("invalid upstream URI")));
                }
            }

            match client.request(request).await {
                Ok(response) => Ok(response.map(body::boxed)),
                Err(e) => {
                    warn!(upstream = %upstream, error = %e, "Upstream call failed");
                    Ok(body::status_response(&Status::unavailable("upstream unavailable")))
                }
            }
        })
    }
}
