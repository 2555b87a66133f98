//! Server module for maxage.
//!
//! Accepts gRPC connections, forwards every call to the upstream service and
//! annotates successful responses with `cache-control`.

mod forward;
pub mod logging;

pub use forward::{UpstreamForwarder, upstream_uri};

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::{Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tracing::{debug, error, info};

use crate::annotator::{CacheControlInterceptor, MaxAgeLayer};
use crate::body::{self, ProxyBody};
use crate::config::Config;
use crate::error::Result;
use crate::estimator::ValidityEstimator;
use logging::RequestLoggerLayer;

/// The per-call service stack: logging, annotation, forwarding.
pub type ProxyService = BoxCloneService<Request<ProxyBody>, Response<ProxyBody>, Infallible>;

/// Assemble the service stack for `config` around a shared estimator.
pub fn proxy_service(config: &Config, estimator: Arc<ValidityEstimator>) -> ProxyService {
    let interceptor = CacheControlInterceptor::new(estimator, config.estimation.key_scope);
    let service = ServiceBuilder::new()
        .layer(RequestLoggerLayer)
        .layer(MaxAgeLayer::new(interceptor))
        .service(UpstreamForwarder::new(config.server.upstream.clone()));
    BoxCloneService::new(service)
}

/// Bridges a [`ProxyService`] to hyper's connection driver.
#[derive(Debug, Clone)]
struct HyperService {
    service: ProxyService,
}

impl hyper::service::Service<Request<Incoming>> for HyperService {
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let (parts, incoming) = request.into_parts();
        let request = Request::from_parts(parts, body::boxed(incoming));
        Box::pin(self.service.clone().oneshot(request))
    }
}

/// Start the proxy and run until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the estimation strategy cannot be armed or the
/// listen address cannot be bound.
pub async fn run(config: &Config) -> Result<()> {
    run_with_shutdown(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    })
    .await
}

/// Start the proxy and run until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the estimation strategy cannot be armed or the
/// listen address cannot be bound.
pub async fn run_with_shutdown<F>(config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let estimator = Arc::new(ValidityEstimator::new(&config.estimation)?);
    let listener = TcpListener::bind(config.server.address).await?;
    info!(
        address = %config.server.address,
        upstream = %config.server.upstream,
        strategy = ?config.estimation.mode,
        "Proxy listening"
    );
    serve(listener, proxy_service(config, estimator), shutdown).await
}

/// Serve HTTP/2 connections from `listener` with `service` until `shutdown`.
///
/// # Errors
///
/// Currently infallible once the listener is bound; accept errors are logged.
pub async fn serve<F>(listener: TcpListener, service: ProxyService, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "New connection");
                        let hyper_service = HyperService { service: service.clone() };
                        tokio::spawn(async move {
                            if let Err(e) = http2::Builder::new(TokioExecutor::new())
                                .serve_connection(TokioIo::new(stream), hyper_service)
                                .await
                            {
                                debug!(%peer, error = %e, "Connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
            () = &mut shutdown => {
                info!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    Ok(())
}
