//! End-to-end tests: a real HTTP/2 upstream behind the proxy accept loop.

mod common;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{METHOD, estimation_config, grpc_frame};
use http::{HeaderMap, HeaderValue, Request, Response};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use maxage_core::body::{self, ProxyBody};
use maxage_core::{CACHE_CONTROL, Config, MaxAgeMode, ValidityEstimator, server};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Spawn an upstream that reads the request to its end and answers
/// `/inventory.Stock/Get` with a fixed message, every other path with NOT_FOUND.
async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let service = service_fn(|request: Request<Incoming>| async move {
                    if request.uri().path() != METHOD {
                        return Ok::<_, Infallible>(body::status_response(
                            &tonic::Status::not_found("unknown method"),
                        ));
                    }
                    request.into_body().collect().await.unwrap();
                    let mut trailers = HeaderMap::new();
                    trailers.insert("grpc-status", HeaderValue::from_static("0"));
                    Ok(Response::builder()
                        .header("content-type", "application/grpc")
                        .body(body::replay(Bytes::from(grpc_frame(b"42 units")), Some(trailers)))
                        .unwrap())
                });
                let _ = http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

/// Start the proxy in front of `upstream`; dropping the sender stops it.
async fn spawn_proxy(upstream: SocketAddr, mode: MaxAgeMode) -> (SocketAddr, oneshot::Sender<()>) {
    let mut config = Config::default();
    config.server.upstream = upstream.to_string().parse().unwrap();
    config.estimation = estimation_config(mode);

    let estimator = Arc::new(ValidityEstimator::new(&config.estimation).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let service = server::proxy_service(&config, estimator);
    tokio::spawn(async move {
        server::serve(listener, service, async {
            let _ = stopped.await;
        })
        .await
        .unwrap();
    });
    (addr, stop)
}

async fn call(proxy: SocketAddr, path: &str) -> Response<Incoming> {
    let client = Client::builder(TokioExecutor::new()).http2_only(true).build_http::<ProxyBody>();
    let request = Request::builder()
        .method("POST")
        .uri(format!("http://{proxy}{path}"))
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(body::full(grpc_frame(b"sku-1")))
        .unwrap();
    client.request(request).await.unwrap()
}

#[tokio::test]
async fn test_proxy_annotates_upstream_response() {
    let upstream = spawn_upstream().await;
    let (proxy, _stop) = spawn_proxy(upstream, MaxAgeMode::Static(Duration::from_secs(90))).await;

    let response = call(proxy, METHOD).await;

    assert_eq!(response.headers()[CACHE_CONTROL], "must-revalidate, max-age=90");
    assert!(response.headers().contains_key("x-request-id"));
    let collected = response.into_body().collect().await.unwrap();
    assert_eq!(collected.trailers().unwrap()["grpc-status"], "0");
    assert_eq!(collected.to_bytes(), Bytes::from(grpc_frame(b"42 units")));
}

#[tokio::test]
async fn test_proxy_relays_upstream_failure_without_header() {
    let upstream = spawn_upstream().await;
    let (proxy, _stop) = spawn_proxy(upstream, MaxAgeMode::Static(Duration::from_secs(90))).await;

    let response = call(proxy, "/inventory.Stock/Missing").await;

    assert!(response.headers().get(CACHE_CONTROL).is_none());
    assert_eq!(body::failure_code(response.headers()), Some(tonic::Code::NotFound));
}

#[tokio::test]
async fn test_proxy_passthrough_mode_only_relays() {
    let upstream = spawn_upstream().await;
    let (proxy, _stop) = spawn_proxy(upstream, MaxAgeMode::Passthrough).await;

    let response = call(proxy, METHOD).await;

    assert!(response.headers().get(CACHE_CONTROL).is_none());
    let collected = response.into_body().collect().await.unwrap();
    assert_eq!(collected.to_bytes(), Bytes::from(grpc_frame(b"42 units")));
}
