//! Integration tests for the typed cache-control interceptor.

mod common;

use std::time::Duration;

use common::{METHOD, estimation_config, interceptor, interceptor_with};
use maxage_core::{CACHE_CONTROL, MaxAgeMode};
use tonic::{Request, Response, Status};

async fn echo(request: Request<String>) -> Result<Response<String>, Status> {
    Ok(Response::new(format!("stock for {}", request.into_inner())))
}

#[tokio::test]
async fn test_static_mode_attaches_header() {
    let interceptor = interceptor(MaxAgeMode::Static(Duration::from_secs(300)));

    let response = interceptor
        .intercept(METHOD, Request::new("sku-1".to_string()), echo)
        .await
        .unwrap();

    assert_eq!(response.get_ref(), "stock for sku-1");
    assert_eq!(
        response.metadata().get(CACHE_CONTROL).unwrap().to_str().unwrap(),
        "must-revalidate, max-age=300"
    );
}

#[tokio::test]
async fn test_passthrough_mode_attaches_nothing() {
    let interceptor = interceptor(MaxAgeMode::Passthrough);

    for sku in ["a", "b", "c"] {
        let response = interceptor
            .intercept(METHOD, Request::new(sku.to_string()), echo)
            .await
            .unwrap();
        assert!(response.metadata().get(CACHE_CONTROL).is_none());
    }
    // Calls were still observed
    let key = maxage_core::CacheKey::from(METHOD);
    assert_eq!(interceptor.estimator().history().verifications(&key).unwrap().len(), 3);
}

#[tokio::test]
async fn test_handler_failure_is_forwarded_without_estimation() {
    let interceptor = interceptor(MaxAgeMode::Static(Duration::from_secs(300)));

    let status = interceptor
        .intercept(METHOD, Request::new("sku-1".to_string()), |_req: Request<String>| async {
            Err::<Response<String>, _>(Status::not_found("no such sku"))
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), tonic::Code::NotFound);
    assert_eq!(status.message(), "no such sku");
    assert!(interceptor.estimator().history().is_empty(), "no verification may be recorded");
}

#[tokio::test]
async fn test_estimator_failure_degrades_to_no_header() {
    let interceptor = interceptor(MaxAgeMode::Unimplemented("dynamic-adaptive".to_string()));

    let response = interceptor
        .intercept(METHOD, Request::new("sku-1".to_string()), echo)
        .await
        .unwrap();

    assert_eq!(response.get_ref(), "stock for sku-1");
    assert!(response.metadata().get(CACHE_CONTROL).is_none());
}

#[tokio::test]
async fn test_update_risk_cold_start_advertises_whole_seconds() {
    let interceptor = interceptor(MaxAgeMode::UpdateRisk);

    let response = interceptor
        .intercept(METHOD, Request::new("sku-1".to_string()), echo)
        .await
        .unwrap();

    // mu = 1 and rho = 0.9 give -ln(0.1) = 2.303 seconds
    assert_eq!(
        response.metadata().get(CACHE_CONTROL).unwrap().to_str().unwrap(),
        "must-revalidate, max-age=2"
    );
}

#[tokio::test]
async fn test_sub_second_estimate_sends_no_header() {
    // rho = 0.5 on a cold start gives ln 2 = 0.69 seconds
    let mut config = estimation_config(MaxAgeMode::UpdateRisk);
    config.update_risk.rho = 0.5;
    let interceptor = interceptor_with(&config);

    let response = interceptor
        .intercept(METHOD, Request::new("sku-1".to_string()), echo)
        .await
        .unwrap();

    assert_eq!(response.get_ref(), "stock for sku-1");
    assert!(response.metadata().get(CACHE_CONTROL).is_none());
    let key = maxage_core::CacheKey::from(METHOD);
    assert_eq!(interceptor.estimator().history().verifications(&key).unwrap().len(), 1);
}

#[tokio::test]
async fn test_existing_metadata_is_preserved() {
    let interceptor = interceptor(MaxAgeMode::Static(Duration::from_secs(60)));

    let response = interceptor
        .intercept(METHOD, Request::new("sku-1".to_string()), |req: Request<String>| async move {
            let mut response = Response::new(req.into_inner());
            response.metadata_mut().insert("x-served-by", "stock-1".parse().unwrap());
            Ok(response)
        })
        .await
        .unwrap();

    assert_eq!(response.metadata().get("x-served-by").unwrap(), "stock-1");
    assert!(response.metadata().get(CACHE_CONTROL).is_some());
}
