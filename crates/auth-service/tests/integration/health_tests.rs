//! Integration tests for the operational endpoints.

use auth_test_utils::server_harness::TestAuthServer;
use axum::http::StatusCode;
use http_body_util::BodyExt;

/// Test that the health endpoint returns OK
#[tokio::test]
async fn test_health_endpoint_returns_ok() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let response = server.get("/api/v1/health", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await?.to_bytes();
    assert_eq!(&body[..], b"OK");
    Ok(())
}

/// Unknown paths are a plain 404, not an auth failure.
#[tokio::test]
async fn test_unknown_path_returns_404() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let response = server.get("/api/v1/nope", &[]).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

/// The metrics endpoint serves Prometheus text.
#[tokio::test]
async fn test_metrics_endpoint_is_public() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let response = server.get("/metrics", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
