//! Integration tests for route-level access control
//!
//! Exercises the policy table and the bearer-token guard through the
//! service router and through a business router built with
//! `ProtectedRouter`, the way downstream API routes are registered.

use auth_service::middleware::{AccessController, CurrentUser};
use auth_service::routes::{PolicyError, PolicyTable, ProtectedRouter, RoutePolicy};
use auth_test_utils::server_harness::{body_json, TestAuthServer};
use auth_test_utils::TestKeypair;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceExt;

const WRITER: &str = "Requirements.Writer";

/// Business routes: listing needs any valid token, editing needs a role.
fn requirements_router(server: &TestAuthServer) -> Result<Router, PolicyError> {
    let policies = PolicyTable::new()
        .declare("list_requirements", RoutePolicy::authenticated())?
        .declare("edit_requirement", RoutePolicy::roles([WRITER, "Admin"]))?;
    let access = Arc::new(AccessController::new(
        policies,
        Arc::clone(&server.validator),
    ));

    ProtectedRouter::new(access)
        .route(
            "list_requirements",
            "/api/v1/requirements",
            get(|| async { "[]" }),
        )
        .route(
            "edit_requirement",
            "/api/v1/requirements/edit",
            post(|user: CurrentUser| async move { user.user_id().to_string() }),
        )
        .finish()
}

fn request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request must build")
}

// ============================================================================
// Service routes
// ============================================================================

/// `/api/v1/me` requires a bearer token.
#[tokio::test]
async fn test_me_without_token_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let response = server.get("/api/v1/me", &[]).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Unauthorized");
    Ok(())
}

/// `/api/v1/me` reports the token's subject and roles.
#[tokio::test]
async fn test_me_with_valid_token_returns_identity() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let token = server
        .idp
        .token_builder()
        .subject("alice")
        .roles([WRITER, "Admin"])
        .sign(server.idp.key());

    // Act
    let response = server.get_with_bearer("/api/v1/me", &token).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["currentUserId"], "alice");
    assert_eq!(body["currentRoles"], serde_json::json!(["Admin", WRITER]));
    Ok(())
}

/// Any authenticated route accepts a token without a `roles` claim.
#[tokio::test]
async fn test_me_token_without_roles_is_allowed() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let token = server
        .idp
        .token_builder()
        .without_roles()
        .sign(server.idp.key());

    let response = server.get_with_bearer("/api/v1/me", &token).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["currentRoles"], serde_json::json!([]));
    Ok(())
}

/// Expired tokens are rejected.
#[tokio::test]
async fn test_me_expired_token_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let token = server
        .idp
        .token_builder()
        .expires_in_secs(-3600)
        .sign(server.idp.key());

    let response = server.get_with_bearer("/api/v1/me", &token).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// Tokens minted for another client are rejected.
#[tokio::test]
async fn test_me_wrong_audience_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let token = server
        .idp
        .token_builder()
        .claim("aud", serde_json::json!("some-other-client"))
        .sign(server.idp.key());

    let response = server.get_with_bearer("/api/v1/me", &token).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// A token signed by a key the provider never published is rejected.
#[tokio::test]
async fn test_me_forged_signature_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let token = server
        .idp
        .token_builder()
        .sign(&TestKeypair::new(42, "idp-key-1"));

    let response = server.get_with_bearer("/api/v1/me", &token).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// Public routes need no credentials.
#[tokio::test]
async fn test_public_routes_need_no_token() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    assert_eq!(server.get("/api/v1/health", &[]).await.status(), StatusCode::OK);
    assert_eq!(server.get("/metrics", &[]).await.status(), StatusCode::OK);
    assert_eq!(
        server.get("/auth/login", &[]).await.status(),
        StatusCode::SEE_OTHER
    );
    Ok(())
}

// ============================================================================
// Business routes
// ============================================================================

/// A role route rejects a valid token that lacks every required role.
#[tokio::test]
async fn test_role_route_without_role_returns_403() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let app = requirements_router(&server)?;
    let token = server
        .idp
        .token_builder()
        .roles(["Requirements.Reader"])
        .sign(server.idp.key());

    // Act
    let response = app
        .oneshot(request("POST", "/api/v1/requirements/edit", Some(&token)))
        .await?;

    // Assert
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Forbidden");
    assert_eq!(body["message"], "Missing a needed role for this request.");
    Ok(())
}

/// Holding any one of the required roles is enough.
#[tokio::test]
async fn test_role_route_with_any_required_role_is_allowed() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let app = requirements_router(&server)?;
    let token = server
        .idp
        .token_builder()
        .subject("writer-1")
        .roles([WRITER])
        .sign(server.idp.key());

    let response = app
        .oneshot(request("POST", "/api/v1/requirements/edit", Some(&token)))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await?
        .to_bytes();
    assert_eq!(&bytes[..], b"writer-1");
    Ok(())
}

/// A token with no roles claim is forbidden on a role route but allowed on
/// an authenticated one.
#[tokio::test]
async fn test_token_without_roles_claim_is_forbidden_on_role_route() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let app = requirements_router(&server)?;
    let token = server
        .idp
        .token_builder()
        .without_roles()
        .sign(server.idp.key());

    let edit = app
        .clone()
        .oneshot(request("POST", "/api/v1/requirements/edit", Some(&token)))
        .await?;
    let list = app
        .oneshot(request("GET", "/api/v1/requirements", Some(&token)))
        .await?;

    assert_eq!(edit.status(), StatusCode::FORBIDDEN);
    assert_eq!(list.status(), StatusCode::OK);
    Ok(())
}

/// Authentication is checked before roles.
#[tokio::test]
async fn test_role_route_without_token_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let app = requirements_router(&server)?;

    let response = app
        .oneshot(request("POST", "/api/v1/requirements/edit", None))
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// Registering a route with no declared policy fails the build.
#[tokio::test]
async fn test_route_without_policy_fails_router_build() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let access = Arc::new(AccessController::new(
        PolicyTable::new().declare("list_requirements", RoutePolicy::authenticated())?,
        Arc::clone(&server.validator),
    ));

    let result: Result<Router, PolicyError> = ProtectedRouter::new(access)
        .route("list_requirements", "/api/v1/requirements", get(|| async { "[]" }))
        .route("delete_requirement", "/api/v1/requirements/delete", post(|| async { "" }))
        .finish();

    assert_eq!(
        result.err(),
        Some(PolicyError::MissingPolicy("delete_requirement".to_string()))
    );
    Ok(())
}
