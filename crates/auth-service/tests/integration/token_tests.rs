//! E2E tests for `/auth/token`: reading, refreshing and terminating
//! sessions.

use auth_service::handlers::SESSION_COOKIE;
use auth_test_utils::mock_idp::token_response;
use auth_test_utils::server_harness::{body_json, set_cookie, TestAuthServer};
use axum::http::StatusCode;
use std::time::Duration;
use wiremock::ResponseTemplate;

// ============================================================================
// Reading
// ============================================================================

/// A fresh session returns its access token without touching the provider.
#[tokio::test]
async fn test_token_returns_current_access_token() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let cookie = server
        .log_in("fresh", "alice", &["Requirements.Reader"], 3600)
        .await;
    server
        .idp
        .mock_refresh(ResponseTemplate::new(500), Some(0))
        .await;

    // Act
    let response = server.get("/auth/token", &[(SESSION_COOKIE, &cookie)]).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        set_cookie(&response, SESSION_COOKIE).is_none(),
        "Cookie should not be re-issued without a refresh"
    );
    let body = body_json(response).await;
    assert_eq!(body["status"], 200);
    assert_eq!(body["data"]["access_token"], "at-fresh");
    assert_eq!(body["data"]["email"], "alice@example.com");
    assert_eq!(body["data"]["roles"], serde_json::json!(["Requirements.Reader"]));
    assert!(body["data"]["expires_at"].as_i64().unwrap_or(0) > chrono::Utc::now().timestamp());

    Ok(())
}

/// No cookie is a 401 with the session message.
#[tokio::test]
async fn test_token_without_cookie_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let response = server.get("/auth/token", &[]).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["status"], 401);
    assert_eq!(body["error"], "Unauthorized");
    assert_eq!(body["message"], "No valid session cookie provided");
    Ok(())
}

/// A cookie with a broken signature is a 401.
#[tokio::test]
async fn test_token_with_tampered_cookie_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("tamper", "bob", &[], 3600).await;
    let tampered = format!("{cookie}x");

    let response = server
        .get("/auth/token", &[(SESSION_COOKIE, &tampered)])
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

// ============================================================================
// Refresh
// ============================================================================

/// A token inside the refresh margin is refreshed and the session cookie
/// re-issued; the old cookie stops working.
#[tokio::test]
async fn test_token_near_expiry_is_refreshed() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("stale", "carol", &["Admin"], 30).await;
    server
        .idp
        .mock_refresh(
            ResponseTemplate::new(200).set_body_json(token_response(
                "at-refreshed",
                Some("rt-refreshed"),
                None,
                3600,
            )),
            Some(1),
        )
        .await;

    // Act
    let response = server.get("/auth/token", &[(SESSION_COOKIE, &cookie)]).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let renewed = set_cookie(&response, SESSION_COOKIE).expect("refresh must re-issue the cookie");
    assert_ne!(renewed, cookie);
    let body = body_json(response).await;
    assert_eq!(body["data"]["access_token"], "at-refreshed");
    assert_eq!(
        body["data"]["roles"],
        serde_json::json!(["Admin"]),
        "Refresh should keep the session's identity"
    );

    let old = server.get("/auth/token", &[(SESSION_COOKIE, &cookie)]).await;
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);

    let current = server.get("/auth/token", &[(SESSION_COOKIE, &renewed)]).await;
    assert_eq!(current.status(), StatusCode::OK);
    assert_eq!(server.cache.len().await, 1);

    Ok(())
}

/// Concurrent requests for a stale session share one provider refresh.
#[tokio::test]
async fn test_token_concurrent_refresh_calls_provider_once() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("burst", "dave", &[], 10).await;
    server
        .idp
        .mock_refresh(
            ResponseTemplate::new(200)
                .set_body_json(token_response("at-burst", Some("rt-burst"), None, 3600))
                .set_delay(Duration::from_millis(200)),
            Some(1),
        )
        .await;

    // Act
    let cookies = [(SESSION_COOKIE, cookie.as_str())];
    let requests = (0..5).map(|_| server.get("/auth/token", &cookies));
    let responses = futures::future::join_all(requests).await;

    // Assert
    let mut renewed = Vec::new();
    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        renewed.push(set_cookie(&response, SESSION_COOKIE).expect("cookie re-issued"));
        let body = body_json(response).await;
        assert_eq!(body["data"]["access_token"], "at-burst");
    }
    renewed.dedup();
    assert_eq!(renewed.len(), 1, "All callers should receive the same new session");
    assert_eq!(server.cache.len().await, 1);

    Ok(())
}

/// A request that read the session just before a concurrent refresh
/// replaced it does not spend the old refresh token again.
#[tokio::test]
async fn test_token_stale_read_after_refresh_skips_provider() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("stale-read", "heidi", &[], 10).await;
    server
        .idp
        .mock_refresh(
            ResponseTemplate::new(200).set_body_json(token_response(
                "at-once",
                Some("rt-once"),
                None,
                3600,
            )),
            Some(1),
        )
        .await;
    server
        .stall_next_session_read(Duration::from_millis(300))
        .await;

    // Act: the stalled request reads the old entry, then the second
    // request refreshes and deletes it before the stall ends.
    let cookies = [(SESSION_COOKIE, cookie.as_str())];
    let stalled = server.get("/auth/token", &cookies);
    let refreshing = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.get("/auth/token", &cookies).await
    };
    let (stalled, refreshing) = tokio::join!(stalled, refreshing);

    // Assert
    assert_eq!(refreshing.status(), StatusCode::OK);
    assert!(set_cookie(&refreshing, SESSION_COOKIE).is_some());
    assert_eq!(stalled.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(server.cache.len().await, 1, "The refreshed session survives");

    Ok(())
}

/// A refresh token the provider rejects ends the session.
#[tokio::test]
async fn test_token_rejected_refresh_terminates_session() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("revoked", "erin", &[], 10).await;
    server
        .idp
        .mock_refresh(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })),
            Some(1),
        )
        .await;

    // Act
    let response = server.get("/auth/token", &[(SESSION_COOKIE, &cookie)]).await;

    // Assert
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(server.cache.is_empty().await, "Session should be removed");
    Ok(())
}

/// A provider outage during refresh keeps the session for a later retry.
#[tokio::test]
async fn test_token_provider_outage_keeps_session() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("outage", "frank", &[], 10).await;
    server
        .idp
        .mock_refresh(ResponseTemplate::new(503), Some(1))
        .await;

    let response = server.get("/auth/token", &[(SESSION_COOKIE, &cookie)]).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "ProviderError");
    assert_eq!(server.cache.len().await, 1);
    Ok(())
}

/// A session without a refresh token cannot be extended.
#[tokio::test]
async fn test_token_without_refresh_token_terminates_session() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let id_token = server.idp.id_token("grace", "grace@example.com", &[]);
    server
        .idp
        .mock_code_exchange("norefresh", token_response("at", None, Some(&id_token), 10))
        .await;
    let (state, state_cookie) = server.begin_login(false).await;
    let response = server
        .get(
            &format!("/auth/callback?code=norefresh&state={state}"),
            &[(auth_service::handlers::STATE_COOKIE, &state_cookie)],
        )
        .await;
    let cookie = set_cookie(&response, SESSION_COOKIE).expect("session cookie");

    // Act
    let response = server.get("/auth/token", &[(SESSION_COOKIE, &cookie)]).await;

    // Assert
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(server.cache.is_empty().await);
    Ok(())
}
