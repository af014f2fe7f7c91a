//! E2E tests for the browser login flow.
//!
//! Drives `/auth/login`, `/auth/callback`, `/auth/spaCallback` and
//! `/auth/logout` against a mock identity provider.
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use auth_service::handlers::{SESSION_COOKIE, STATE_COOKIE};
use auth_service::services::AuditAction;
use auth_test_utils::mock_idp::token_response;
use auth_test_utils::server_harness::{
    body_json, location, query_param, set_cookie, set_cookie_header, TestAuthServer,
};
use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

// ============================================================================
// Login redirect
// ============================================================================

/// `/auth/login` redirects to the provider's authorize endpoint with PKCE
/// and the JSON callback as redirect URI.
#[tokio::test]
async fn test_login_redirects_to_provider_with_pkce() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;

    // Act
    let response = server.get("/auth/login", &[]).await;

    // Assert
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location(&response);
    assert!(
        target.starts_with(&format!("{}/authorize?", server.idp.uri())),
        "Should redirect to the provider, got {target}"
    );
    assert_eq!(query_param(&target, "response_type").as_deref(), Some("code"));
    assert_eq!(query_param(&target, "client_id").as_deref(), Some("reqdb-client"));
    assert_eq!(
        query_param(&target, "redirect_uri").as_deref(),
        Some("https%3A%2F%2Freqdb.example.com%2Fauth%2Fcallback")
    );
    assert_eq!(
        query_param(&target, "code_challenge_method").as_deref(),
        Some("S256")
    );
    assert!(query_param(&target, "code_challenge").is_some());
    assert!(query_param(&target, "state").is_some());
    assert!(query_param(&target, "scope").is_some_and(|s| s.contains("offline_access")));

    let cookie = set_cookie_header(&response, STATE_COOKIE).expect("state cookie must be set");
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/auth"));

    Ok(())
}

/// Each login attempt gets its own state.
#[tokio::test]
async fn test_login_state_is_unique_per_attempt() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let (first, _) = server.begin_login(false).await;
    let (second, _) = server.begin_login(false).await;

    assert_ne!(first, second);
    Ok(())
}

/// `spa=true` registers the browser-app callback as redirect URI.
#[tokio::test]
async fn test_login_spa_uses_spa_callback() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let response = server.get("/auth/login?spa=true", &[]).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        query_param(&location(&response), "redirect_uri").as_deref(),
        Some("https%3A%2F%2Freqdb.example.com%2Fauth%2FspaCallback")
    );
    Ok(())
}

// ============================================================================
// Callback
// ============================================================================

/// A valid callback creates a session, provisions the user and returns the
/// identity with 202.
#[tokio::test]
async fn test_callback_happy_path_creates_session_and_user() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let id_token = server
        .idp
        .id_token("alice", "alice@example.com", &["Requirements.Reader"]);
    server
        .idp
        .mock_code_exchange(
            "validcode",
            token_response("access-1", Some("refresh-1"), Some(&id_token), 3600),
        )
        .await;
    let (state, state_cookie) = server.begin_login(false).await;

    // Act
    let response = server
        .get(
            &format!("/auth/callback?code=validcode&state={state}"),
            &[(STATE_COOKIE, &state_cookie)],
        )
        .await;

    // Assert
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let session_header =
        set_cookie_header(&response, SESSION_COOKIE).expect("session cookie must be set");
    assert!(session_header.contains("HttpOnly"));
    assert!(session_header.contains("Secure"));
    assert!(session_header.contains("SameSite=Strict"));
    assert!(session_header.contains("Path=/"));

    let body = body_json(response).await;
    assert_eq!(body["sub"], "alice");
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["roles"], serde_json::json!(["Requirements.Reader"]));

    assert_eq!(server.users.len().await, 1, "First login should provision the user");
    let records = server.audit.records().await;
    assert_eq!(records.len(), 1, "Provisioning should write one audit record");
    assert_eq!(records[0].action, AuditAction::Insert);
    assert_eq!(server.cache.len().await, 1, "One session should be stored");

    Ok(())
}

/// The stored session is sealed: the access token never appears in the
/// cache value.
#[tokio::test]
async fn test_callback_session_is_encrypted_at_rest() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let _cookie = server.log_in("sealed", "bob", &[], 3600).await;

    assert_eq!(server.cache.len().await, 1);
    let sealed = server
        .cache
        .values()
        .await
        .pop()
        .expect("one session stored");
    assert!(!sealed.contains("at-sealed"));
    assert!(!sealed.contains("rt-sealed"));
    Ok(())
}

/// Logging in twice as the same subject provisions once.
#[tokio::test]
async fn test_callback_returning_user_is_not_reprovisioned() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    server.log_in("first", "carol", &[], 3600).await;
    server.log_in("second", "carol", &[], 3600).await;

    assert_eq!(server.users.len().await, 1);
    assert_eq!(server.audit.records().await.len(), 1);
    assert_eq!(server.cache.len().await, 2, "Each login starts its own session");
    Ok(())
}

/// A callback whose state does not match the login cookie is rejected.
#[tokio::test]
async fn test_callback_state_mismatch_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let (_state, state_cookie) = server.begin_login(false).await;

    let response = server
        .get(
            "/auth/callback?code=validcode&state=forged-state",
            &[(STATE_COOKIE, &state_cookie)],
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookie(&response, SESSION_COOKIE).is_none());
    assert_eq!(server.users.len().await, 0);
    Ok(())
}

/// Without the login state cookie the callback is rejected.
#[tokio::test]
async fn test_callback_without_state_cookie_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let (state, _) = server.begin_login(false).await;

    let response = server
        .get(&format!("/auth/callback?code=validcode&state={state}"), &[])
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Unauthorized");
    Ok(())
}

/// A state issued for the browser-app flow cannot complete the JSON flow.
#[tokio::test]
async fn test_callback_with_spa_state_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let (state, state_cookie) = server.begin_login(true).await;

    let response = server
        .get(
            &format!("/auth/callback?code=validcode&state={state}"),
            &[(STATE_COOKIE, &state_cookie)],
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// Missing code is a 401, not a provider call.
#[tokio::test]
async fn test_callback_missing_code_returns_401() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let (state, state_cookie) = server.begin_login(false).await;

    let response = server
        .get(
            &format!("/auth/callback?state={state}"),
            &[(STATE_COOKIE, &state_cookie)],
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// An `error` from the provider surfaces as a provider failure.
#[tokio::test]
async fn test_callback_provider_error_returns_500() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;

    let response = server
        .get("/auth/callback?error=access_denied&error_description=nope", &[])
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "ProviderError");
    Ok(())
}

/// An ID token signed by an unknown key fails the login.
#[tokio::test]
async fn test_callback_forged_id_token_is_rejected() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let forger = auth_test_utils::TestKeypair::new(99, "idp-key-1");
    let forged = server
        .idp
        .token_builder()
        .subject("mallory")
        .sign(&forger);
    server
        .idp
        .mock_code_exchange(
            "forged",
            token_response("access", Some("refresh"), Some(&forged), 3600),
        )
        .await;
    let (state, state_cookie) = server.begin_login(false).await;

    let response = server
        .get(
            &format!("/auth/callback?code=forged&state={state}"),
            &[(STATE_COOKIE, &state_cookie)],
        )
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(set_cookie(&response, SESSION_COOKIE).is_none());
    assert_eq!(server.users.len().await, 0);
    assert!(server.cache.is_empty().await);
    Ok(())
}

/// The browser-app callback redirects with the identity in `data`.
#[tokio::test]
async fn test_spa_callback_redirects_with_userinfo() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let id_token = server.idp.id_token("dave", "dave@example.com", &["Admin"]);
    server
        .idp
        .mock_code_exchange(
            "spacode",
            token_response("access", Some("refresh"), Some(&id_token), 3600),
        )
        .await;
    let (state, state_cookie) = server.begin_login(true).await;

    // Act
    let response = server
        .get(
            &format!("/auth/spaCallback?code=spacode&state={state}"),
            &[(STATE_COOKIE, &state_cookie)],
        )
        .await;

    // Assert
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(set_cookie(&response, SESSION_COOKIE).is_some());
    let target = location(&response);
    assert!(target.starts_with("/oauth/callback?data="), "got {target}");

    let data = query_param(&target, "data").expect("data parameter");
    let data = urlencoding::decode(&data)?;
    let userinfo: serde_json::Value = serde_json::from_slice(&STANDARD.decode(data.as_bytes())?)?;
    assert_eq!(userinfo["sub"], "dave");
    assert_eq!(userinfo["roles"], serde_json::json!(["Admin"]));
    Ok(())
}

// ============================================================================
// Logout
// ============================================================================

/// Logout removes the session, revokes the refresh token and clears the
/// cookie; the old cookie no longer yields a token.
#[tokio::test]
async fn test_logout_terminates_session() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("logout", "erin", &[], 3600).await;
    server.idp.mock_revocation(200, 1).await;

    // Act
    let response = server.get("/auth/logout", &[(SESSION_COOKIE, &cookie)]).await;

    // Assert
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cleared = set_cookie_header(&response, SESSION_COOKIE).expect("cookie must be cleared");
    assert!(cleared.contains("Max-Age=0"), "got {cleared}");
    assert!(server.cache.is_empty().await);

    let response = server.get("/auth/token", &[(SESSION_COOKIE, &cookie)]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

/// Logout without a session, or twice, still succeeds.
#[tokio::test]
async fn test_logout_is_idempotent() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("twice", "frank", &[], 3600).await;
    server.idp.mock_revocation(200, 1).await;

    let first = server.get("/auth/logout", &[(SESSION_COOKIE, &cookie)]).await;
    let second = server.get("/auth/logout", &[(SESSION_COOKIE, &cookie)]).await;
    let anonymous = server.get("/auth/logout", &[]).await;

    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    assert_eq!(second.status(), StatusCode::NO_CONTENT);
    assert_eq!(anonymous.status(), StatusCode::NO_CONTENT);
    Ok(())
}

/// A failing revocation endpoint does not block logout.
#[tokio::test]
async fn test_logout_survives_revocation_failure() -> Result<(), anyhow::Error> {
    let server = TestAuthServer::start().await;
    let cookie = server.log_in("revokefail", "grace", &[], 3600).await;
    server.idp.mock_revocation(503, 1).await;

    let response = server.get("/auth/logout", &[(SESSION_COOKIE, &cookie)]).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(server.cache.is_empty().await);
    Ok(())
}
