//! Test server harness for end-to-end testing
//!
//! Builds the complete auth service router against a [`MockIdentityProvider`],
//! with the in-memory session cache, user directory and audit recorder, and
//! drives it through `tower::ServiceExt::oneshot`.

use crate::crypto_fixtures::test_session_key_b64;
use crate::mock_idp::{token_response, MockIdentityProvider};
use auth_service::auth::{KeyStore, TokenValidator};
use auth_service::config::Config;
use auth_service::crypto::SessionCipher;
use auth_service::handlers::{SESSION_COOKIE, STATE_COOKIE};
use auth_service::middleware::AccessController;
use auth_service::repositories::{InMemoryAuditRecorder, InMemoryUserDirectory};
use auth_service::routes::{build_routes, default_policies, AppState};
use auth_service::services::{AuthService, IdentityProviderClient, ProviderMetadata, UserProvisioner};
use auth_service::session::{MemorySessionCache, SessionCache, SessionCacheError, SessionStore};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower::ServiceExt;

/// OAuth client id the harness registers with the mock provider.
pub const TEST_CLIENT_ID: &str = "reqdb-client";

/// Session signing secret used by the harness.
pub const TEST_SESSION_SECRET: &str = "test-session-secret-0123456789abcdef";

/// Public base URL the harness configures.
pub const TEST_BASE_URL: &str = "https://reqdb.example.com";

/// A fully wired auth service backed by in-memory collaborators.
pub struct TestAuthServer {
    pub idp: MockIdentityProvider,
    pub config: Config,
    pub app: Router,
    pub auth: Arc<AuthService>,
    pub validator: Arc<TokenValidator>,
    pub cache: Arc<MemorySessionCache>,
    pub users: Arc<InMemoryUserDirectory>,
    pub audit: Arc<InMemoryAuditRecorder>,
    session_cache: Arc<StallingSessionCache>,
}

/// Session cache that can hold back the result of one read.
///
/// The value is fetched before the stall, so the caller sees the entry as
/// it was when the read started.
struct StallingSessionCache {
    inner: Arc<MemorySessionCache>,
    stall_next_read: Mutex<Option<Duration>>,
}

#[async_trait]
impl SessionCache for StallingSessionCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionCacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionCacheError> {
        let value = self.inner.get(key).await?;
        let stall = self.stall_next_read.lock().await.take();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), SessionCacheError> {
        self.inner.delete(key).await
    }
}

impl TestAuthServer {
    pub async fn start() -> Self {
        Self::start_with_vars(&[]).await
    }

    /// Start with extra or overriding environment variables.
    pub async fn start_with_vars(overrides: &[(&str, &str)]) -> Self {
        let idp = MockIdentityProvider::start(TEST_CLIENT_ID).await;

        let mut vars: HashMap<String, String> = [
            ("OAUTH_CONFIG", idp.discovery_url()),
            ("OAUTH_CLIENT_ID", TEST_CLIENT_ID.to_string()),
            ("OAUTH_CLIENT_SECRET", "test-client-secret".to_string()),
            ("SESSION_SECRET_KEY", TEST_SESSION_SECRET.to_string()),
            ("SESSION_ENCRYPTION_KEY", test_session_key_b64()),
            ("SESSION_BACKEND", "memory".to_string()),
            ("BASE_URL", TEST_BASE_URL.to_string()),
            ("IDP_TIMEOUT_SECONDS", "5".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        for (k, v) in overrides {
            vars.insert((*k).to_string(), (*v).to_string());
        }
        let config = Config::from_vars(&vars).expect("harness config must be valid");

        let http_client = IdentityProviderClient::http_client(config.idp_timeout)
            .expect("HTTP client must build");
        let metadata = ProviderMetadata::discover(&http_client, &config.oauth_discovery_url)
            .await
            .expect("mock discovery must succeed");

        let key_store = Arc::new(KeyStore::with_client(
            metadata.jwks_uri.clone(),
            http_client.clone(),
        ));
        let validator = Arc::new(TokenValidator::new(
            key_store,
            metadata.issuer.clone(),
            config.oauth_client_id.clone(),
            config.jwt_clock_skew,
        ));
        let provider = IdentityProviderClient::new(
            http_client,
            metadata,
            config.oauth_client_id.clone(),
            config.oauth_client_secret.clone(),
            config.oauth_scope.clone(),
        );

        let cipher = SessionCipher::from_base64(
            config
                .session_encryption_key
                .as_ref()
                .expect("harness sets SESSION_ENCRYPTION_KEY"),
        )
        .expect("fixture key must be valid");
        let cache = Arc::new(MemorySessionCache::new());
        let session_cache = Arc::new(StallingSessionCache {
            inner: cache.clone(),
            stall_next_read: Mutex::new(None),
        });
        let sessions = SessionStore::new(
            session_cache.clone(),
            cipher,
            &config.session_secret_key,
            config.session_max_age,
            config.cache_timeout,
        );

        let users = Arc::new(InMemoryUserDirectory::new());
        let audit = Arc::new(InMemoryAuditRecorder::new());
        let auth = Arc::new(AuthService::new(
            &config,
            sessions,
            Arc::clone(&validator),
            provider,
            UserProvisioner::new(users.clone(), audit.clone()),
        ));

        let access = Arc::new(AccessController::new(
            default_policies().expect("default policies must be valid"),
            Arc::clone(&validator),
        ));
        let state = Arc::new(AppState {
            auth: Arc::clone(&auth),
            metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
        });
        let app = build_routes(state, access).expect("service routes must all have policies");

        Self {
            idp,
            config,
            app,
            auth,
            validator,
            cache,
            users,
            audit,
            session_cache,
        }
    }

    /// Hold back the result of the next session cache read by `stall`.
    pub async fn stall_next_session_read(&self, stall: Duration) {
        *self.session_cache.stall_next_read.lock().await = Some(stall);
    }

    /// `GET uri` with the given cookies.
    pub async fn get(&self, uri: &str, cookies: &[(&str, &str)]) -> Response {
        let mut request = Request::builder().method("GET").uri(uri);
        if !cookies.is_empty() {
            let cookie_header = cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(header::COOKIE, cookie_header);
        }
        self.send(request.body(Body::empty()).expect("request must build"))
            .await
    }

    /// `GET uri` with `Authorization: Bearer <token>`.
    pub async fn get_with_bearer(&self, uri: &str, token: &str) -> Response {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request must build");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// `GET /auth/login` and return the `state` parameter of the redirect
    /// and the login state cookie.
    pub async fn begin_login(&self, spa: bool) -> (String, String) {
        let response = self.get(&format!("/auth/login?spa={spa}"), &[]).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = location(&response);
        let state = query_param(&location, "state").expect("authorize URL must carry state");
        let state_cookie = set_cookie(&response, STATE_COOKIE).expect("login must set the state cookie");
        (state, state_cookie)
    }

    /// Complete a login for `subject` through `/auth/callback` and return
    /// the session cookie value.
    ///
    /// The provider answers `code` with an access token expiring in
    /// `expires_in` seconds, refresh token `rt-{code}` and a valid ID token.
    pub async fn log_in(&self, code: &str, subject: &str, roles: &[&str], expires_in: i64) -> String {
        let id_token = self
            .idp
            .id_token(subject, &format!("{subject}@example.com"), roles);
        self.idp
            .mock_code_exchange(
                code,
                token_response(
                    &format!("at-{code}"),
                    Some(&format!("rt-{code}")),
                    Some(&id_token),
                    expires_in,
                ),
            )
            .await;

        let (state, state_cookie) = self.begin_login(false).await;
        let response = self
            .get(
                &format!("/auth/callback?code={code}&state={state}"),
                &[(STATE_COOKIE, &state_cookie)],
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        set_cookie(&response, SESSION_COOKIE).expect("callback must set the session cookie")
    }
}

/// Value of the `Set-Cookie` header for `name`, if the response sets it.
pub fn set_cookie(response: &Response, name: &str) -> Option<String> {
    set_cookie_header(response, name).and_then(|header| {
        header
            .split(';')
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(_, value)| value.to_string())
    })
}

/// Full `Set-Cookie` header line for `name`.
pub fn set_cookie_header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

/// The `Location` header.
pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("response must carry Location")
        .to_string()
}

/// Raw (still percent-encoded) value of query parameter `name` in `url`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body must be readable")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body must be JSON")
}
