//! Route-level access control.
//!
//! [`enforce_route_policy`] runs before every routed handler:
//!
//! 1. Look up the route's policy; a miss is `AuthConfigMissing`
//! 2. Public routes continue without credentials
//! 3. Otherwise the bearer token is validated
//! 4. A non-empty role requirement must intersect the token's roles
//!
//! Validated claims are stored in request extensions, where handlers read
//! them through the [`CurrentUser`] extractor. Handlers never repeat the
//! authorization decision.

use crate::auth::{Claims, TokenValidator};
use crate::errors::AuthError;
use crate::observability::metrics;
use crate::routes::policy::{PolicyTable, RoutePolicy};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

/// Holds the startup-built policy table and the token validator.
#[derive(Debug)]
pub struct AccessController {
    policies: PolicyTable,
    validator: Arc<TokenValidator>,
}

impl AccessController {
    pub fn new(policies: PolicyTable, validator: Arc<TokenValidator>) -> Self {
        Self {
            policies,
            validator,
        }
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Decide whether a request to `route` may proceed.
    ///
    /// Returns the caller's claims, or `None` for a public route.
    ///
    /// # Errors
    ///
    /// - `AuthConfigMissing` if `route` has no policy
    /// - `Unauthorized` for a missing or invalid bearer token
    /// - `Forbidden` if no required role is held
    #[instrument(skip(self, headers), fields(route = %route))]
    pub async fn authorize(
        &self,
        route: &str,
        headers: &HeaderMap,
    ) -> Result<Option<Claims>, AuthError> {
        let result = match self.policies.get(route) {
            Some(policy) => self.require_roles(policy, headers).await,
            None => {
                tracing::error!(target: "auth.access", route = %route, "No access policy for route, refusing request");
                Err(AuthError::AuthConfigMissing(route.to_string()))
            }
        };

        metrics::record_access_decision(match &result {
            Ok(_) => "allowed",
            Err(AuthError::Forbidden(_)) => "forbidden",
            Err(AuthError::AuthConfigMissing(_)) => "config_missing",
            Err(_) => "unauthorized",
        });
        result
    }

    /// Enforce `policy` against the request's bearer token.
    ///
    /// # Errors
    ///
    /// `Unauthorized` or `Forbidden` as for [`AccessController::authorize`].
    pub async fn require_roles(
        &self,
        policy: &RoutePolicy,
        headers: &HeaderMap,
    ) -> Result<Option<Claims>, AuthError> {
        if !policy.auth_required() {
            return Ok(None);
        }

        let token = extract_bearer_token(headers)?;
        let claims = self.validator.validate(token).await?;

        if !policy.permits(&claims.roles) {
            tracing::debug!(
                target: "auth.access",
                held = ?claims.roles,
                "Token holds none of the required roles"
            );
            return Err(AuthError::Forbidden(
                "Insufficient role for this operation".to_string(),
            ));
        }
        Ok(Some(claims))
    }
}

/// Middleware state: the controller plus the name of the guarded route.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    access: Arc<AccessController>,
    route: &'static str,
}

impl RouteGuard {
    pub fn new(access: Arc<AccessController>, route: &'static str) -> Self {
        Self { access, route }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "auth.access", "Missing Authorization header");
            AuthError::Unauthorized("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "auth.access", "Invalid Authorization header format");
        AuthError::Unauthorized("Invalid Authorization header format".to_string())
    })
}

/// Access control middleware, attached per route by `ProtectedRouter`.
#[instrument(skip_all, name = "auth.middleware.access")]
pub async fn enforce_route_policy(
    State(guard): State<RouteGuard>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    if let Some(claims) = guard.access.authorize(guard.route, req.headers()).await? {
        req.extensions_mut().insert(claims);
    }
    Ok(next.run(req).await)
}

/// The authenticated caller of a protected route.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Claims);

impl CurrentUser {
    /// Subject id of the caller.
    pub fn user_id(&self) -> &str {
        &self.0.sub
    }

    /// Roles held by the caller.
    pub fn roles(&self) -> BTreeSet<&str> {
        self.0.role_set()
    }

    pub fn claims(&self) -> &Claims {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AuthError::Unauthorized("Authentication required".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::KeyStore;
    use auth_test_utils::{mock_idp::jwks_body, TestKeypair, TokenBuilder};
    use axum::{
        body::Body,
        http::{header, Request as HttpRequest, StatusCode},
        routing::get,
        Router,
    };
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ISSUER: &str = "https://idp.example.com";
    const AUDIENCE: &str = "reqdb-client";

    async fn controller(key: &TestKeypair, policies: PolicyTable) -> (MockServer, Arc<AccessController>) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(&[key])))
            .mount(&server)
            .await;
        let store = Arc::new(KeyStore::new(
            format!("{}/jwks", server.uri()),
            Duration::from_secs(5),
        ));
        let validator = Arc::new(TokenValidator::new(
            store,
            ISSUER.to_string(),
            AUDIENCE.to_string(),
            Duration::from_secs(60),
        ));
        (server, Arc::new(AccessController::new(policies, validator)))
    }

    fn policies() -> PolicyTable {
        PolicyTable::new()
            .declare("health", RoutePolicy::public())
            .unwrap()
            .declare("me", RoutePolicy::authenticated())
            .unwrap()
            .declare("write", RoutePolicy::roles(["Requirements.Writer"]))
            .unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_public_route_needs_no_token() {
        let key = TestKeypair::new(1, "key-1");
        let (_server, access) = controller(&key, policies()).await;
        assert!(access.authorize("health", &HeaderMap::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_route_fails_closed() {
        let key = TestKeypair::new(1, "key-1");
        let (_server, access) = controller(&key, policies()).await;
        let token = TokenBuilder::new(ISSUER, AUDIENCE).sign(&key);

        let result = access.authorize("unlisted", &bearer(&token)).await;
        assert!(matches!(result, Err(AuthError::AuthConfigMissing(_))));
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header_is_unauthorized() {
        let key = TestKeypair::new(1, "key-1");
        let (_server, access) = controller(&key, policies()).await;

        assert!(matches!(
            access.authorize("me", &HeaderMap::new()).await,
            Err(AuthError::Unauthorized(_))
        ));

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, "Basic dXNlcjpwdw==".parse().unwrap());
        assert!(matches!(
            access.authorize("me", &basic).await,
            Err(AuthError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_token_without_roles_claim_is_forbidden() {
        let key = TestKeypair::new(1, "key-1");
        let (_server, access) = controller(&key, policies()).await;
        let token = TokenBuilder::new(ISSUER, AUDIENCE).without_roles().sign(&key);

        assert!(matches!(
            access.authorize("write", &bearer(&token)).await,
            Err(AuthError::Forbidden(_))
        ));
        // The same token is fine where no role is required.
        assert!(access.authorize("me", &bearer(&token)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_matching_role_is_allowed() {
        let key = TestKeypair::new(1, "key-1");
        let (_server, access) = controller(&key, policies()).await;
        let token = TokenBuilder::new(ISSUER, AUDIENCE)
            .subject("user-7")
            .roles(["Requirements.Reader", "Requirements.Writer"])
            .sign(&key);

        let claims = access.authorize("write", &bearer(&token)).await.unwrap().unwrap();
        assert_eq!(claims.sub, "user-7");
    }

    #[tokio::test]
    async fn test_middleware_injects_current_user() {
        let key = TestKeypair::new(1, "key-1");
        let (_server, access) = controller(&key, policies()).await;
        let token = TokenBuilder::new(ISSUER, AUDIENCE).subject("user-9").sign(&key);

        async fn whoami(user: CurrentUser) -> String {
            user.user_id().to_string()
        }

        let app = Router::new().route(
            "/me",
            get(whoami).route_layer(axum::middleware::from_fn_with_state(
                RouteGuard::new(Arc::clone(&access), "me"),
                enforce_route_policy,
            )),
        );

        let response = app
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/me")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"user-9");

        let response = app
            .oneshot(HttpRequest::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unpoliced_guard_yields_500() {
        let key = TestKeypair::new(1, "key-1");
        let (_server, access) = controller(&key, policies()).await;

        let app = Router::new().route(
            "/secret",
            get(|| async { "secret" }).route_layer(axum::middleware::from_fn_with_state(
                RouteGuard::new(access, "secret"),
                enforce_route_policy,
            )),
        );

        let response = app
            .oneshot(HttpRequest::builder().uri("/secret").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
