//! OAuth2 / OpenID Connect identity provider client.
//!
//! Speaks the authorization-code flow with PKCE against the endpoints
//! advertised by the provider's discovery document.
//!
//! # Security
//!
//! - Every request is bounded by the configured timeout
//! - Authorization codes are single-use; exchange failures are never retried
//! - Provider error bodies are logged at trace level only and never
//!   returned to the client
//! - Token responses have a redacting `Debug`

use crate::errors::AuthError;
use crate::observability::metrics;
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::instrument;

/// The subset of the OIDC discovery document this service uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl ProviderMetadata {
    /// Fetch and parse the discovery document.
    ///
    /// # Errors
    ///
    /// `AuthError::ProviderError` on network failure, non-success status or
    /// a document missing a required field.
    #[instrument(skip_all)]
    pub async fn discover(http_client: &Client, discovery_url: &str) -> Result<Self, AuthError> {
        let started = Instant::now();
        let result = async {
            let response = http_client
                .get(discovery_url)
                .send()
                .await
                .map_err(|e| AuthError::ProviderError(format!("discovery request failed: {e}")))?;
            if !response.status().is_success() {
                return Err(AuthError::ProviderError(format!(
                    "discovery returned {}",
                    response.status()
                )));
            }
            response
                .json::<ProviderMetadata>()
                .await
                .map_err(|e| AuthError::ProviderError(format!("invalid discovery document: {e}")))
        }
        .await;

        record("discovery", &result, started);
        if let Ok(metadata) = &result {
            tracing::info!(
                target: "auth.idp",
                issuer = %metadata.issuer,
                revocation = metadata.revocation_endpoint.is_some(),
                "Provider metadata discovered"
            );
        }
        result
    }
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl TokenResponse {
    /// Absolute access token expiry: `expires_at` if present, else
    /// `now + expires_in`.
    ///
    /// # Errors
    ///
    /// `AuthError::ProviderError` if the response carries neither, or if
    /// `expires_in` overflows.
    pub fn expiry(&self, now: i64) -> Result<i64, AuthError> {
        if let Some(expires_at) = self.expires_at {
            return Ok(expires_at);
        }
        let secs = self
            .expires_in
            .ok_or_else(|| AuthError::ProviderError("token response without expiry".to_string()))?;
        now.checked_add(secs)
            .ok_or_else(|| AuthError::ProviderError(format!("token expires_in out of range: {secs}")))
    }
}

pub struct IdentityProviderClient {
    http_client: Client,
    metadata: ProviderMetadata,
    client_id: String,
    client_secret: SecretString,
    scope: String,
}

impl fmt::Debug for IdentityProviderClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityProviderClient")
            .field("metadata", &self.metadata)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

impl IdentityProviderClient {
    pub fn new(
        http_client: Client,
        metadata: ProviderMetadata,
        client_id: String,
        client_secret: SecretString,
        scope: String,
    ) -> Self {
        Self {
            http_client,
            metadata,
            client_id,
            client_secret,
            scope,
        }
    }

    /// Build an HTTP client bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// `AuthError::Internal` if the client cannot be built.
    pub fn http_client(timeout: Duration) -> Result<Client, AuthError> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                tracing::error!(target: "auth.idp", error = %e, "Failed to build HTTP client");
                AuthError::Internal(format!("http client: {e}"))
            })
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The provider authorize URL for one login attempt.
    ///
    /// # Errors
    ///
    /// `AuthError::ProviderError` if the advertised endpoint is not a URL.
    pub fn authorization_url(
        &self,
        redirect_uri: &str,
        state: &str,
        pkce_challenge: &str,
    ) -> Result<String, AuthError> {
        Url::parse_with_params(
            &self.metadata.authorization_endpoint,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", self.scope.as_str()),
                ("state", state),
                ("code_challenge", pkce_challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .map(String::from)
        .map_err(|e| AuthError::ProviderError(format!("invalid authorization endpoint: {e}")))
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// `AuthError::ProviderError` for any failure, including rejection.
    #[instrument(skip_all)]
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", pkce_verifier),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        self.token_request("code_exchange", &form)
            .await
            .map_err(|failure| match failure {
                TokenFailure::Rejected(status) => {
                    AuthError::ProviderError(format!("code exchange rejected: {status}"))
                }
                TokenFailure::Unavailable(detail) => AuthError::ProviderError(detail),
            })
    }

    /// Exchange a refresh token for new tokens.
    ///
    /// # Errors
    ///
    /// - `AuthError::Unauthorized` if the provider rejects the refresh token
    /// - `AuthError::ProviderError` for network and server failures
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", self.scope.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        self.token_request("refresh", &form)
            .await
            .map_err(|failure| match failure {
                TokenFailure::Rejected(_) => {
                    AuthError::Unauthorized("Session expired, please log in again".to_string())
                }
                TokenFailure::Unavailable(detail) => AuthError::ProviderError(detail),
            })
    }

    /// Revoke a token (RFC 7009). A provider without a revocation
    /// endpoint is a no-op.
    ///
    /// # Errors
    ///
    /// `AuthError::ProviderError` if the provider call fails.
    #[instrument(skip_all)]
    pub async fn revoke(&self, token: &str, token_type_hint: &str) -> Result<(), AuthError> {
        let Some(endpoint) = self.metadata.revocation_endpoint.as_deref() else {
            return Ok(());
        };
        let started = Instant::now();
        let form = [
            ("token", token),
            ("token_type_hint", token_type_hint),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        let result = async {
            let response = self
                .http_client
                .post(endpoint)
                .form(&form)
                .send()
                .await
                .map_err(|e| AuthError::ProviderError(format!("revocation request failed: {e}")))?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(AuthError::ProviderError(format!(
                    "revocation returned {}",
                    response.status()
                )))
            }
        }
        .await;
        record("revoke", &result, started);
        result
    }

    async fn token_request(
        &self,
        operation: &'static str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, TokenFailure> {
        let started = Instant::now();
        tracing::debug!(target: "auth.idp", operation, "Calling token endpoint");

        let result = async {
            let response = self
                .http_client
                .post(&self.metadata.token_endpoint)
                .form(form)
                .send()
                .await
                .map_err(|e| {
                    let kind = if e.is_timeout() { "timed out" } else { "failed" };
                    TokenFailure::Unavailable(format!("token request {kind}: {e}"))
                })?;

            let status = response.status();
            if status.is_success() {
                return response.json::<TokenResponse>().await.map_err(|e| {
                    TokenFailure::Unavailable(format!("invalid token response: {e}"))
                });
            }

            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            tracing::trace!(target: "auth.idp", body = %body, "Token endpoint error body");

            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                tracing::warn!(target: "auth.idp", operation, status = %status, "Token request rejected by provider");
                Err(TokenFailure::Rejected(status))
            } else {
                tracing::warn!(target: "auth.idp", operation, status = %status, "Token endpoint error");
                Err(TokenFailure::Unavailable(format!("token endpoint returned {status}")))
            }
        }
        .await;

        let status = match &result {
            Ok(_) => "success",
            Err(TokenFailure::Rejected(_)) => "rejected",
            Err(TokenFailure::Unavailable(_)) => "error",
        };
        metrics::record_idp_request(operation, status, started.elapsed());
        result
    }
}

enum TokenFailure {
    Rejected(StatusCode),
    Unavailable(String),
}

fn record<T>(operation: &str, result: &Result<T, AuthError>, started: Instant) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::record_idp_request(operation, status, started.elapsed());
}
