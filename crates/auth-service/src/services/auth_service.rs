//! The auth service: login flow, session tokens and logout.
//!
//! [`AuthService`] is built once in `main` and shared with handlers through
//! `AppState`. It owns the session store, the token validator, the
//! identity provider client and the user provisioner; handlers only
//! translate between HTTP and these operations.
//!
//! Login state machine per attempt:
//!
//! ```text
//! begin_login ──► (provider) ──► complete_login ──► session
//!                                                    │
//!                     token (refresh near expiry) ◄──┤
//!                                                    │
//!                                    logout ─────────┘
//! ```

use crate::auth::jwt::TokenValidator;
use crate::config::Config;
use crate::crypto::{self, PkcePair, TimestampSigner, AUTH_STATE_SIGNER_SALT};
use crate::errors::AuthError;
use crate::services::idp_client::IdentityProviderClient;
use crate::services::provisioner::UserProvisioner;
use crate::services::refresh_gate::RefreshGate;
use crate::session::{SessionRecord, SessionStore, TokenUpdate, UserInfo};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Lifetime of the login state cookie.
pub const LOGIN_STATE_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Per-attempt login state carried in the signed state cookie.
#[derive(Serialize, Deserialize)]
struct LoginState {
    state: String,
    verifier: String,
    spa: bool,
}

/// Where to send the browser and what to remember until the callback.
pub struct LoginRedirect {
    pub authorization_url: String,
    /// Signed value for the login state cookie.
    pub state_cookie: String,
}

impl fmt::Debug for LoginRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRedirect")
            .field("authorization_url", &self.authorization_url)
            .field("state_cookie", &"[REDACTED]")
            .finish()
    }
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub session_cookie: String,
    pub userinfo: UserInfo,
}

/// Body of `GET /auth/token`.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenData {
    pub access_token: String,
    pub expires_at: i64,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl fmt::Debug for TokenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenData")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

impl From<&SessionRecord> for TokenData {
    fn from(record: &SessionRecord) -> Self {
        Self {
            access_token: record.access_token.clone(),
            expires_at: record.expires_at,
            email: record.userinfo.email.clone(),
            roles: record.userinfo.roles.clone(),
        }
    }
}

/// Result of `token`: the data, plus a replacement cookie if the session
/// was refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub data: TokenData,
    pub new_session_cookie: Option<String>,
}

pub struct AuthService {
    sessions: SessionStore,
    validator: Arc<TokenValidator>,
    provider: IdentityProviderClient,
    provisioner: UserProvisioner,
    state_signer: TimestampSigner,
    refresh_gate: RefreshGate<TokenGrant>,
    refresh_margin: Duration,
    callback_url: String,
    spa_callback_url: String,
    spa_callback_path: String,
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("sessions", &self.sessions)
            .field("provider", &self.provider)
            .field("refresh_margin", &self.refresh_margin)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(
        config: &Config,
        sessions: SessionStore,
        validator: Arc<TokenValidator>,
        provider: IdentityProviderClient,
        provisioner: UserProvisioner,
    ) -> Self {
        Self {
            sessions,
            validator,
            provider,
            provisioner,
            state_signer: TimestampSigner::new(&config.session_secret_key, AUTH_STATE_SIGNER_SALT),
            refresh_gate: RefreshGate::new(),
            refresh_margin: config.token_refresh_margin,
            callback_url: config.callback_url(),
            spa_callback_url: config.spa_callback_url(),
            spa_callback_path: config.spa_callback_path.clone(),
        }
    }

    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn session_max_age(&self) -> Duration {
        self.sessions.max_age()
    }

    pub fn spa_callback_path(&self) -> &str {
        &self.spa_callback_path
    }

    /// Start a login attempt. No server-side state is created; the
    /// CSRF state and PKCE verifier travel in the returned signed cookie.
    ///
    /// # Errors
    ///
    /// `AuthError::Internal` if randomness fails, `ProviderError` if the
    /// authorization endpoint is unusable.
    #[instrument(skip_all, fields(spa = spa))]
    pub fn begin_login(&self, spa: bool) -> Result<LoginRedirect, AuthError> {
        let state = crypto::random_token(24).map_err(|e| AuthError::Internal(e.to_string()))?;
        let pkce = PkcePair::generate().map_err(|e| AuthError::Internal(e.to_string()))?;

        let redirect_uri = self.redirect_uri(spa);
        let authorization_url = self
            .provider
            .authorization_url(redirect_uri, &state, &pkce.challenge)?;

        let payload = serde_json::to_vec(&LoginState {
            state,
            verifier: pkce.verifier,
            spa,
        })
        .map_err(|e| AuthError::Internal(format!("login state serialization: {e}")))?;
        let state_cookie = self.state_signer.sign(&URL_SAFE_NO_PAD.encode(payload));

        tracing::debug!(target: "auth.idp", "Redirecting to identity provider");
        Ok(LoginRedirect {
            authorization_url,
            state_cookie,
        })
    }

    /// Finish a login: check state, exchange the code, validate the ID
    /// token, provision the user and start a session.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if the state cookie is missing, stale or does not
    ///   match `state`
    /// - `ProviderError` for any exchange or ID token failure
    /// - `Internal` if provisioning or the session write fails
    #[instrument(skip_all, fields(spa = spa))]
    pub async fn complete_login(
        &self,
        code: &str,
        state: &str,
        state_cookie: Option<&str>,
        spa: bool,
    ) -> Result<LoginOutcome, AuthError> {
        let login_state = self.verify_login_state(state, state_cookie, spa)?;

        let tokens = self
            .provider
            .exchange_code(code, self.redirect_uri(spa), &login_state.verifier)
            .await?;

        let id_token = tokens.id_token.as_deref().ok_or_else(|| {
            AuthError::ProviderError("token response without id_token".to_string())
        })?;
        let claims = self.validator.validate(id_token).await.map_err(|e| {
            tracing::warn!(target: "auth.idp", error = %e, "ID token from code exchange failed validation");
            AuthError::ProviderError("ID token failed validation".to_string())
        })?;

        let now = chrono::Utc::now().timestamp();
        let userinfo = UserInfo::from(&claims);
        self.provisioner.provision(&userinfo).await?;

        let record = SessionRecord {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            id_token: tokens.id_token.clone(),
            expires_at: tokens.expiry(now)?,
            userinfo: userinfo.clone(),
        };
        let session_cookie = self.sessions.start(&record).await?;

        tracing::info!(target: "auth.idp", roles = ?userinfo.roles, "Login completed");
        Ok(LoginOutcome {
            session_cookie,
            userinfo,
        })
    }

    /// Resolve the session cookie to an access token, refreshing it with
    /// the provider when it expires within the refresh margin.
    ///
    /// Concurrent calls for the same session share one refresh.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if there is no valid session, or the provider
    ///   rejected the refresh token (the session is removed)
    /// - `ProviderError` if the provider is unavailable
    #[instrument(skip_all)]
    pub async fn token(&self, session_cookie: Option<&str>) -> Result<TokenGrant, AuthError> {
        let signed = session_cookie
            .ok_or_else(|| AuthError::Unauthorized("No valid session cookie provided".to_string()))?;
        let session = self
            .sessions
            .get(signed)
            .await
            .ok_or_else(|| AuthError::Unauthorized("No valid session".to_string()))?;

        let now = chrono::Utc::now().timestamp();
        let margin = i64::try_from(self.refresh_margin.as_secs()).unwrap_or(i64::MAX);
        if session.record.expires_in(now) > margin {
            return Ok(TokenGrant {
                data: TokenData::from(&session.record),
                new_session_cookie: None,
            });
        }

        tracing::debug!(target: "auth.session", "Access token near expiry, refreshing");
        self.refresh_gate
            .run(&session.id, || self.refresh_session(&session.id))
            .await
    }

    async fn refresh_session(&self, id: &str) -> Result<TokenGrant, AuthError> {
        // A concurrent refresh may have replaced this id since it was read.
        let Some(record) = self.sessions.get_by_id(id).await else {
            tracing::debug!(target: "auth.session", "Session replaced before refresh");
            return Err(AuthError::Unauthorized("No valid session".to_string()));
        };

        let Some(refresh_token) = record.refresh_token.as_deref() else {
            tracing::info!(target: "auth.session", "Session has no refresh token, terminating");
            self.terminate(id).await;
            return Err(AuthError::Unauthorized("No valid session".to_string()));
        };

        let tokens = match self.provider.refresh(refresh_token).await {
            Ok(tokens) => tokens,
            Err(AuthError::Unauthorized(reason)) => {
                tracing::info!(target: "auth.session", "Refresh token rejected, terminating session");
                self.terminate(id).await;
                return Err(AuthError::Unauthorized(reason));
            }
            Err(e) => return Err(e),
        };

        let now = chrono::Utc::now().timestamp();
        let update = TokenUpdate {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            id_token: tokens.id_token.clone(),
            expires_at: tokens.expiry(now)?,
        };
        let (new_cookie, record) = self.sessions.refresh(id, update).await?;

        Ok(TokenGrant {
            data: TokenData::from(&record),
            new_session_cookie: Some(new_cookie),
        })
    }

    /// End the session behind `session_cookie`, if any.
    ///
    /// Provider-side revocation is best effort and never blocks local
    /// removal. Logging out without a valid session succeeds.
    ///
    /// # Errors
    ///
    /// `AuthError::Internal` if the local session cannot be removed.
    #[instrument(skip_all)]
    pub async fn logout(&self, session_cookie: Option<&str>) -> Result<(), AuthError> {
        let Some(signed) = session_cookie else {
            return Ok(());
        };
        let Some(session) = self.sessions.get(signed).await else {
            return Ok(());
        };

        self.sessions.remove(&session.id).await?;

        if let Some(refresh_token) = session.record.refresh_token.as_deref() {
            if let Err(e) = self.provider.revoke(refresh_token, "refresh_token").await {
                tracing::warn!(target: "auth.idp", error = %e, "Provider token revocation failed");
            }
        }

        tracing::info!(target: "auth.session", "Logged out");
        Ok(())
    }

    fn redirect_uri(&self, spa: bool) -> &str {
        if spa {
            &self.spa_callback_url
        } else {
            &self.callback_url
        }
    }

    fn verify_login_state(
        &self,
        state: &str,
        state_cookie: Option<&str>,
        spa: bool,
    ) -> Result<LoginState, AuthError> {
        let rejected = |reason: &str| {
            tracing::warn!(target: "auth.idp", reason, "Login callback rejected");
            AuthError::Unauthorized("Login state missing or expired".to_string())
        };

        let cookie = state_cookie.ok_or_else(|| rejected("no state cookie"))?;
        let encoded = self
            .state_signer
            .verify(cookie, LOGIN_STATE_MAX_AGE)
            .map_err(|_| rejected("state cookie signature or age"))?;
        let login_state: LoginState = URL_SAFE_NO_PAD
            .decode(encoded)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| rejected("state cookie payload"))?;

        if !constant_time_eq(login_state.state.as_bytes(), state.as_bytes()) {
            return Err(rejected("state mismatch"));
        }
        if login_state.spa != spa {
            return Err(rejected("callback endpoint mismatch"));
        }
        Ok(login_state)
    }

    /// Remove a session whose tokens can no longer be refreshed.
    async fn terminate(&self, id: &str) {
        if let Err(e) = self.sessions.remove(id).await {
            tracing::error!(target: "auth.session", error = %e, "Failed to remove terminated session");
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}
