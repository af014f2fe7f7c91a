//! Browser login flow handlers.
//!
//! The session cookie carries only the signed session id. The login state
//! cookie carries the CSRF state and PKCE verifier between `/auth/login`
//! and the callback; it is `SameSite=Lax` because the callback arrives as
//! a cross-site top-level navigation from the provider.

use crate::errors::AuthError;
use crate::routes::AppState;
use crate::services::auth_service::{LoginOutcome, TokenData, LOGIN_STATE_MAX_AGE};
use crate::session::UserInfo;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "ReqDBSession";

/// Login state cookie name.
pub const STATE_COOKIE: &str = "ReqDBAuthState";

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub spa: bool,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// `GET /auth/token` response body.
#[derive(Debug, Serialize)]
pub struct TokenEnvelope {
    pub status: u16,
    pub data: TokenData,
}

/// Begin the OAuth2 flow.
///
/// GET /auth/login?spa=bool
#[instrument(name = "auth.handlers.login", skip_all)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LoginQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let redirect = state.auth.begin_login(query.spa)?;
    let jar = jar.add(state_cookie(redirect.state_cookie));
    Ok((jar, Redirect::to(&redirect.authorization_url)))
}

/// Provider redirect target for server-rendered logins.
///
/// GET /auth/callback?code&state
///
/// Responds 202 with the user's identity and sets the session cookie.
#[instrument(name = "auth.handlers.callback", skip_all)]
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let (jar, outcome) = complete(&state, query, jar, false).await?;
    Ok((StatusCode::ACCEPTED, jar, Json(outcome.userinfo)))
}

/// Provider redirect target for the browser app.
///
/// GET /auth/spaCallback?code&state
///
/// Sets the session cookie and redirects to the app with the user's
/// identity as base64 JSON in `data`.
#[instrument(name = "auth.handlers.spa_callback", skip_all)]
pub async fn spa_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let (jar, outcome) = complete(&state, query, jar, true).await?;
    let target = spa_redirect_target(state.auth.spa_callback_path(), &outcome.userinfo)?;
    Ok((jar, Redirect::temporary(&target)))
}

/// Exchange the session cookie for the current access token.
///
/// GET /auth/token
///
/// Refreshes transparently near expiry; the cookie is re-issued when the
/// session id changed.
#[instrument(name = "auth.handlers.token", skip_all)]
pub async fn token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let current = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let grant = state.auth.token(current.as_deref()).await?;

    let jar = match grant.new_session_cookie {
        Some(value) => jar.add(session_cookie(value, state.auth.session_max_age())),
        None => jar,
    };
    Ok((
        jar,
        Json(TokenEnvelope {
            status: StatusCode::OK.as_u16(),
            data: grant.data,
        }),
    ))
}

/// Terminate the session. Idempotent.
///
/// GET /auth/logout
#[instrument(name = "auth.handlers.logout", skip_all)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AuthError> {
    let current = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    state.auth.logout(current.as_deref()).await?;
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((StatusCode::NO_CONTENT, jar))
}

async fn complete(
    state: &AppState,
    query: CallbackQuery,
    jar: CookieJar,
    spa: bool,
) -> Result<(CookieJar, LoginOutcome), AuthError> {
    if let Some(error) = query.error {
        tracing::warn!(
            target: "auth.handlers",
            error = %error,
            description = query.error_description.as_deref().unwrap_or(""),
            "Identity provider returned an error to the callback"
        );
        return Err(AuthError::ProviderError(format!("authorization failed: {error}")));
    }

    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        return Err(AuthError::Unauthorized(
            "Missing authorization code or state".to_string(),
        ));
    };

    let state_cookie = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let outcome = state
        .auth
        .complete_login(&code, &returned_state, state_cookie.as_deref(), spa)
        .await?;

    let jar = jar
        .remove(Cookie::build(STATE_COOKIE).path("/auth"))
        .add(session_cookie(
            outcome.session_cookie.clone(),
            state.auth.session_max_age(),
        ));
    Ok((jar, outcome))
}

fn spa_redirect_target(spa_path: &str, userinfo: &UserInfo) -> Result<String, AuthError> {
    let payload = serde_json::to_vec(userinfo)
        .map_err(|e| AuthError::Internal(format!("userinfo serialization: {e}")))?;
    let data = STANDARD.encode(payload);
    Ok(format!("{spa_path}?data={}", urlencoding::encode(&data)))
}

/// `ReqDBSession`: HttpOnly, Secure, SameSite=Strict, max-age = session TTL.
pub fn session_cookie(value: String, max_age: Duration) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(cookie_max_age(max_age))
        .build()
}

fn state_cookie(value: String) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, value))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path("/auth")
        .max_age(cookie_max_age(LOGIN_STATE_MAX_AGE))
        .build()
}

fn cookie_max_age(max_age: Duration) -> time::Duration {
    time::Duration::seconds(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX))
}
