//! Auth service error types.
//!
//! Every failure the subsystem can surface to a client is an [`AuthError`].
//! The `IntoResponse` impl is the single place where errors become HTTP
//! responses: a `{status, error, message}` JSON body with a generic message.
//! Internal causes (decryption failures, provider response bodies, database
//! errors) are logged here and never echoed to the client.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Auth service error type.
///
/// Maps to HTTP status codes:
/// - Unauthorized, InvalidSession, KeyNotFound: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - AuthConfigMissing, ProviderError, Internal: 500 Internal Server Error
///
/// `Clone` so a single refresh outcome can be handed to every caller that
/// waited on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Missing, invalid or expired credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Valid identity, insufficient role.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A route has no declared access policy. Deployment defect.
    #[error("Authentication configuration missing: {0}")]
    AuthConfigMissing(String),

    /// Signature, age or decryption failure on a session id.
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// Token `kid` unresolvable even after one JWKS refresh.
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// Discovery, token endpoint or JWKS endpoint failure.
    #[error("Identity provider error: {0}")]
    ProviderError(String),

    /// Session store, database or crypto failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Unauthorized(_)
            | AuthError::InvalidSession(_)
            | AuthError::KeyNotFound(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::AuthConfigMissing(_)
            | AuthError::ProviderError(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error name used in the `error` field of the response body.
    pub fn name(&self) -> &'static str {
        match self {
            AuthError::Unauthorized(_) => "Unauthorized",
            AuthError::Forbidden(_) => "Forbidden",
            AuthError::AuthConfigMissing(_) => "AuthConfigMissing",
            AuthError::InvalidSession(_) => "InvalidSession",
            AuthError::KeyNotFound(_) => "KeyNotFound",
            AuthError::ProviderError(_) => "ProviderError",
            AuthError::Internal(_) => "InternalError",
        }
    }

    /// Message shown to the client. Never contains internal detail.
    fn public_message(&self) -> String {
        match self {
            AuthError::Unauthorized(reason) => reason.clone(),
            AuthError::Forbidden(_) => "Missing a needed role for this request.".to_string(),
            AuthError::InvalidSession(_) => "No valid session".to_string(),
            AuthError::KeyNotFound(_) => "The access token is invalid or expired".to_string(),
            AuthError::AuthConfigMissing(_) => {
                "Authentication configuration missing for this route".to_string()
            }
            AuthError::ProviderError(_) => {
                "The identity provider could not complete the request".to_string()
            }
            AuthError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    error: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            AuthError::AuthConfigMissing(route) => {
                tracing::error!(target: "auth.errors", route = %route, "Route reached without an access policy");
            }
            AuthError::ProviderError(detail) => {
                tracing::error!(target: "auth.errors", detail = %detail, "Identity provider failure");
            }
            AuthError::Internal(detail) => {
                tracing::error!(target: "auth.errors", detail = %detail, "Internal auth failure");
            }
            AuthError::InvalidSession(detail) | AuthError::KeyNotFound(detail) => {
                tracing::debug!(target: "auth.errors", detail = %detail, error = self.name(), "Rejected credentials");
            }
            AuthError::Forbidden(detail) => {
                tracing::debug!(target: "auth.errors", detail = %detail, "Insufficient role");
            }
            AuthError::Unauthorized(_) => {}
        }

        let body = ErrorBody {
            status: status.as_u16(),
            error: self.name(),
            message: self.public_message(),
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"reqdb\", error=\"invalid_token\""),
            );
        }

        response
    }
}
