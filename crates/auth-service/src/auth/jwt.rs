//! Bearer token validation.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The verification algorithm comes from the JWK, never from the token
//! - Issuer, audience, expiry and not-before are checked with bounded leeway
//! - Every failure becomes the same `Unauthorized`; the cause is logged

use crate::auth::claims::Claims;
use crate::auth::jwks::{KeyStore, KeyStoreError};
use crate::errors::AuthError;
use crate::observability::metrics;
use common::jwt::inspect_header;
use jsonwebtoken::{decode, Validation};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const INVALID_TOKEN: &str = "The access token is invalid or expired";

/// Validates JWTs issued by the identity provider.
#[derive(Debug)]
pub struct TokenValidator {
    key_store: Arc<KeyStore>,
    issuer: String,
    audience: String,
    leeway: Duration,
}

impl TokenValidator {
    /// # Arguments
    ///
    /// * `key_store` - source of verification keys
    /// * `issuer` - expected `iss`, from the discovery document
    /// * `audience` - expected `aud`, the OAuth client id
    /// * `leeway` - clock skew tolerance for `exp`/`nbf`
    pub fn new(key_store: Arc<KeyStore>, issuer: String, audience: String, leeway: Duration) -> Self {
        Self {
            key_store,
            issuer,
            audience,
            leeway,
        }
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// Validate a JWT and return its claims.
    ///
    /// # Errors
    ///
    /// `AuthError::Unauthorized` for every failure: malformed token,
    /// unknown `kid`, bad signature, wrong issuer or audience, expired.
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let header = inspect_header(token).map_err(|e| {
            tracing::debug!(target: "auth.jwt", error = ?e, "Token header rejected");
            reject("malformed")
        })?;

        let key = self.key_store.resolve(&header.kid).await.map_err(|e| {
            match &e {
                KeyStoreError::KeyNotFound(_) => {
                    tracing::debug!(target: "auth.jwt", kid = %header.kid, "Token signed with unknown key");
                }
                KeyStoreError::Fetch(_) | KeyStoreError::InvalidDocument(_) => {
                    tracing::warn!(target: "auth.jwt", error = %e, "Signing keys unavailable");
                }
            }
            reject("key")
        })?;

        let mut validation = Validation::new(key.algorithm);
        validation.leeway = self.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = decode::<Claims>(token, &key.decoding_key, &validation).map_err(|e| {
            tracing::debug!(target: "auth.jwt", error = %e, "Token verification failed");
            let category = match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature
                | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => "signature",
                _ => "claims",
            };
            reject(category)
        })?;

        metrics::record_token_validation("success", None);
        tracing::debug!(target: "auth.jwt", "Token validated successfully");
        Ok(data.claims)
    }
}

fn reject(category: &str) -> AuthError {
    metrics::record_token_validation("error", Some(category));
    AuthError::Unauthorized(INVALID_TOKEN.to_string())
}
