//! JWT helpers shared by the auth service and its test utilities.
//!
//! Everything in here runs BEFORE signature verification, so none of it
//! may be trusted on its own:
//! - Size limit for DoS prevention
//! - Clock skew constants used as validation leeway
//! - Header inspection (`kid`, `alg`) to pick a key from the JWKS
//! - Base64url decoding of JWK key components
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Error messages are generic; the detailed cause is logged at debug level
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{inspect_header, MAX_JWT_SIZE_BYTES};
//!
//! let header = inspect_header(token)?;
//! let key = key_store.resolve(&header.kid).await?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Identity provider access tokens carrying group/role claims are larger
/// than service tokens, but anything past 8KB is rejected before base64
/// decoding or any cryptographic work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance applied to `exp`/`nbf` checks (1 minute).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Maximum configurable clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while inspecting an unverified JWT.
///
/// All variants render the same message so nothing about the failure
/// reaches a client through `Display`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a three-part JWS compact serialization.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token header has no usable `kid`.
    #[error("The access token is invalid or expired")]
    MissingKid,
}

// =============================================================================
// Header inspection
// =============================================================================

/// The parts of a JWT header needed to select a verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Key ID naming the JWKS entry that signed the token.
    pub kid: String,

    /// Declared signing algorithm (e.g. `RS256`, `EdDSA`).
    pub alg: String,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default)]
    kid: Option<serde_json::Value>,
    #[serde(default)]
    alg: Option<String>,
}

/// Read `kid` and `alg` from a JWT header without verifying the signature.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - wrong structure, bad base64, invalid JSON or no `alg`
/// - `MissingKid` - `kid` absent, empty or not a string
pub fn inspect_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let header_part = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(_), Some(_), None) if !header.is_empty() => header,
        _ => {
            tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
            return Err(JwtValidationError::MalformedToken);
        }
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let alg = header
        .alg
        .filter(|a| !a.is_empty())
        .ok_or(JwtValidationError::MalformedToken)?;

    let kid = header
        .kid
        .as_ref()
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)?;

    Ok(TokenHeader { kid, alg })
}

/// Shorthand for `inspect_header(token)?.kid`.
///
/// # Errors
///
/// Same as [`inspect_header`].
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    inspect_header(token).map(|h| h.kid)
}

/// Decode a base64url (unpadded) JWK component such as an OKP `x` value.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the value is not valid base64url.
pub fn decode_jwk_component(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))
}

// =============================================================================
// Tests
// =============================================================================
