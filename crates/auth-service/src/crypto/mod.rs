//! Cryptographic primitives for session handling.
//!
//! - [`SessionCipher`]: AES-256-GCM sealing of session records, fresh nonce per call
//! - [`TimestampSigner`]: HMAC-SHA256 signed, time-stamped client tokens
//! - Random identifiers and PKCE (RFC 7636, S256) helpers
//!
//! All randomness comes from `ring::rand::SystemRandom`.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use common::secret::{secret_bytes, ExposeSecret, SecretString};
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN},
    digest, hmac,
    rand::{SecureRandom, SystemRandom},
};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// AES-256 key length in bytes.
pub const SESSION_KEY_LEN: usize = 32;

/// Number of random bytes in a session id.
const SESSION_ID_BYTES: usize = 32;

/// Salt mixed into the signing key so session ids cannot be replayed as
/// signatures for any other purpose.
pub const SESSION_SIGNER_SALT: &str = "EncryptedRedis";

/// Salt for the login state cookie.
pub const AUTH_STATE_SIGNER_SALT: &str = "ReqDBAuthState";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("random generation failed")]
    Random,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Seal,

    /// Authentication tag mismatch, truncated or non-base64 ciphertext.
    #[error("decryption failed")]
    Open,

    #[error("malformed signed value")]
    Malformed,

    #[error("signature mismatch")]
    BadSignature,

    #[error("signature expired (age {age_secs}s > {max_age_secs}s)")]
    Expired { age_secs: u64, max_age_secs: u64 },

    #[error("signature timestamp is in the future")]
    FromFuture,
}

/// Fill a fresh buffer with `len` random bytes.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| CryptoError::Random)?;
    Ok(buf)
}

/// A URL-safe random token carrying `bytes` bytes of entropy.
pub fn random_token(bytes: usize) -> Result<String, CryptoError> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes(bytes)?))
}

/// A fresh random session id.
pub fn generate_session_id() -> Result<String, CryptoError> {
    random_token(SESSION_ID_BYTES)
}

// =============================================================================
// AES-256-GCM
// =============================================================================

/// Process-wide symmetric cipher for session records.
///
/// The key is either supplied at startup or generated once and never
/// written anywhere.
pub struct SessionCipher {
    key: LessSafeKey,
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SessionCipher {
    pub fn new(key_bytes: &[u8]) -> Result<Self, CryptoError> {
        if key_bytes.len() != SESSION_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {SESSION_KEY_LEN} bytes, got {}",
                key_bytes.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
        })
    }

    /// Generate a fresh per-process key.
    pub fn generate() -> Result<Self, CryptoError> {
        let key = secret_bytes(random_bytes(SESSION_KEY_LEN)?);
        Self::new(key.expose_secret())
    }

    /// Build from a base64 (standard alphabet) encoded key.
    pub fn from_base64(encoded: &SecretString) -> Result<Self, CryptoError> {
        let key = STANDARD
            .decode(encoded.expose_secret().trim())
            .map(secret_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::new(key.expose_secret())
    }

    /// Encrypt `plaintext`, returning `base64(nonce || ciphertext || tag)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| CryptoError::Random)?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Seal)?;

        let mut framed = Vec::with_capacity(NONCE_LEN + in_out.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&in_out);
        Ok(STANDARD.encode(framed))
    }

    /// Reverse of [`SessionCipher::seal`].
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        let framed = STANDARD.decode(sealed).map_err(|_| CryptoError::Open)?;
        if framed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CryptoError::Open);
        }
        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CryptoError::Open)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Open)?;
        Ok(plaintext.to_vec())
    }
}

// =============================================================================
// Timestamp signer
// =============================================================================

/// Signs values as `{value}.{timestamp}.{signature}` and verifies them
/// against a maximum age.
///
/// Timestamp and signature are unpadded base64url; the HMAC covers
/// `{value}.{timestamp}`. The signing key is derived from the secret and a
/// purpose salt, so signers built with different salts never accept each
/// other's output.
pub struct TimestampSigner {
    key: hmac::Key,
}

impl fmt::Debug for TimestampSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampSigner")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TimestampSigner {
    pub fn new(secret: &SecretString, salt: &str) -> Self {
        let derived = hmac::sign(
            &hmac::Key::new(hmac::HMAC_SHA256, salt.as_bytes()),
            secret.expose_secret().as_bytes(),
        );
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, derived.as_ref()),
        }
    }

    /// Sign `value` stamped with the current time.
    pub fn sign(&self, value: &str) -> String {
        self.sign_at(value, chrono::Utc::now().timestamp())
    }

    /// Sign `value` stamped with `issued_at` (unix seconds).
    pub fn sign_at(&self, value: &str, issued_at: i64) -> String {
        let payload = format!("{value}.{}", URL_SAFE_NO_PAD.encode(issued_at.to_be_bytes()));
        let tag = hmac::sign(&self.key, payload.as_bytes());
        format!("{payload}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    /// Verify signature and age against the current time, returning the value.
    pub fn verify(&self, signed: &str, max_age: Duration) -> Result<String, CryptoError> {
        self.verify_at(signed, max_age, chrono::Utc::now().timestamp())
    }

    /// Verify signature and age against `now` (unix seconds).
    ///
    /// The signature is checked first; the timestamp is only trusted once
    /// it is authenticated.
    pub fn verify_at(
        &self,
        signed: &str,
        max_age: Duration,
        now: i64,
    ) -> Result<String, CryptoError> {
        let mut parts = signed.rsplitn(3, '.');
        let (signature, timestamp, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(sig), Some(ts), Some(value)) if !value.is_empty() => (sig, ts, value),
            _ => return Err(CryptoError::Malformed),
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CryptoError::Malformed)?;
        let payload_len = value.len() + 1 + timestamp.len();
        let payload = signed.get(..payload_len).ok_or(CryptoError::Malformed)?;
        hmac::verify(&self.key, payload.as_bytes(), &signature)
            .map_err(|_| CryptoError::BadSignature)?;

        let ts_bytes: [u8; 8] = URL_SAFE_NO_PAD
            .decode(timestamp)
            .map_err(|_| CryptoError::Malformed)?
            .try_into()
            .map_err(|_| CryptoError::Malformed)?;
        let issued_at = i64::from_be_bytes(ts_bytes);

        if issued_at > now {
            return Err(CryptoError::FromFuture);
        }
        let age_secs = u64::try_from(now - issued_at).map_err(|_| CryptoError::Malformed)?;
        if age_secs > max_age.as_secs() {
            return Err(CryptoError::Expired {
                age_secs,
                max_age_secs: max_age.as_secs(),
            });
        }

        Ok(value.to_string())
    }
}

// =============================================================================
// PKCE
// =============================================================================

/// A PKCE verifier/challenge pair (S256).
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    pub fn generate() -> Result<Self, CryptoError> {
        let verifier = random_token(32)?;
        let challenge = pkce_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}

/// `BASE64URL(SHA256(verifier))`.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(digest::digest(&digest::SHA256, verifier.as_bytes()))
}
