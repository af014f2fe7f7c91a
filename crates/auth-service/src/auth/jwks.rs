//! Identity provider signing keys.
//!
//! [`KeyStore`] fetches the provider's JWKS document and keeps the parsed
//! keys as one immutable [`SigningKeySet`]. A refresh builds a complete new
//! set and swaps the `Arc`, so readers see either the old set or the new
//! one and never a partial update.
//!
//! Refresh is lazy: it runs at startup and whenever a token names a `kid`
//! the current set does not contain. Concurrent refreshes coalesce: at most
//! one fetch is in flight, and every caller that arrived while it ran gets
//! its outcome. Failures are never retried internally.

use crate::observability::metrics;
use common::jwt::decode_jwk_component;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// Network failure, timeout or non-success status from the JWKS endpoint.
    #[error("JWKS fetch failed: {0}")]
    Fetch(String),

    /// The response was not a usable JWKS document.
    #[error("JWKS document invalid: {0}")]
    InvalidDocument(String),

    /// The `kid` is absent even after a refresh.
    #[error("no signing key with kid '{0}'")]
    KeyNotFound(String),
}

/// One entry of a JWKS document.
///
/// Only RSA and Ed25519 (OKP) signature keys are used; anything else is
/// skipped when the set is built.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,

    #[serde(default)]
    pub kid: Option<String>,

    #[serde(default)]
    pub alg: Option<String>,

    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// OKP curve name.
    #[serde(default)]
    pub crv: Option<String>,

    /// OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// A parsed public key ready for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    pub algorithm: Algorithm,
    pub decoding_key: DecodingKey,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Parse a JWK. Returns `Ok(None)` for keys this service does not use.
    pub fn from_jwk(jwk: &Jwk) -> Result<Option<Self>, String> {
        let Some(kid) = jwk.kid.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
            return Ok(None);
        }

        match jwk.kty.as_str() {
            "RSA" => {
                let algorithm = match jwk.alg.as_deref() {
                    None | Some("RS256") => Algorithm::RS256,
                    Some("RS384") => Algorithm::RS384,
                    Some("RS512") => Algorithm::RS512,
                    Some("PS256") => Algorithm::PS256,
                    Some("PS384") => Algorithm::PS384,
                    Some("PS512") => Algorithm::PS512,
                    Some(_) => return Ok(None),
                };
                let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                    return Err(format!("RSA key '{kid}' missing n or e"));
                };
                let decoding_key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| format!("RSA key '{kid}': {err}"))?;
                Ok(Some(Self {
                    kid,
                    algorithm,
                    decoding_key,
                }))
            }
            "OKP" => {
                if jwk.crv.as_deref() != Some("Ed25519")
                    || jwk.alg.as_deref().is_some_and(|a| a != "EdDSA")
                {
                    return Ok(None);
                }
                let x = jwk
                    .x
                    .as_deref()
                    .ok_or_else(|| format!("OKP key '{kid}' missing x"))?;
                let public_key = decode_jwk_component(x)
                    .map_err(|err| format!("OKP key '{kid}': {err}"))?;
                if public_key.len() != 32 {
                    return Err(format!(
                        "OKP key '{kid}': expected 32 bytes, got {}",
                        public_key.len()
                    ));
                }
                Ok(Some(Self {
                    kid,
                    algorithm: Algorithm::EdDSA,
                    decoding_key: DecodingKey::from_ed_der(&public_key),
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Immutable `kid -> key` map.
#[derive(Debug, Clone, Default)]
pub struct SigningKeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
}

impl SigningKeySet {
    /// Build a set from a JWKS document, skipping unusable entries.
    ///
    /// A document with no usable key at all is rejected so a broken
    /// endpoint response never replaces a working set.
    pub fn from_document(document: &JwksDocument) -> Result<Self, KeyStoreError> {
        let mut keys = HashMap::new();
        for jwk in &document.keys {
            match VerificationKey::from_jwk(jwk) {
                Ok(Some(key)) => {
                    keys.insert(key.kid.clone(), Arc::new(key));
                }
                Ok(None) => {
                    tracing::debug!(target: "auth.jwks", kty = %jwk.kty, kid = ?jwk.kid, "Skipping unsupported JWK");
                }
                Err(reason) => {
                    tracing::warn!(target: "auth.jwks", reason = %reason, "Skipping malformed JWK");
                }
            }
        }
        if keys.is_empty() {
            return Err(KeyStoreError::InvalidDocument(
                "no usable signing keys".to_string(),
            ));
        }
        Ok(Self { keys })
    }

    pub fn from_keys(keys: impl IntoIterator<Item = VerificationKey>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|k| (k.kid.clone(), Arc::new(k)))
                .collect(),
        }
    }

    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Cached JWKS with coalesced on-demand refresh.
pub struct KeyStore {
    jwks_uri: String,
    http_client: reqwest::Client,
    keys: RwLock<Arc<SigningKeySet>>,
    /// Completed refresh count; lets a waiter tell whether a refresh
    /// finished while it queued for `refresh_outcome`.
    refresh_attempts: AtomicU64,
    refresh_outcome: Mutex<Result<(), KeyStoreError>>,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("jwks_uri", &self.jwks_uri)
            .field("refresh_attempts", &self.refresh_attempts.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Create an empty store. Call [`KeyStore::refresh`] to load keys.
    ///
    /// # Arguments
    ///
    /// * `jwks_uri` - the provider's `jwks_uri` from discovery
    /// * `timeout` - bound on every JWKS fetch
    pub fn new(jwks_uri: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });
        Self::with_client(jwks_uri, http_client)
    }

    pub fn with_client(jwks_uri: String, http_client: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            http_client,
            keys: RwLock::new(Arc::new(SigningKeySet::default())),
            refresh_attempts: AtomicU64::new(0),
            refresh_outcome: Mutex::new(Ok(())),
        }
    }

    /// Snapshot of the current key set.
    pub async fn current(&self) -> Arc<SigningKeySet> {
        Arc::clone(&*self.keys.read().await)
    }

    /// Resolve `kid`, refreshing once if it is unknown.
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if the key is still absent after the refresh
    /// - `Fetch` / `InvalidDocument` if the refresh itself failed
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn resolve(&self, kid: &str) -> Result<Arc<VerificationKey>, KeyStoreError> {
        if let Some(key) = self.current().await.get(kid) {
            return Ok(key);
        }

        tracing::debug!(target: "auth.jwks", kid = %kid, "Unknown kid, refreshing JWKS");
        self.refresh().await?;

        self.current().await.get(kid).ok_or_else(|| {
            tracing::warn!(target: "auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
            KeyStoreError::KeyNotFound(kid.to_string())
        })
    }

    /// Fetch the JWKS and swap the key set.
    ///
    /// A caller that arrives while another refresh is running waits for it
    /// and returns its outcome instead of fetching again.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<(), KeyStoreError> {
        let seen = self.refresh_attempts.load(Ordering::Acquire);
        let mut outcome = self.refresh_outcome.lock().await;

        if self.refresh_attempts.load(Ordering::Acquire) != seen {
            tracing::debug!(target: "auth.jwks", "Joined in-flight JWKS refresh");
            return outcome.clone();
        }

        let started = Instant::now();
        let result = self.fetch().await;
        match &result {
            Ok(set) => {
                *self.keys.write().await = Arc::clone(set);
                tracing::info!(target: "auth.jwks", key_count = set.len(), "JWKS refreshed");
                metrics::record_jwks_refresh("success", started.elapsed());
            }
            Err(e) => {
                tracing::error!(target: "auth.jwks", error = %e, "JWKS refresh failed");
                metrics::record_jwks_refresh("error", started.elapsed());
            }
        }

        *outcome = result.map(|_| ());
        self.refresh_attempts.fetch_add(1, Ordering::Release);
        outcome.clone()
    }

    async fn fetch(&self) -> Result<Arc<SigningKeySet>, KeyStoreError> {
        tracing::debug!(target: "auth.jwks", url = %self.jwks_uri, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| KeyStoreError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyStoreError::Fetch(format!(
                "status {}",
                response.status()
            )));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| KeyStoreError::InvalidDocument(e.to_string()))?;

        SigningKeySet::from_document(&document).map(Arc::new)
    }
}
