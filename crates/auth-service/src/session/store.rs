//! Encrypted session store.
//!
//! # Security
//!
//! - The signed id is verified (signature and age together) before any
//!   cache I/O, so forged or stale ids never reach the decrypt step
//! - Records are sealed with a fresh nonce per write
//! - Decryption failure, timeout and backend error on read all mean
//!   "no session"; none of them escape to the caller as an error
//!
//! Refresh writes the new entry first and only then deletes the old one,
//! so a client always has at least one valid id.

use crate::crypto::{self, CryptoError, SessionCipher, TimestampSigner, SESSION_SIGNER_SALT};
use crate::errors::AuthError;
use crate::observability::metrics;
use crate::session::cache::{SessionCache, SessionCacheError};
use crate::session::record::{SessionRecord, TokenUpdate};
use common::secret::SecretString;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// A resolved session: the unsigned id and its decrypted record.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub record: SessionRecord,
}

pub struct SessionStore {
    cache: Arc<dyn SessionCache>,
    cipher: SessionCipher,
    signer: TimestampSigner,
    max_age: Duration,
    op_timeout: Duration,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("max_age", &self.max_age)
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

enum CacheFailure {
    Timeout,
    Backend(SessionCacheError),
}

impl fmt::Display for CacheFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheFailure::Timeout => write!(f, "session cache call timed out"),
            CacheFailure::Backend(e) => write!(f, "{e}"),
        }
    }
}

impl SessionStore {
    /// # Arguments
    ///
    /// * `cache` - backend holding sealed records
    /// * `cipher` - process-wide record cipher
    /// * `secret` - session signing secret
    /// * `max_age` - session lifetime: signature max-age and cache TTL
    /// * `op_timeout` - bound on every cache call
    pub fn new(
        cache: Arc<dyn SessionCache>,
        cipher: SessionCipher,
        secret: &SecretString,
        max_age: Duration,
        op_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            cipher,
            signer: TimestampSigner::new(secret, SESSION_SIGNER_SALT),
            max_age,
            op_timeout,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Persist a new session and return its signed id.
    ///
    /// # Errors
    ///
    /// `AuthError::Internal` if sealing or the cache write fails.
    #[instrument(skip_all)]
    pub async fn start(&self, record: &SessionRecord) -> Result<String, AuthError> {
        let id = self.write_new(record, "start").await?;
        tracing::debug!(target: "auth.session", "Session started");
        Ok(self.signer.sign(&id))
    }

    /// Resolve a signed session id. `None` for every kind of failure.
    #[instrument(skip_all)]
    pub async fn get(&self, signed_id: &str) -> Option<Session> {
        let id = match self.signer.verify(signed_id, self.max_age) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(target: "auth.session", error = %e, "Session id rejected");
                metrics::record_session_operation("get", "rejected", Duration::ZERO);
                return None;
            }
        };

        match self.load(&id, "get").await {
            Ok(Some(record)) => Some(Session { id, record }),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(target: "auth.session", error = %e, "Session lookup failed, treating as absent");
                None
            }
        }
    }

    /// Look up a session by its unsigned id, already verified by [`get`].
    /// `None` for every kind of failure.
    ///
    /// [`get`]: SessionStore::get
    #[instrument(skip_all)]
    pub async fn get_by_id(&self, id: &str) -> Option<SessionRecord> {
        match self.load(id, "get").await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(target: "auth.session", error = %e, "Session lookup failed, treating as absent");
                None
            }
        }
    }

    /// Replace a session with updated tokens under a new id.
    ///
    /// Returns the new signed id and record. The old id stays valid until
    /// the new entry is written, and is deleted right after.
    ///
    /// # Errors
    ///
    /// - `InvalidSession` if the old entry is missing or cannot be decrypted
    /// - `Internal` if the cache write or delete fails; on a failed delete
    ///   the new entry is removed again so only the old id remains
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        id: &str,
        update: TokenUpdate,
    ) -> Result<(String, SessionRecord), AuthError> {
        let current = self
            .load(id, "refresh")
            .await
            .map_err(|e| AuthError::InvalidSession(e.to_string()))?
            .ok_or_else(|| AuthError::InvalidSession("session vanished before refresh".to_string()))?;

        let record = current.with_tokens(update);
        let new_id = self.write_new(&record, "refresh").await?;

        if let Err(e) = self.call("refresh", self.cache.delete(id)).await {
            tracing::error!(target: "auth.session", error = %e, "Failed to delete replaced session, rolling back");
            if let Err(e) = self.call("refresh", self.cache.delete(&new_id)).await {
                tracing::error!(target: "auth.session", error = %e, "Rollback of new session failed");
            }
            return Err(AuthError::Internal(format!("session refresh failed: {e}")));
        }

        tracing::debug!(target: "auth.session", "Session refreshed");
        Ok((self.signer.sign(&new_id), record))
    }

    /// Delete a session. Deleting an unknown id succeeds.
    ///
    /// # Errors
    ///
    /// `AuthError::Internal` if the backend fails or times out.
    #[instrument(skip_all)]
    pub async fn remove(&self, id: &str) -> Result<(), AuthError> {
        self.call("remove", self.cache.delete(id))
            .await
            .map_err(|e| AuthError::Internal(format!("session remove failed: {e}")))?;
        tracing::debug!(target: "auth.session", "Session removed");
        Ok(())
    }

    async fn write_new(&self, record: &SessionRecord, operation: &'static str) -> Result<String, AuthError> {
        let id = crypto::generate_session_id().map_err(internal)?;
        let plaintext = serde_json::to_vec(record)
            .map_err(|e| AuthError::Internal(format!("session serialization failed: {e}")))?;
        let sealed = self.cipher.seal(&plaintext).map_err(internal)?;

        self.call(operation, self.cache.set(&id, &sealed, self.max_age))
            .await
            .map_err(|e| AuthError::Internal(format!("session write failed: {e}")))?;
        Ok(id)
    }

    /// Read and decrypt by unsigned id. Undecryptable entries are `None`.
    async fn load(&self, id: &str, operation: &'static str) -> Result<Option<SessionRecord>, CacheFailure> {
        let Some(sealed) = self.call(operation, self.cache.get(id)).await? else {
            tracing::debug!(target: "auth.session", "Session not found");
            return Ok(None);
        };

        let plaintext = match self.cipher.open(&sealed) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(target: "auth.session", error = %e, "Cannot decrypt session");
                return Ok(None);
            }
        };

        match serde_json::from_slice(&plaintext) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(target: "auth.session", error = %e, "Corrupt session record");
                Ok(None)
            }
        }
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, CacheFailure>
    where
        F: Future<Output = Result<T, SessionCacheError>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheFailure::Backend(e)),
            Err(_) => Err(CacheFailure::Timeout),
        };
        let status = match &result {
            Ok(_) => "success",
            Err(CacheFailure::Timeout) => "timeout",
            Err(CacheFailure::Backend(_)) => "error",
        };
        metrics::record_session_operation(operation, status, started.elapsed());
        result
    }
}

fn internal(e: CryptoError) -> AuthError {
    AuthError::Internal(e.to_string())
}
