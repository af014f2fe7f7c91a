//! Session cache backends.
//!
//! Values stored here are already encrypted; a backend only ever sees
//! opaque strings keyed by unsigned session ids.
//!
//! # Key Patterns
//!
//! - `reqdb:session:{id}` - sealed session record, expires with the session

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::instrument;

const KEY_PREFIX: &str = "reqdb:session:";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionCacheError {
    #[error("session cache connection failed: {0}")]
    Connection(String),

    #[error("session cache command failed: {0}")]
    Command(String),
}

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionCacheError>;

    /// Fetch the value for `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, SessionCacheError>;

    /// Delete `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), SessionCacheError>;
}

/// Redis-backed cache shared by every process of a deployment.
///
/// The `MultiplexedConnection` is cheap to clone and safe to use
/// concurrently; each command clones it.
#[derive(Clone)]
pub struct RedisSessionCache {
    connection: MultiplexedConnection,
}

impl RedisSessionCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `SessionCacheError::Connection` if the URL is invalid or the
    /// server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, SessionCacheError> {
        // Do not log redis_url: it may carry the password.
        let client = Client::open(redis_url).map_err(|e| {
            tracing::error!(target: "auth.session", error = %e, "Failed to open Redis client");
            SessionCacheError::Connection(e.to_string())
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                tracing::error!(target: "auth.session", error = %e, "Failed to connect to Redis");
                SessionCacheError::Connection(e.to_string())
            })?;

        Ok(Self { connection })
    }

    fn key(id: &str) -> String {
        format!("{KEY_PREFIX}{id}")
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    #[instrument(skip_all)]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionCacheError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(Self::key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| SessionCacheError::Command(e.to_string()))
    }

    #[instrument(skip_all)]
    async fn get(&self, key: &str) -> Result<Option<String>, SessionCacheError> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<String>>(Self::key(key))
            .await
            .map_err(|e| SessionCacheError::Command(e.to_string()))
    }

    #[instrument(skip_all)]
    async fn delete(&self, key: &str) -> Result<(), SessionCacheError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(Self::key(key))
            .await
            .map_err(|e| SessionCacheError::Command(e.to_string()))
    }
}

/// Expired entries are swept from the memory cache at most this often.
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Process-local cache for single-instance deployments and tests.
///
/// Expired entries are dropped on access and by a sweep that runs on
/// `set` at most once per [`MEMORY_SWEEP_INTERVAL`].
#[derive(Debug, Default)]
pub struct MemorySessionCache {
    inner: Mutex<MemoryEntries>,
}

#[derive(Debug, Default)]
struct MemoryEntries {
    entries: HashMap<String, (String, Instant)>,
    next_sweep: Option<Instant>,
}

impl MemoryEntries {
    fn sweep_if_due(&mut self, now: Instant) {
        if self.next_sweep.is_some_and(|due| now < due) {
            return;
        }
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        self.next_sweep = Some(now + MEMORY_SWEEP_INTERVAL);
    }
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .await
            .entries
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw stored value, bypassing expiry. Lets tests tamper with ciphertext.
    pub async fn raw(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .entries
            .get(key)
            .map(|(v, _)| v.clone())
    }

    /// All raw stored values.
    pub async fn values(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .entries
            .values()
            .map(|(v, _)| v.clone())
            .collect()
    }

    /// Overwrite a stored value in place, keeping its expiry.
    pub async fn overwrite(&self, key: &str, value: String) {
        if let Some(entry) = self.inner.lock().await.entries.get_mut(key) {
            entry.0 = value;
        }
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), SessionCacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        inner.sweep_if_due(now);
        inner
            .entries
            .insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SessionCacheError> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                inner.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SessionCacheError> {
        self.inner.lock().await.entries.remove(key);
        Ok(())
    }
}
