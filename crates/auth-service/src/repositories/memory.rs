//! In-process user directory and audit recorder.
//!
//! Used when no `DATABASE_URL` is configured and by tests.

use crate::repositories::RepositoryError;
use crate::services::provisioner::{AuditAction, AuditRecorder, LocalUser, UserDirectory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, LocalUser>>,
    fail_next: AtomicBool,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    /// Make the next call fail with a database error.
    pub async fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), RepositoryError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Database("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get(&self, id: &str) -> Result<Option<LocalUser>, RepositoryError> {
        self.check_failure()?;
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn insert(&self, user: &LocalUser) -> Result<bool, RepositoryError> {
        self.check_failure()?;
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Ok(false);
        }
        users.insert(user.id.clone(), user.clone());
        Ok(true)
    }

    async fn update_email(&self, id: &str, email: Option<&str>) -> Result<(), RepositoryError> {
        self.check_failure()?;
        if let Some(user) = self.users.write().await.get_mut(id) {
            user.email = email.map(str::to_string);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.check_failure()?;
        self.users.write().await.remove(id);
        Ok(())
    }
}

/// One recorded audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub table: String,
    pub target_id: String,
    pub action: AuditAction,
    pub diff: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct InMemoryAuditRecorder {
    records: RwLock<Vec<AuditEntry>>,
    fail_next: AtomicBool,
}

impl InMemoryAuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next record call fail with a database error.
    pub async fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<AuditEntry> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditRecorder for InMemoryAuditRecorder {
    async fn record(
        &self,
        actor_id: &str,
        table: &str,
        target_id: &str,
        action: AuditAction,
        diff: serde_json::Value,
    ) -> Result<(), RepositoryError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Database("injected failure".to_string()));
        }
        self.records.write().await.push(AuditEntry {
            timestamp: Utc::now(),
            actor_id: actor_id.to_string(),
            table: table.to_string(),
            target_id: target_id.to_string(),
            action,
            diff,
        });
        Ok(())
    }
}
