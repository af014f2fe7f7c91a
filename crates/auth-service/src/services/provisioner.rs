//! Local user provisioning.
//!
//! Mirrors the identity provider's subject into the local `user` table on
//! every successful login callback and writes an audit record for each
//! change. Never runs on ordinary API calls.

use crate::errors::AuthError;
use crate::observability::metrics;
use crate::repositories::RepositoryError;
use crate::session::UserInfo;
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Table name recorded in audit entries for user changes.
pub const USER_TABLE: &str = "user";

/// Audited change kind. Stored as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl AuditAction {
    pub fn code(self) -> i16 {
        match self {
            AuditAction::Insert => 0,
            AuditAction::Update => 1,
            AuditAction::Delete => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Insert => "INSERT",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local mirror of an identity provider subject.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: String,
    pub email: Option<String>,
}

impl fmt::Debug for LocalUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalUser")
            .field("id", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Relational user store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<LocalUser>, RepositoryError>;

    /// Insert a user. Returns `false` if a user with this id already exists.
    async fn insert(&self, user: &LocalUser) -> Result<bool, RepositoryError>;

    async fn update_email(&self, id: &str, email: Option<&str>) -> Result<(), RepositoryError>;

    /// Delete a user. Deleting a missing user succeeds.
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(
        &self,
        actor_id: &str,
        table: &str,
        target_id: &str,
        action: AuditAction,
        diff: serde_json::Value,
    ) -> Result<(), RepositoryError>;
}

/// What [`UserProvisioner::provision`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Updated,
    Unchanged,
}

pub struct UserProvisioner {
    users: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditRecorder>,
}

impl UserProvisioner {
    pub fn new(users: Arc<dyn UserDirectory>, audit: Arc<dyn AuditRecorder>) -> Self {
        Self { users, audit }
    }

    /// Create or update the local user for `userinfo`.
    ///
    /// The subject is its own actor in the audit record.
    ///
    /// # Errors
    ///
    /// `AuthError::Internal` if the user store or audit recorder fails.
    #[instrument(skip_all)]
    pub async fn provision(&self, userinfo: &UserInfo) -> Result<ProvisionOutcome, AuthError> {
        let result = self.provision_inner(userinfo).await;
        match &result {
            Ok(ProvisionOutcome::Created) => metrics::record_provisioning("created"),
            Ok(ProvisionOutcome::Updated) => metrics::record_provisioning("updated"),
            Ok(ProvisionOutcome::Unchanged) => metrics::record_provisioning("unchanged"),
            Err(e) => {
                tracing::error!(target: "auth.provisioner", error = %e, "User provisioning failed");
                metrics::record_provisioning("error");
            }
        }
        result.map_err(|e| AuthError::Internal(format!("user provisioning failed: {e}")))
    }

    async fn provision_inner(&self, userinfo: &UserInfo) -> Result<ProvisionOutcome, RepositoryError> {
        let existing = match self.users.get(&userinfo.sub).await? {
            Some(user) => user,
            None => {
                let user = LocalUser {
                    id: userinfo.sub.clone(),
                    email: userinfo.email.clone(),
                };
                if self.users.insert(&user).await? {
                    let audited = self
                        .audit
                        .record(
                            &user.id,
                            USER_TABLE,
                            &user.id,
                            AuditAction::Insert,
                            json!({ "id": user.id, "email": user.email }),
                        )
                        .await;
                    if let Err(e) = audited {
                        // Without its INSERT record the user must not exist.
                        if let Err(undo) = self.users.delete(&user.id).await {
                            tracing::error!(target: "auth.provisioner", error = %undo, "Failed to roll back unaudited user insert");
                        }
                        return Err(e);
                    }
                    tracing::info!(target: "auth.provisioner", "Provisioned new user");
                    return Ok(ProvisionOutcome::Created);
                }
                // Lost an insert race with a concurrent login of the same subject.
                self.users
                    .get(&userinfo.sub)
                    .await?
                    .ok_or_else(|| RepositoryError::Database("user vanished after insert conflict".to_string()))?
            }
        };

        if existing.email == userinfo.email {
            return Ok(ProvisionOutcome::Unchanged);
        }

        self.users
            .update_email(&existing.id, userinfo.email.as_deref())
            .await?;
        let audited = self
            .audit
            .record(
                &existing.id,
                USER_TABLE,
                &existing.id,
                AuditAction::Update,
                json!({ "email": { "old": existing.email, "new": userinfo.email } }),
            )
            .await;
        if let Err(e) = audited {
            if let Err(undo) = self
                .users
                .update_email(&existing.id, existing.email.as_deref())
                .await
            {
                tracing::error!(target: "auth.provisioner", error = %undo, "Failed to roll back unaudited email update");
            }
            return Err(e);
        }
        tracing::info!(target: "auth.provisioner", "Updated user email from claims");
        Ok(ProvisionOutcome::Updated)
    }
}
