//! Audit repository (maps to the `audit` table).
//!
//! Rows are append-only. `action` holds [`AuditAction::code`].

use crate::repositories::RepositoryError;
use crate::services::provisioner::{AuditAction, AuditRecorder};
use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct PgAuditRecorder {
    pool: PgPool,
}

impl PgAuditRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRecorder for PgAuditRecorder {
    async fn record(
        &self,
        actor_id: &str,
        table: &str,
        target_id: &str,
        action: AuditAction,
        diff: serde_json::Value,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO audit ("timestamp", "table", target_id, action, user_id, data)
            VALUES (NOW(), $1, $2, $3, $4, $5)
            "#,
        )
        .bind(table)
        .bind(target_id)
        .bind(action.code())
        .bind(actor_id)
        .bind(sqlx::types::Json(diff))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to record audit event: {e}")))?;

        tracing::debug!(target: "auth.repositories", table, action = %action, "Audit event recorded");
        Ok(())
    }
}
