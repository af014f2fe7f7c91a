//! User repository (maps to the `user` table).

use crate::repositories::RepositoryError;
use crate::services::provisioner::{LocalUser, UserDirectory};
use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: Option<String>,
}

impl From<UserRow> for LocalUser {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get(&self, id: &str) -> Result<Option<LocalUser>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, email
            FROM "user"
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to fetch user: {e}")))?;

        Ok(row.map(LocalUser::from))
    }

    async fn insert(&self, user: &LocalUser) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO "user" (id, email)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to insert user: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_email(&self, id: &str, email: Option<&str>) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE "user"
            SET email = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update user email: {e}")))?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            DELETE FROM "user"
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to delete user: {e}")))?;

        Ok(())
    }
}
