use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use super::AuditStore;
use crate::error::GatewayError;

/// A proxied end user. Rows are created lazily on first sighting and point
/// at the `default` policy until an administrator says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub is_active: i32,
    pub policy_id: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn active(&self) -> bool {
        self.is_active != 0
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            is_active: row.try_get("is_active")?,
            policy_id: row.try_get("policy_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl AuditStore {
    pub async fn get_user(&self, id: &str) -> Result<Option<User>, GatewayError> {
        let row = sqlx::query(
            "SELECT id, is_active, policy_id, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(match row {
            Some(row) => Some(User::from_row(&row)?),
            None => None,
        })
    }

    pub async fn list_users(&self) -> Result<Vec<User>, GatewayError> {
        let rows = sqlx::query(
            "SELECT id, is_active, policy_id, created_at FROM users ORDER BY created_at DESC",
        )
        .fetch_all(self.pool())
        .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            users.push(User::from_row(row)?);
        }
        Ok(users)
    }

    /// Lazy provisioning: INSERT-or-ignore by primary key.
    pub async fn ensure_user(&self, id: &str) -> Result<(), GatewayError> {
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_user(
        &self,
        id: &str,
        is_active: Option<bool>,
        policy_id: Option<&str>,
    ) -> Result<Option<User>, GatewayError> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET is_active = COALESCE($2, is_active),
                policy_id = COALESCE($3, policy_id)
            WHERE id = $1
            RETURNING id, is_active, policy_id, created_at
            "#,
        )
        .bind(id)
        .bind(is_active.map(i32::from))
        .bind(policy_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(match row {
            Some(row) => Some(User::from_row(&row)?),
            None => None,
        })
    }
}
