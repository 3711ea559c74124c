//! Read-only access to the Open WebUI datastore.
//!
//! Only three tables are touched: `user`, `group`, `group_member`. The pool
//! connects lazily so an unreachable UI database degrades group resolution
//! instead of failing boot.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::GatewayError;

#[derive(Clone)]
pub struct WebUiStore {
    pool: PgPool,
}

impl WebUiStore {
    pub fn connect_lazy(database_url: &str) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Group names for a user, matched by email or opaque id.
    pub async fn groups_for(&self, user_id: &str) -> Result<Vec<String>, GatewayError> {
        let rows = sqlx::query(
            r#"
            SELECT g.name
            FROM "group" g
            JOIN group_member gm ON gm.group_id = g.id
            JOIN "user" u ON u.id = gm.user_id
            WHERE u.email = $1 OR u.id = $1
            ORDER BY g.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .collect())
    }

    /// All group names known to the UI.
    pub async fn list_groups(&self) -> Result<Vec<String>, GatewayError> {
        let rows = sqlx::query(r#"SELECT name FROM "group" ORDER BY name"#)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .collect())
    }

    pub async fn ping(&self) -> Result<(), GatewayError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
