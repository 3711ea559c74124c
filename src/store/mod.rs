//! AuditStore: the durable relational side of the gateway.
//!
//! Policies, users, and group mappings live here, along with the
//! append-only usage and request logs the drain workers feed, and the
//! `system_config` rows backing the configuration plane. Tables are
//! created on boot; the `default` policy row always exists.

mod logs;
mod policies;
mod system_config;
mod users;

pub use logs::{RequestLogRow, UsageLogRow};
pub use policies::{GroupPolicy, Policy};
pub use users::User;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::constants::DEFAULT_POLICY_ID;
use crate::error::GatewayError;

#[derive(Clone)]
pub struct AuditStore {
    pool: PgPool,
}

impl AuditStore {
    pub async fn connect(database_url: &str) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), GatewayError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS policies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                daily_token_limit BIGINT NOT NULL DEFAULT -1,
                monthly_token_limit BIGINT NOT NULL DEFAULT -1,
                allowed_models TEXT NOT NULL DEFAULT '*',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                is_active INT NOT NULL DEFAULT 1,
                policy_id TEXT NOT NULL DEFAULT 'default' REFERENCES policies(id),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_policies (
                group_name TEXT PRIMARY KEY,
                policy_id TEXT NOT NULL REFERENCES policies(id),
                priority INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_logs (
                id BIGSERIAL PRIMARY KEY,
                user_id TEXT,
                model TEXT,
                prompt_tokens INT NOT NULL DEFAULT 0,
                completion_tokens INT NOT NULL DEFAULT 0,
                total_tokens INT NOT NULL DEFAULT 0,
                total_cost NUMERIC(15,10) NOT NULL DEFAULT 0,
                ts TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_logs (
                id BIGSERIAL PRIMARY KEY,
                user_id TEXT,
                model TEXT,
                path TEXT NOT NULL,
                method TEXT NOT NULL,
                status INT NOT NULL,
                is_stream BOOLEAN NOT NULL DEFAULT FALSE,
                latency_ms INT NOT NULL DEFAULT 0,
                total_cost NUMERIC(15,10) NOT NULL DEFAULT 0,
                started_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_request_logs_started ON request_logs (started_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_request_logs_completed ON request_logs (completed_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_request_logs_user ON request_logs (user_id, started_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_request_logs_model ON request_logs (model, started_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_usage_logs_ts ON usage_logs (ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_usage_logs_user ON usage_logs (user_id, ts DESC)",
        ];
        for sql in indexes {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        sqlx::query(
            "INSERT INTO policies (id, name) VALUES ($1, 'Default') ON CONFLICT (id) DO NOTHING",
        )
        .bind(DEFAULT_POLICY_ID)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
