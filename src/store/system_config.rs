use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::Row;

use super::AuditStore;
use crate::config::CONFIG_KEYS;
use crate::error::GatewayError;

impl AuditStore {
    /// Seed `system_config` from the boot environment, keeping any value an
    /// administrator already persisted.
    pub async fn seed_system_config(
        &self,
        env_values: &HashMap<String, String>,
    ) -> Result<(), GatewayError> {
        for key in CONFIG_KEYS {
            let Some(value) = env_values.get(key) else {
                continue;
            };
            sqlx::query(
                "INSERT INTO system_config (key, value) VALUES ($1, $2) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    /// The full persisted configuration map.
    pub async fn load_system_config(&self) -> Result<HashMap<String, String>, GatewayError> {
        let rows = sqlx::query("SELECT key, value FROM system_config")
            .fetch_all(self.pool())
            .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            map.insert(row.try_get("key")?, row.try_get("value")?);
        }
        Ok(map)
    }

    /// Most recent `updated_at` across all rows, if any exist.
    pub async fn system_config_updated_at(
        &self,
    ) -> Result<Option<DateTime<Utc>>, GatewayError> {
        let row = sqlx::query("SELECT MAX(updated_at) AS updated_at FROM system_config")
            .fetch_one(self.pool())
            .await?;
        Ok(row.try_get("updated_at")?)
    }

    pub async fn upsert_system_config(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO system_config (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
