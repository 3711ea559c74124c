use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;

use super::AuditStore;
use crate::constants::DEFAULT_POLICY_ID;
use crate::error::GatewayError;

/// An admission policy. Negative limits mean unlimited; `allowed_models`
/// is `*` or a comma-separated list of model ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub daily_token_limit: i64,
    pub monthly_token_limit: i64,
    pub allowed_models: String,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    /// Whether `model` passes the policy's allow-list.
    pub fn allows_model(&self, model: &str) -> bool {
        let list = self.allowed_models.trim();
        if list == "*" || list.is_empty() {
            return true;
        }
        list.split(',').any(|m| m.trim() == model)
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            daily_token_limit: row.try_get("daily_token_limit")?,
            monthly_token_limit: row.try_get("monthly_token_limit")?,
            allowed_models: row.try_get("allowed_models")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Maps an external UI group to a policy; higher priority wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPolicy {
    pub group_name: String,
    pub policy_id: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl GroupPolicy {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            group_name: row.try_get("group_name")?,
            policy_id: row.try_get("policy_id")?,
            priority: row.try_get("priority")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl AuditStore {
    pub async fn get_policy(&self, id: &str) -> Result<Option<Policy>, GatewayError> {
        let row = sqlx::query(
            "SELECT id, name, daily_token_limit, monthly_token_limit, allowed_models, created_at \
             FROM policies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(match row {
            Some(row) => Some(Policy::from_row(&row)?),
            None => None,
        })
    }

    pub async fn list_policies(&self) -> Result<Vec<Policy>, GatewayError> {
        let rows = sqlx::query(
            "SELECT id, name, daily_token_limit, monthly_token_limit, allowed_models, created_at \
             FROM policies ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;

        let mut policies = Vec::with_capacity(rows.len());
        for row in &rows {
            policies.push(Policy::from_row(row)?);
        }
        Ok(policies)
    }

    pub async fn upsert_policy(
        &self,
        id: &str,
        name: &str,
        daily_token_limit: i64,
        monthly_token_limit: i64,
        allowed_models: &str,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO policies (id, name, daily_token_limit, monthly_token_limit, allowed_models)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                daily_token_limit = EXCLUDED.daily_token_limit,
                monthly_token_limit = EXCLUDED.monthly_token_limit,
                allowed_models = EXCLUDED.allowed_models
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(daily_token_limit)
        .bind(monthly_token_limit)
        .bind(allowed_models)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Delete a policy. The `default` policy is immortal; referencing users
    /// fall back to it and group mappings to the policy are removed first.
    pub async fn delete_policy(&self, id: &str) -> Result<bool, GatewayError> {
        if id == DEFAULT_POLICY_ID {
            return Ok(false);
        }

        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE users SET policy_id = $1 WHERE policy_id = $2")
            .bind(DEFAULT_POLICY_ID)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM group_policies WHERE policy_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM policies WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_group_policies(&self) -> Result<Vec<GroupPolicy>, GatewayError> {
        let rows = sqlx::query(
            "SELECT group_name, policy_id, priority, created_at FROM group_policies \
             ORDER BY priority DESC, group_name",
        )
        .fetch_all(self.pool())
        .await?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in &rows {
            mappings.push(GroupPolicy::from_row(row)?);
        }
        Ok(mappings)
    }

    /// Group policies whose group is in `groups`, best first (priority
    /// descending, ties by name).
    pub async fn matching_group_policies(
        &self,
        groups: &[String],
    ) -> Result<Vec<GroupPolicy>, GatewayError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT group_name, policy_id, priority, created_at FROM group_policies \
             WHERE group_name = ANY($1) ORDER BY priority DESC, group_name",
        )
        .bind(groups)
        .fetch_all(self.pool())
        .await?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in &rows {
            mappings.push(GroupPolicy::from_row(row)?);
        }
        Ok(mappings)
    }

    pub async fn upsert_group_policy(
        &self,
        group_name: &str,
        policy_id: &str,
        priority: i32,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO group_policies (group_name, policy_id, priority)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_name) DO UPDATE SET
                policy_id = EXCLUDED.policy_id,
                priority = EXCLUDED.priority
            "#,
        )
        .bind(group_name)
        .bind(policy_id)
        .bind(priority)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_group_policy(&self, group_name: &str) -> Result<bool, GatewayError> {
        let result = sqlx::query("DELETE FROM group_policies WHERE group_name = $1")
            .bind(group_name)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allowed: &str) -> Policy {
        Policy {
            id: "p1".to_string(),
            name: "Test".to_string(),
            daily_token_limit: -1,
            monthly_token_limit: -1,
            allowed_models: allowed.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn wildcard_allows_everything() {
        let p = policy("*");
        assert!(p.allows_model("anthropic/claude-sonnet-4"));
        assert!(p.allows_model("unknown"));
    }

    #[test]
    fn list_matches_exact_entries_with_whitespace() {
        let p = policy("openai/gpt-4o, anthropic/claude-sonnet-4");
        assert!(p.allows_model("openai/gpt-4o"));
        assert!(p.allows_model("anthropic/claude-sonnet-4"));
        assert!(!p.allows_model("openai/gpt-4o-mini"));
    }

    #[test]
    fn empty_list_is_treated_as_wildcard() {
        assert!(policy("").allows_model("m1"));
    }
}
