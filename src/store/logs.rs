use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use sqlx::Row;
use sqlx::postgres::PgRow;

use super::AuditStore;
use crate::error::GatewayError;
use crate::usage::{RequestLogEvent, UsageEvent};

#[derive(Debug, Clone, Serialize)]
pub struct UsageLogRow {
    pub id: i64,
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub total_cost: f64,
    pub ts: DateTime<Utc>,
}

impl UsageLogRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            model: row.try_get("model")?,
            prompt_tokens: row.try_get("prompt_tokens")?,
            completion_tokens: row.try_get("completion_tokens")?,
            total_tokens: row.try_get("total_tokens")?,
            total_cost: decimal_to_f64(row.try_get("total_cost")?),
            ts: row.try_get("ts")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogRow {
    pub id: i64,
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub path: String,
    pub method: String,
    pub status: i32,
    pub is_stream: bool,
    pub latency_ms: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RequestLogRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            model: row.try_get("model")?,
            path: row.try_get("path")?,
            method: row.try_get("method")?,
            status: row.try_get("status")?,
            is_stream: row.try_get("is_stream")?,
            latency_ms: row.try_get("latency_ms")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn f64_to_decimal(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or_default()
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(0, i32::MAX as i64) as i32
}

impl AuditStore {
    pub async fn insert_usage_log(&self, event: &UsageEvent) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO usage_logs
                (user_id, model, prompt_tokens, completion_tokens, total_tokens, total_cost, ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&event.user_id)
        .bind(&event.model)
        .bind(clamp_i32(event.prompt_tokens))
        .bind(clamp_i32(event.completion_tokens))
        .bind(clamp_i32(event.total_tokens))
        .bind(f64_to_decimal(event.total_cost))
        .bind(event.ts)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_request_log(&self, event: &RequestLogEvent) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO request_logs
                (user_id, model, path, method, status, is_stream, latency_ms,
                 started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&event.user_id)
        .bind(&event.model)
        .bind(&event.path)
        .bind(&event.method)
        .bind(event.status as i32)
        .bind(event.is_stream)
        .bind(clamp_i32(event.latency_ms))
        .bind(event.started_at)
        .bind(event.completed_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn latest_usage_logs(&self, limit: i64) -> Result<Vec<UsageLogRow>, GatewayError> {
        let rows = sqlx::query(
            "SELECT id, user_id, model, prompt_tokens, completion_tokens, total_tokens, \
             total_cost, ts FROM usage_logs ORDER BY ts DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            logs.push(UsageLogRow::from_row(row)?);
        }
        Ok(logs)
    }

    pub async fn latest_request_logs(
        &self,
        limit: i64,
    ) -> Result<Vec<RequestLogRow>, GatewayError> {
        let rows = sqlx::query(
            "SELECT id, user_id, model, path, method, status, is_stream, latency_ms, \
             started_at, completed_at FROM request_logs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            logs.push(RequestLogRow::from_row(row)?);
        }
        Ok(logs)
    }

    /// `(requests, total_tokens, total_cost)` over all of `usage_logs`, or
    /// since `since` when given.
    pub async fn usage_totals(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<(i64, i64, f64), GatewayError> {
        let row = match since {
            Some(cutoff) => {
                sqlx::query(
                    "SELECT COUNT(*) AS requests, \
                     COALESCE(SUM(total_tokens), 0)::BIGINT AS tokens, \
                     COALESCE(SUM(total_cost), 0) AS cost \
                     FROM usage_logs WHERE ts >= $1",
                )
                .bind(cutoff)
                .fetch_one(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT COUNT(*) AS requests, \
                     COALESCE(SUM(total_tokens), 0)::BIGINT AS tokens, \
                     COALESCE(SUM(total_cost), 0) AS cost \
                     FROM usage_logs",
                )
                .fetch_one(self.pool())
                .await?
            }
        };

        Ok((
            row.try_get("requests")?,
            row.try_get("tokens")?,
            decimal_to_f64(row.try_get("cost")?),
        ))
    }

    /// Top `limit` values of `column` (`model` or `user_id`) by token volume.
    async fn top_by(
        &self,
        column: &str,
        limit: i64,
    ) -> Result<Vec<(String, i64, i64)>, GatewayError> {
        let sql = format!(
            "SELECT {column} AS key, COALESCE(SUM(total_tokens), 0)::BIGINT AS tokens, \
             COUNT(*) AS requests FROM usage_logs WHERE {column} IS NOT NULL \
             GROUP BY {column} ORDER BY tokens DESC LIMIT $1"
        );

        let rows = sqlx::query(&sql).bind(limit).fetch_all(self.pool()).await?;

        let mut top = Vec::with_capacity(rows.len());
        for row in &rows {
            top.push((
                row.try_get("key")?,
                row.try_get("tokens")?,
                row.try_get("requests")?,
            ));
        }
        Ok(top)
    }

    pub async fn top_models(&self, limit: i64) -> Result<Vec<(String, i64, i64)>, GatewayError> {
        self.top_by("model", limit).await
    }

    pub async fn top_users(&self, limit: i64) -> Result<Vec<(String, i64, i64)>, GatewayError> {
        self.top_by("user_id", limit).await
    }

    /// Latencies of requests started in the last 24 hours, ascending.
    /// Percentiles are computed in-process by exact rank.
    pub async fn recent_latencies(&self) -> Result<Vec<i64>, GatewayError> {
        let cutoff = Utc::now() - Duration::hours(24);
        let rows = sqlx::query(
            "SELECT latency_ms FROM request_logs WHERE started_at >= $1 ORDER BY latency_ms",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get::<i32, _>("latency_ms").ok())
            .map(i64::from)
            .collect())
    }

    pub async fn request_count_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<i64, GatewayError> {
        let row = sqlx::query("SELECT COUNT(*) AS requests FROM request_logs WHERE started_at >= $1")
            .bind(since)
            .fetch_one(self.pool())
            .await?;
        Ok(row.try_get("requests")?)
    }
}
