//! QuotaStore: the Redis-backed hot path.
//!
//! Holds the per-user usage counters, the durable write-behind queues, and
//! the configuration pub/sub channel. Counter updates and the durable
//! enqueue run as one atomic pipeline so a drained queue never disagrees
//! with the counters by more than in-flight requests.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use redis::AsyncCommands;

use crate::constants::{
    CONFIG_CHANNEL, REQUEST_PERF_QUEUE_KEY, USAGE_COUNTER_TTL_SECS, USAGE_QUEUE_KEY,
};
use crate::error::GatewayError;

#[derive(Clone)]
pub struct QuotaStore {
    client: Arc<redis::Client>,
}

/// Counter key for a user's daily window, e.g. `usage:user:a@x.com:daily:2026-08-02`.
pub fn daily_counter_key(user_id: &str) -> String {
    format!(
        "usage:user:{user_id}:daily:{}",
        Utc::now().format("%Y-%m-%d")
    )
}

/// Counter key for a user's monthly window, e.g. `usage:user:a@x.com:monthly:2026-08`.
pub fn monthly_counter_key(user_id: &str) -> String {
    format!(
        "usage:user:{user_id}:monthly:{}",
        Utc::now().format("%Y-%m")
    )
}

impl QuotaStore {
    pub fn connect(redis_url: &str) -> Result<Self, GatewayError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, GatewayError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Current daily and monthly counter values for a user, one MGET.
    /// Absent keys read as zero.
    pub async fn read_counters(&self, user_id: &str) -> Result<(i64, i64), GatewayError> {
        let mut conn = self.conn().await?;
        let keys = [daily_counter_key(user_id), monthly_counter_key(user_id)];
        let (daily, monthly): (Option<i64>, Option<i64>) = conn.mget(&keys[..]).await?;
        Ok((daily.unwrap_or(0), monthly.unwrap_or(0)))
    }

    /// Atomically add `total` to both windows, refresh their TTLs, and
    /// optionally push a serialized UsageEvent onto the durable queue.
    pub async fn record_usage(
        &self,
        user_id: Option<&str>,
        total: i64,
        event_payload: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();

        if let Some(user_id) = user_id {
            let daily = daily_counter_key(user_id);
            let monthly = monthly_counter_key(user_id);
            pipe.incr(&daily, total).ignore();
            pipe.expire(&daily, USAGE_COUNTER_TTL_SECS).ignore();
            pipe.incr(&monthly, total).ignore();
            pipe.expire(&monthly, USAGE_COUNTER_TTL_SECS).ignore();
        }
        if let Some(payload) = event_payload {
            pipe.lpush(USAGE_QUEUE_KEY, payload).ignore();
        }

        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Queue a serialized RequestLog payload for the drain workers.
    pub async fn push_request_log(&self, payload: &str) -> Result<(), GatewayError> {
        let mut conn = self.conn().await?;
        conn.lpush::<_, _, ()>(REQUEST_PERF_QUEUE_KEY, payload)
            .await?;
        Ok(())
    }

    /// Pop up to `count` items, oldest first (RPOP against LPUSH).
    pub async fn pop_batch(&self, queue: &str, count: usize) -> Result<Vec<String>, GatewayError> {
        let mut conn = self.conn().await?;
        let items: Option<Vec<String>> = conn.rpop(queue, NonZeroUsize::new(count)).await?;
        Ok(items.unwrap_or_default())
    }

    pub async fn queue_depth(&self, queue: &str) -> Result<i64, GatewayError> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(queue).await?)
    }

    pub async fn ping(&self) -> Result<(), GatewayError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Broadcast a configuration change notice. Best-effort; subscribers
    /// reconcile from the store on every message.
    pub async fn publish_config_changed(&self, changed: &[String]) -> Result<(), GatewayError> {
        let payload = serde_json::json!({
            "changed": changed,
            "ts": Utc::now().timestamp(),
        })
        .to_string();

        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(CONFIG_CHANNEL, payload).await?;
        Ok(())
    }

    /// Dedicated pub/sub connection for the config listener.
    pub async fn pubsub(&self) -> Result<redis::aio::PubSub, GatewayError> {
        Ok(self.client.get_async_pubsub().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_keys_embed_user_and_window() {
        let daily = daily_counter_key("a@x.com");
        assert!(daily.starts_with("usage:user:a@x.com:daily:"));
        // YYYY-MM-DD suffix
        let suffix = daily.rsplit(':').next().unwrap();
        assert_eq!(suffix.len(), 10);

        let monthly = monthly_counter_key("a@x.com");
        assert!(monthly.starts_with("usage:user:a@x.com:monthly:"));
        let suffix = monthly.rsplit(':').next().unwrap();
        assert_eq!(suffix.len(), 7);
    }

    #[test]
    fn counter_ttl_covers_a_monthly_window() {
        assert!(USAGE_COUNTER_TTL_SECS >= 40 * 24 * 60 * 60);
    }
}
