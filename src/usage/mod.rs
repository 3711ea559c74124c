//! The usage pipeline: hot-path accounting and durable enqueue.
//!
//! Counter increments and the audit-log enqueue happen in one atomic
//! QuotaStore round-trip; background workers (`worker.rs`) drain the queues
//! into the relational store. Nothing in this module ever fails a client
//! response — every error lands in the system log and is dropped.

pub mod worker;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;
use crate::syslog;

/// One completed inference, queued on `usage_queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub user_id: Option<String>,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub ts: DateTime<Utc>,
}

/// One proxied request, queued on `request_perf_queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogEvent {
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub path: String,
    pub method: String,
    pub status: u16,
    pub is_stream: bool,
    pub latency_ms: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Token and cost totals from an upstream `usage` object.
///
/// `total_tokens` falls back to prompt + completion when absent or zero;
/// cost prefers `cost` over `total_cost`, zero treated as absent (upstream
/// has been observed emitting either field).
pub fn usage_totals(usage: &Value) -> (i64, i64, i64, f64) {
    let prompt = usage
        .get("prompt_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion = usage
        .get("completion_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let total = usage
        .get("total_tokens")
        .and_then(Value::as_i64)
        .filter(|t| *t != 0)
        .unwrap_or(prompt + completion);
    let cost = usage
        .get("cost")
        .and_then(Value::as_f64)
        .filter(|c| *c != 0.0)
        .or_else(|| usage.get("total_cost").and_then(Value::as_f64))
        .unwrap_or(0.0);

    (prompt, completion, total, cost)
}

/// Account one `usage` object: bump both counters (when the request had an
/// identity) and enqueue the audit event, atomically.
pub async fn process_usage(state: &AppState, user_id: Option<&str>, model: &str, usage: &Value) {
    let (prompt_tokens, completion_tokens, total_tokens, total_cost) = usage_totals(usage);

    let event = UsageEvent {
        user_id: user_id.map(str::to_string),
        model: model.to_string(),
        prompt_tokens,
        completion_tokens,
        total_tokens,
        total_cost,
        ts: Utc::now(),
    };

    let payload = if state.runtime.read().await.log_mode_off() {
        None
    } else {
        match serde_json::to_string(&event) {
            Ok(p) => Some(p),
            Err(e) => {
                syslog::warn(format!("Failed to serialize usage event: {e}"));
                None
            }
        }
    };

    if let Err(e) = state
        .quota
        .record_usage(user_id, total_tokens, payload.as_deref())
        .await
    {
        syslog::warn(format!("Failed to record usage for {user_id:?}: {e}"));
    }
}

/// Queue a request-log payload. Honors `LOG_MODE=off`; failures are logged
/// and swallowed.
pub async fn enqueue_request_log(state: &AppState, event: &RequestLogEvent) {
    if state.runtime.read().await.log_mode_off() {
        return;
    }

    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            syslog::warn(format!("Failed to serialize request log: {e}"));
            return;
        }
    };

    if let Err(e) = state.quota.push_request_log(&payload).await {
        syslog::warn(format!("Failed to enqueue request log: {e}"));
    }
}

/// Guarantees a RequestLog row for a streamed response.
///
/// The streaming generator is dropped, not polled to completion, when the
/// client goes away; `Drop` spawns the enqueue so disconnects are still
/// recorded. Normal termination calls [`RequestLogGuard::complete`], which
/// disarms the guard.
pub struct RequestLogGuard {
    state: Arc<AppState>,
    event: Option<RequestLogEvent>,
    started: Instant,
}

impl RequestLogGuard {
    pub fn new(state: Arc<AppState>, event: RequestLogEvent, started: Instant) -> Self {
        Self {
            state,
            event: Some(event),
            started,
        }
    }

    fn finalize(&mut self) -> Option<RequestLogEvent> {
        self.event.take().map(|mut event| {
            event.latency_ms = i64::try_from(self.started.elapsed().as_millis())
                .unwrap_or(i64::MAX)
                .max(0);
            event.completed_at = Utc::now();
            event
        })
    }

    pub async fn complete(mut self) {
        if let Some(event) = self.finalize() {
            enqueue_request_log(&self.state, &event).await;
        }
    }
}

impl Drop for RequestLogGuard {
    fn drop(&mut self) {
        if let Some(event) = self.finalize() {
            let state = self.state.clone();
            tokio::spawn(async move {
                enqueue_request_log(&state, &event).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn total_prefers_explicit_total_tokens() {
        let usage = json!({ "prompt_tokens": 3, "completion_tokens": 7, "total_tokens": 11 });
        assert_eq!(usage_totals(&usage), (3, 7, 11, 0.0));
    }

    #[test]
    fn total_falls_back_to_prompt_plus_completion() {
        let usage = json!({ "prompt_tokens": 3, "completion_tokens": 7 });
        assert_eq!(usage_totals(&usage), (3, 7, 10, 0.0));

        let usage = json!({ "prompt_tokens": 3, "completion_tokens": 7, "total_tokens": 0 });
        assert_eq!(usage_totals(&usage), (3, 7, 10, 0.0));
    }

    #[test]
    fn cost_prefers_cost_over_total_cost() {
        let usage = json!({ "cost": 0.5, "total_cost": 0.9 });
        assert_eq!(usage_totals(&usage).3, 0.5);

        let usage = json!({ "total_cost": 0.9 });
        assert_eq!(usage_totals(&usage).3, 0.9);

        let usage = json!({ "cost": 0.0, "total_cost": 0.9 });
        assert_eq!(usage_totals(&usage).3, 0.9);
    }

    #[test]
    fn empty_usage_is_all_zero() {
        assert_eq!(usage_totals(&json!({})), (0, 0, 0, 0.0));
    }

    #[test]
    fn events_round_trip_through_queue_payloads() {
        let event = UsageEvent {
            user_id: Some("a@x.com".to_string()),
            model: "m1".to_string(),
            prompt_tokens: 3,
            completion_tokens: 7,
            total_tokens: 10,
            total_cost: 0.0021,
            ts: Utc::now(),
        };
        let payload = serde_json::to_string(&event).unwrap();
        let back: UsageEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(back.user_id.as_deref(), Some("a@x.com"));
        assert_eq!(back.total_tokens, 10);
    }
}
