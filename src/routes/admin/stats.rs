use std::sync::Arc;

use axum::{Json, extract::State};
use chrono::{Duration, Utc};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::GatewayError;
use crate::store::{RequestLogRow, UsageLogRow};

/// Latest 100 usage rows.
pub async fn usage(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UsageLogRow>>, GatewayError> {
    Ok(Json(state.audit.latest_usage_logs(100).await?))
}

/// Aggregate totals, last-24h window with latency percentiles, and the
/// top-5 models and users by token volume.
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    let cutoff = Utc::now() - Duration::hours(24);

    let (total_requests, total_tokens, total_cost) = state.audit.usage_totals(None).await?;
    let (day_requests, day_tokens, day_cost) = state.audit.usage_totals(Some(cutoff)).await?;
    let proxied_24h = state.audit.request_count_since(cutoff).await?;
    let latencies = state.audit.recent_latencies().await?;

    let top_models: Vec<Value> = state
        .audit
        .top_models(5)
        .await?
        .into_iter()
        .map(|(model, tokens, requests)| {
            json!({ "model": model, "total_tokens": tokens, "requests": requests })
        })
        .collect();
    let top_users: Vec<Value> = state
        .audit
        .top_users(5)
        .await?
        .into_iter()
        .map(|(user_id, tokens, requests)| {
            json!({ "user_id": user_id, "total_tokens": tokens, "requests": requests })
        })
        .collect();

    Ok(Json(json!({
        "totals": {
            "requests": total_requests,
            "total_tokens": total_tokens,
            "total_cost": total_cost,
        },
        "last_24h": {
            "requests": day_requests,
            "proxied_requests": proxied_24h,
            "total_tokens": day_tokens,
            "total_cost": day_cost,
            "latency": latency_summary(&latencies),
        },
        "top_models": top_models,
        "top_users": top_users,
    })))
}

/// Last-24h latency summary plus the latest 200 request rows.
pub async fn performance(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    let latencies = state.audit.recent_latencies().await?;
    let requests: Vec<RequestLogRow> = state.audit.latest_request_logs(200).await?;

    Ok(Json(json!({
        "last_24h": latency_summary(&latencies),
        "requests": requests,
    })))
}

/// Exact-rank percentile over an ascending-sorted window.
fn percentile(sorted: &[i64], pct: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn latency_summary(sorted: &[i64]) -> Value {
    if sorted.is_empty() {
        return json!({ "count": 0, "avg": 0, "p50": 0, "p95": 0, "p99": 0, "max": 0 });
    }
    let sum: i64 = sorted.iter().sum();
    json!({
        "count": sorted.len(),
        "avg": sum / sorted.len() as i64,
        "p50": percentile(sorted, 50.0),
        "p95": percentile(sorted, 95.0),
        "p99": percentile(sorted, 99.0),
        "max": sorted[sorted.len() - 1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_uses_exact_rank() {
        let window: Vec<i64> = (1..=100).collect();
        assert_eq!(percentile(&window, 50.0), 50);
        assert_eq!(percentile(&window, 95.0), 95);
        assert_eq!(percentile(&window, 99.0), 99);
        assert_eq!(percentile(&window, 100.0), 100);
    }

    #[test]
    fn percentile_of_small_windows() {
        assert_eq!(percentile(&[], 95.0), 0);
        assert_eq!(percentile(&[7], 50.0), 7);
        assert_eq!(percentile(&[7], 99.0), 7);
        assert_eq!(percentile(&[3, 9], 50.0), 3);
        assert_eq!(percentile(&[3, 9], 99.0), 9);
    }

    #[test]
    fn summary_reports_avg_and_max() {
        let summary = latency_summary(&[10, 20, 30, 40]);
        assert_eq!(summary["avg"], 25);
        assert_eq!(summary["max"], 40);
        assert_eq!(summary["count"], 4);
    }
}
