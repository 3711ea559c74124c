//! Background drain: queue payloads become audit rows.
//!
//! Workers are immortal. Every iteration pops up to a batch from each
//! queue and inserts rows one by one; an unparseable payload is dropped
//! with a system-log entry rather than wedging the queue.

use std::sync::Arc;

use tokio::time::sleep;

use crate::AppState;
use crate::constants::{
    DRAIN_BATCH_SIZE, REQUEST_PERF_QUEUE_KEY, USAGE_QUEUE_KEY, WORKER_IDLE_SLEEP,
};
use crate::error::GatewayError;
use crate::syslog;
use crate::usage::{RequestLogEvent, UsageEvent};

pub fn spawn_workers(state: Arc<AppState>, count: usize) {
    for worker_id in 0..count {
        let state = state.clone();
        tokio::spawn(async move {
            tracing::info!("usage worker {worker_id} started");
            loop {
                match drain_once(&state).await {
                    Ok(0) => sleep(WORKER_IDLE_SLEEP).await,
                    Ok(_) => {}
                    Err(e) => {
                        syslog::error(format!("usage worker {worker_id}: {e}"));
                        sleep(WORKER_IDLE_SLEEP).await;
                    }
                }
            }
        });
    }
}

/// One drain iteration. Returns the number of items handled.
pub async fn drain_once(state: &AppState) -> Result<usize, GatewayError> {
    let usage_batch = state
        .quota
        .pop_batch(USAGE_QUEUE_KEY, DRAIN_BATCH_SIZE)
        .await?;
    for raw in &usage_batch {
        match serde_json::from_str::<UsageEvent>(raw) {
            Ok(event) => state.audit.insert_usage_log(&event).await?,
            Err(e) => syslog::warn(format!("Dropping malformed usage event: {e}")),
        }
    }

    let perf_batch = state
        .quota
        .pop_batch(REQUEST_PERF_QUEUE_KEY, DRAIN_BATCH_SIZE)
        .await?;
    for raw in &perf_batch {
        match serde_json::from_str::<RequestLogEvent>(raw) {
            Ok(event) => state.audit.insert_request_log(&event).await?,
            Err(e) => syslog::warn(format!("Dropping malformed request log: {e}")),
        }
    }

    Ok(usage_batch.len() + perf_batch.len())
}
