//! The administrative surface. Every route here sits behind the
//! `x-admin-key` middleware in `main.rs`.

pub mod config;
pub mod policies;
pub mod stats;
pub mod users;

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::constants::USAGE_QUEUE_KEY;
use crate::error::GatewayError;
use crate::syslog;

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Group names known to the external UI datastore.
pub async fn openwebui_groups(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, GatewayError> {
    Ok(Json(state.webui.list_groups().await?))
}

/// In-process system log, newest first.
pub async fn system_logs(State(_state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(syslog::recent()))
}

/// Readiness: audit store, UI datastore, and quota store, each reported
/// individually. Any failing check degrades the overall status.
pub async fn admin_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut healthy = true;

    let database = match state.audit.ping().await {
        Ok(()) => json!({ "ok": true }),
        Err(e) => {
            healthy = false;
            json!({ "ok": false, "detail": e.to_string() })
        }
    };

    let webui_database = match state.webui.ping().await {
        Ok(()) => json!({ "ok": true }),
        Err(e) => {
            healthy = false;
            json!({ "ok": false, "detail": e.to_string() })
        }
    };

    let redis = match state.quota.ping().await {
        Ok(()) => match state.quota.queue_depth(USAGE_QUEUE_KEY).await {
            Ok(depth) => json!({ "ok": true, "detail": format!("usage_queue depth {depth}") }),
            Err(e) => {
                healthy = false;
                json!({ "ok": false, "detail": e.to_string() })
            }
        },
        Err(e) => {
            healthy = false;
            json!({ "ok": false, "detail": e.to_string() })
        }
    };

    Json(json!({
        "status": if healthy { "ok" } else { "degraded" },
        "checks": {
            "database": database,
            "webui_database": webui_database,
            "redis": redis,
        }
    }))
}
