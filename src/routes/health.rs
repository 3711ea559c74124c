use axum::response::Json;
use serde_json::{Value, json};

use crate::{BUILD_TIME, GIT_HASH, VERSION};

/// Liveness probe; readiness lives under `/admin/health`.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn index() -> Json<Value> {
    Json(json!({
        "name": "openrouter-gateway",
        "version": VERSION,
        "git_hash": GIT_HASH,
        "build_time": BUILD_TIME,
    }))
}
