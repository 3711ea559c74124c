use std::collections::HashMap;
use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::config::{CONFIG_KEYS, RuntimeConfig};
use crate::error::GatewayError;
use crate::syslog;

/// Raw and masked views of the persisted configuration.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    let rows = state.audit.load_system_config().await?;
    let updated_at = state.audit.system_config_updated_at().await?;
    let masked = RuntimeConfig::from_map(rows.clone()).masked_map();

    Ok(Json(json!({
        "config": rows,
        "masked": masked,
        "updated_at": updated_at,
    })))
}

#[derive(Deserialize)]
pub struct UpdateConfigRequest {
    pub config: HashMap<String, String>,
}

/// Merge recognized keys into the persisted map, validate the result as a
/// whole, persist, reload the local runtime, and notify the other
/// replicas. Validation failures persist nothing.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateConfigRequest>,
) -> Result<Json<Value>, GatewayError> {
    let current = state.audit.load_system_config().await?;

    let mut merged = current.clone();
    let mut changed: Vec<String> = Vec::new();
    for key in CONFIG_KEYS {
        let Some(value) = body.config.get(key) else {
            continue;
        };
        if current.get(key) != Some(value) {
            merged.insert(key.to_string(), value.clone());
            changed.push(key.to_string());
        }
    }

    let next = RuntimeConfig::from_map(merged.clone());
    if let Err(err) = next.validate() {
        // Admin payload problem, not an operational failure.
        return Err(GatewayError::BadRequest(err.to_string()));
    }

    if changed.is_empty() {
        return Ok(Json(json!({ "success": true, "changed": changed })));
    }

    for key in &changed {
        state
            .audit
            .upsert_system_config(key, merged.get(key).map(String::as_str).unwrap_or(""))
            .await?;
    }

    state.runtime.write().await.apply(merged);

    if let Err(e) = state.quota.publish_config_changed(&changed).await {
        syslog::warn(format!("Failed to publish config change: {e}"));
    }
    syslog::info(format!("Config updated: {}", changed.join(", ")));

    Ok(Json(json!({ "success": true, "changed": changed })))
}
