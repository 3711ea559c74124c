use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;

use super::SuccessResponse;
use crate::AppState;
use crate::error::GatewayError;
use crate::store::{GroupPolicy, Policy};

pub async fn list_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Policy>>, GatewayError> {
    Ok(Json(state.audit.list_policies().await?))
}

fn unlimited() -> i64 {
    -1
}

fn all_models() -> String {
    "*".to_string()
}

#[derive(Deserialize)]
pub struct UpsertPolicyRequest {
    pub id: String,
    pub name: Option<String>,
    #[serde(default = "unlimited")]
    pub daily_token_limit: i64,
    #[serde(default = "unlimited")]
    pub monthly_token_limit: i64,
    #[serde(default = "all_models")]
    pub allowed_models: String,
}

pub async fn upsert_policy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpsertPolicyRequest>,
) -> Result<Json<SuccessResponse>, GatewayError> {
    let id = body.id.trim().to_string();
    if id.is_empty() {
        return Err(GatewayError::BadRequest("Policy id is required".to_string()));
    }

    let name = body.name.unwrap_or_else(|| id.clone());
    state
        .audit
        .upsert_policy(
            &id,
            &name,
            body.daily_token_limit,
            body.monthly_token_limit,
            body.allowed_models.trim(),
        )
        .await?;

    state.cache.invalidate_policy(&id);
    Ok(Json(SuccessResponse { success: true }))
}

/// `default` is immortal: deleting it is a no-op reported as
/// `{success:false}`. Users of a deleted policy fall back to `default`.
pub async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, GatewayError> {
    let deleted = state.audit.delete_policy(&id).await?;
    if deleted {
        state.cache.invalidate_policy(&id);
        // Reassigned users carry stale policy ids for up to one TTL
        // otherwise.
        state.cache.clear_users();
    }
    Ok(Json(SuccessResponse { success: deleted }))
}

pub async fn list_group_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<GroupPolicy>>, GatewayError> {
    Ok(Json(state.audit.list_group_policies().await?))
}

#[derive(Deserialize)]
pub struct UpsertGroupPolicyRequest {
    pub group_name: String,
    pub policy_id: String,
    #[serde(default)]
    pub priority: i32,
}

pub async fn upsert_group_policy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpsertGroupPolicyRequest>,
) -> Result<Json<SuccessResponse>, GatewayError> {
    let group_name = body.group_name.trim().to_string();
    if group_name.is_empty() {
        return Err(GatewayError::BadRequest(
            "Group name is required".to_string(),
        ));
    }
    if state.audit.get_policy(&body.policy_id).await?.is_none() {
        return Err(GatewayError::BadRequest(format!(
            "Unknown policy: {}",
            body.policy_id
        )));
    }

    state
        .audit
        .upsert_group_policy(&group_name, &body.policy_id, body.priority)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn delete_group_policy(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, GatewayError> {
    let deleted = state.audit.delete_group_policy(&name).await?;
    Ok(Json(SuccessResponse { success: deleted }))
}
