use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::GatewayError;
use crate::policy;
use crate::store::User;

/// A user row augmented with resolved groups and the policy admission
/// would actually apply.
#[derive(Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub groups: Vec<String>,
    pub effective_policy_id: String,
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserView>>, GatewayError> {
    let users = state.audit.list_users().await?;

    let mut views = Vec::with_capacity(users.len());
    for user in users {
        let groups = policy::get_groups_cached(&state, &user.id).await;
        let effective_policy_id =
            policy::resolve_effective_policy_id(&state, &user, &groups).await?;
        views.push(UserView {
            user,
            groups,
            effective_policy_id,
        });
    }
    Ok(Json(views))
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub is_active: Option<bool>,
    pub policy_id: Option<String>,
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<User>, GatewayError> {
    if let Some(policy_id) = &body.policy_id
        && state.audit.get_policy(policy_id).await?.is_none()
    {
        return Err(GatewayError::BadRequest(format!(
            "Unknown policy: {policy_id}"
        )));
    }

    let updated = state
        .audit
        .update_user(&id, body.is_active, body.policy_id.as_deref())
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("user {id}")))?;

    state.cache.invalidate_user(&id);
    Ok(Json(updated))
}
