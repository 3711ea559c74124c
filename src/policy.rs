//! Policy resolution and admission.
//!
//! A user's effective policy is their direct assignment unless it is
//! `default`, in which case the highest-priority group mapping wins (ties
//! broken by group name). Admission reads both usage counters in a single
//! multi-get and compares against the effective limits; the check-then-use
//! pattern is lock-free by design, so overshoot is bounded by one
//! concurrent burst per user.

use crate::AppState;
use crate::constants::DEFAULT_POLICY_ID;
use crate::error::GatewayError;
use crate::store::{GroupPolicy, Policy, User};
use crate::syslog;

/// Everything admission learned about the user, reused by the proxy for
/// the model allow-list and by the admin user listing.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub policy: Policy,
    pub groups: Vec<String>,
    pub daily_used: i64,
    pub monthly_used: i64,
}

pub async fn get_user_cached(
    state: &AppState,
    user_id: &str,
) -> Result<Option<User>, GatewayError> {
    if let Some(cached) = state.cache.get_user(user_id) {
        return Ok(cached);
    }
    let user = state.audit.get_user(user_id).await?;
    state.cache.put_user(user_id, user.clone());
    Ok(user)
}

/// Groups from the external UI datastore. Lookup failures degrade to an
/// empty list so the UI database can never take the proxy down.
pub async fn get_groups_cached(state: &AppState, user_id: &str) -> Vec<String> {
    if let Some(cached) = state.cache.get_groups(user_id) {
        return cached;
    }
    let groups = match state.webui.groups_for(user_id).await {
        Ok(groups) => groups,
        Err(e) => {
            syslog::warn(format!("Group lookup failed for {user_id}: {e}"));
            Vec::new()
        }
    };
    state.cache.put_groups(user_id, groups.clone());
    groups
}

pub async fn get_policy_cached(
    state: &AppState,
    policy_id: &str,
) -> Result<Option<Policy>, GatewayError> {
    if let Some(cached) = state.cache.get_policy(policy_id) {
        return Ok(cached);
    }
    let policy = state.audit.get_policy(policy_id).await?;
    state.cache.put_policy(policy_id, policy.clone());
    Ok(policy)
}

/// Pick the winning group mapping: highest priority, ties by group name.
pub fn select_group_policy<'a>(
    mappings: &'a [GroupPolicy],
    groups: &[String],
) -> Option<&'a GroupPolicy> {
    mappings
        .iter()
        .filter(|m| groups.iter().any(|g| g == &m.group_name))
        .min_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.group_name.cmp(&b.group_name))
        })
}

/// Resolve the policy id admission will use for this user.
pub async fn resolve_effective_policy_id(
    state: &AppState,
    user: &User,
    groups: &[String],
) -> Result<String, GatewayError> {
    if user.policy_id != DEFAULT_POLICY_ID {
        return Ok(user.policy_id.clone());
    }

    let mappings = state.audit.matching_group_policies(groups).await?;
    Ok(select_group_policy(&mappings, groups)
        .map(|m| m.policy_id.clone())
        .unwrap_or_else(|| DEFAULT_POLICY_ID.to_string()))
}

/// Compare observed usage against the policy limits. Non-positive limits
/// are unlimited.
pub fn evaluate_quota(policy: &Policy, daily: i64, monthly: i64) -> Result<(), GatewayError> {
    if policy.daily_token_limit > 0 && daily >= policy.daily_token_limit {
        return Err(GatewayError::DailyExceeded);
    }
    if policy.monthly_token_limit > 0 && monthly >= policy.monthly_token_limit {
        return Err(GatewayError::MonthlyExceeded);
    }
    Ok(())
}

/// Full admission check for a user. Both counters are observed (one MGET)
/// before any allow decision is returned.
pub async fn check_access(state: &AppState, user_id: &str) -> Result<AccessGrant, GatewayError> {
    let user = get_user_cached(state, user_id)
        .await?
        .ok_or(GatewayError::UserInactive)?;
    if !user.active() {
        return Err(GatewayError::UserInactive);
    }

    let groups = get_groups_cached(state, user_id).await;

    let policy_id = resolve_effective_policy_id(state, &user, &groups).await?;
    let policy = get_policy_cached(state, &policy_id)
        .await?
        .ok_or(GatewayError::PolicyMissing)?;

    let (daily_used, monthly_used) = state.quota.read_counters(user_id).await?;
    evaluate_quota(&policy, daily_used, monthly_used)?;

    Ok(AccessGrant {
        policy,
        groups,
        daily_used,
        monthly_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn mapping(group: &str, policy: &str, priority: i32) -> GroupPolicy {
        GroupPolicy {
            group_name: group.to_string(),
            policy_id: policy.to_string(),
            priority,
            created_at: Utc::now(),
        }
    }

    fn policy(daily: i64, monthly: i64) -> Policy {
        Policy {
            id: "p".to_string(),
            name: "P".to_string(),
            daily_token_limit: daily,
            monthly_token_limit: monthly,
            allowed_models: "*".to_string(),
            created_at: Utc::now(),
        }
    }

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn highest_priority_mapping_wins() {
        let mappings = vec![
            mapping("eng", "p-eng", 1),
            mapping("research", "p-research", 10),
        ];
        let winner = select_group_policy(&mappings, &groups(&["eng", "research"])).unwrap();
        assert_eq!(winner.policy_id, "p-research");
    }

    #[test]
    fn priority_ties_break_by_group_name() {
        let mappings = vec![mapping("zeta", "p-z", 5), mapping("alpha", "p-a", 5)];
        let winner = select_group_policy(&mappings, &groups(&["zeta", "alpha"])).unwrap();
        assert_eq!(winner.group_name, "alpha");
    }

    #[test]
    fn non_member_mappings_are_ignored() {
        let mappings = vec![mapping("eng", "p-eng", 100)];
        assert!(select_group_policy(&mappings, &groups(&["sales"])).is_none());
        assert!(select_group_policy(&mappings, &[]).is_none());
    }

    #[test]
    fn quota_denies_at_exactly_the_limit() {
        let p = policy(50, -1);
        assert!(evaluate_quota(&p, 49, 0).is_ok());
        assert!(matches!(
            evaluate_quota(&p, 50, 0),
            Err(GatewayError::DailyExceeded)
        ));
    }

    #[test]
    fn monthly_limit_checked_after_daily() {
        let p = policy(100, 1000);
        assert!(matches!(
            evaluate_quota(&p, 0, 1000),
            Err(GatewayError::MonthlyExceeded)
        ));
    }

    #[test]
    fn negative_limits_are_unlimited() {
        let p = policy(-1, -1);
        assert!(evaluate_quota(&p, i64::MAX, i64::MAX).is_ok());
        let p = policy(0, 0);
        assert!(evaluate_quota(&p, 10, 10).is_ok());
    }
}
