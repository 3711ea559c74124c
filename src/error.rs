use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Missing required config: {}", .0.join(", "))]
    ConfigMissing(Vec<String>),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("User is not active")]
    UserInactive,

    #[error("Policy not found")]
    PolicyMissing,

    #[error("Daily token limit exceeded")]
    DailyExceeded,

    #[error("Monthly token limit exceeded")]
    MonthlyExceeded,

    #[error("Model not allowed by policy")]
    ModelNotAllowed,

    #[error("Unauthorized")]
    UnauthorizedAdmin,

    #[error("{0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Quota store error: {0}")]
    Quota(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::UserInactive
            | GatewayError::PolicyMissing
            | GatewayError::DailyExceeded
            | GatewayError::MonthlyExceeded
            | GatewayError::ModelNotAllowed => StatusCode::FORBIDDEN,
            GatewayError::UnauthorizedAdmin => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ConfigMissing(_)
            | GatewayError::Database(_)
            | GatewayError::Quota(_)
            | GatewayError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_errors_map_to_403() {
        assert_eq!(GatewayError::DailyExceeded.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            GatewayError::MonthlyExceeded.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(GatewayError::UserInactive.status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::PolicyMissing.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn config_missing_lists_offending_keys() {
        let err = GatewayError::ConfigMissing(vec![
            "OPENROUTER_API_KEY".to_string(),
            "REDIS_URL".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required config: OPENROUTER_API_KEY, REDIS_URL"
        );
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn quota_denial_messages_are_stable() {
        assert_eq!(
            GatewayError::DailyExceeded.to_string(),
            "Daily token limit exceeded"
        );
        assert_eq!(
            GatewayError::MonthlyExceeded.to_string(),
            "Monthly token limit exceeded"
        );
    }
}
