use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Construction-time failures of the logging core
///
/// These are the only failures the core surfaces to callers. Runtime pressure
/// (full queues, evicted contexts, failing redaction rules) is absorbed and
/// counted instead.
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid redaction pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("no tokio runtime available to schedule {0}")]
    NoRuntime(&'static str),
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Configuration error
    ConfigError(String),
    /// Requested operation is not available in the current mode
    Unavailable(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::ConfigError(_) => "config_error",
        AppError::Unavailable(_) => "unavailable",
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<EscalationError> for AppError {
    fn from(err: EscalationError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AppError::Unavailable("controller shut down".to_string());
        assert_eq!(error.to_string(), "Unavailable: controller shut down");
    }

    #[test]
    fn test_escalation_error_display() {
        let error = EscalationError::InvalidConfig("duration must be positive".to_string());
        assert_eq!(
            error.to_string(),
            "invalid configuration: duration must be positive"
        );
    }

    #[test]
    fn test_error_type_name() {
        assert_eq!(error_type_name(&AppError::Unavailable("x".to_string())), "unavailable");
        assert_eq!(error_type_name(&AppError::ConfigError("x".to_string())), "config_error");
    }

    #[tokio::test]
    async fn test_error_response() {
        let error: AppError = EscalationError::NoRuntime("reversion timer").into();
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
