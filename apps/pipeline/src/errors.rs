use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::clients::Service;
use crate::models::Channel;

/// Coarse classification persisted alongside attempt counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Duplicate,
    ServiceUnavailable,
    Transient,
    Permanent,
    RateLimited,
    Throttled,
    RetryBudgetExhausted,
    NotFound,
    Storage,
    Cancelled,
    Conflict,
}

/// Error taxonomy for everything the pipeline core does.
///
/// Only `TransientExternal` is retried locally by a stage executor. `RateLimitExceeded`,
/// `Throttled` and `ServiceUnavailable` park the candidate for a later pass without
/// consuming retry budget.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Lead duplicates candidate {existing_id}")]
    DuplicateCandidate { existing_id: Uuid },

    #[error("Service unavailable: circuit for {service} is open")]
    ServiceUnavailable { service: Service },

    #[error("Transient error from {service}: {message}")]
    TransientExternal { service: Service, message: String },

    #[error("Permanent error from {service}: {message}")]
    PermanentExternal { service: Service, message: String },

    #[error("Rate limit exceeded at {service}")]
    RateLimitExceeded {
        service: Service,
        retry_after: Option<Duration>,
    },

    #[error("Outreach on {channel} throttled for {retry_after:?}")]
    Throttled {
        channel: Channel,
        retry_after: Duration,
    },

    #[error("Retry budget exhausted for {service} after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        service: Service,
        attempts: u32,
        last_error: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Campaign {0} is cancelled")]
    Cancelled(Uuid),

    #[error("Campaign {0} is already running")]
    AlreadyRunning(Uuid),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::DuplicateCandidate { .. } => ErrorKind::Duplicate,
            PipelineError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            PipelineError::TransientExternal { .. } => ErrorKind::Transient,
            PipelineError::PermanentExternal { .. } => ErrorKind::Permanent,
            PipelineError::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            PipelineError::Throttled { .. } => ErrorKind::Throttled,
            PipelineError::RetryBudgetExhausted { .. } => ErrorKind::RetryBudgetExhausted,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Storage(_) => ErrorKind::Storage,
            PipelineError::Cancelled(_) => ErrorKind::Cancelled,
            PipelineError::AlreadyRunning(_) => ErrorKind::Conflict,
        }
    }

    /// Whether the stage executor may retry this error within the current run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientExternal { .. })
    }

    /// Errors that leave the candidate parked at its current stage for a later pass.
    pub fn is_deferral(&self) -> bool {
        matches!(
            self,
            PipelineError::ServiceUnavailable { .. }
                | PipelineError::RateLimitExceeded { .. }
                | PipelineError::Throttled { .. }
                | PipelineError::Cancelled(_)
        )
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Storage(format!("serialization failed: {e}"))
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(e: redis::RedisError) -> Self {
        PipelineError::Storage(format!("redis: {e}"))
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Throttled, retry after {0:?}")]
    Throttled(Duration),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Pipeline error: {0}")]
    Pipeline(PipelineError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(msg) => AppError::Validation(msg),
            PipelineError::NotFound(msg) => AppError::NotFound(msg),
            PipelineError::AlreadyRunning(id) => {
                AppError::Conflict(format!("campaign {id} is already running"))
            }
            PipelineError::Cancelled(id) => {
                AppError::Conflict(format!("campaign {id} is cancelled"))
            }
            PipelineError::Throttled { retry_after, .. } => AppError::Throttled(retry_after),
            PipelineError::ServiceUnavailable { service } => {
                AppError::ServiceUnavailable(service.to_string())
            }
            other => AppError::Pipeline(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Throttled(retry_after) => (
                StatusCode::TOO_MANY_REQUESTS,
                "THROTTLED",
                format!("Retry after {}s", retry_after.as_secs()),
            ),
            AppError::ServiceUnavailable(service) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                format!("{service} is temporarily unavailable"),
            ),
            AppError::Pipeline(e) => {
                tracing::error!("Pipeline error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PIPELINE_ERROR",
                    "A pipeline error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        let transient = PipelineError::TransientExternal {
            service: Service::Generation,
            message: "502".to_string(),
        };
        let permanent = PipelineError::PermanentExternal {
            service: Service::Email,
            message: "invalid recipient".to_string(),
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!PipelineError::Validation("x".to_string()).is_retryable());
    }

    #[test]
    fn test_throttle_and_circuit_open_are_deferrals() {
        let throttled = PipelineError::Throttled {
            channel: Channel::Email,
            retry_after: Duration::from_secs(5),
        };
        let open = PipelineError::ServiceUnavailable {
            service: Service::Scraping,
        };
        assert!(throttled.is_deferral());
        assert!(open.is_deferral());
        assert!(!PipelineError::Validation("x".to_string()).is_deferral());
    }

    #[test]
    fn test_pipeline_error_maps_to_http_status() {
        let response = AppError::from(PipelineError::NotFound("campaign".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = AppError::from(PipelineError::Throttled {
            channel: Channel::LinkedIn,
            retry_after: Duration::from_secs(30),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = AppError::from(PipelineError::Storage("down".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
