use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::stage::{StageAction, StageStatus};

/// JSON body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid transition: cannot {action} stage {stage_number} while it is {from}")]
    InvalidTransition {
        stage_number: u32,
        from: StageStatus,
        action: StageAction,
    },

    #[error("Quantity invariant violated: {0}")]
    QuantityInvariantViolation(String),

    #[error("Timed out waiting for stage {stage_number} of order {order_id}")]
    ConcurrencyTimeout { order_id: Uuid, stage_number: u32 },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition { .. } | Self::ConcurrentModification(_) => {
                StatusCode::CONFLICT
            }
            Self::QuantityInvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ConcurrencyTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::MigrationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::QuantityInvariantViolation(_) => "quantity_invariant_violation",
            Self::ConcurrencyTimeout { .. } => "concurrency_timeout",
            Self::ConcurrentModification(_) => "concurrent_modification",
            _ => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) | Self::MigrationError(_) => {
                "Internal server error".to_string()
            }
            Self::ConcurrencyTimeout { .. } => {
                format!("{}; the stage is busy, retry shortly", self)
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_distinct_statuses() {
        let transition = ServiceError::InvalidTransition {
            stage_number: 2,
            from: StageStatus::Completed,
            action: StageAction::Complete,
        };
        assert_eq!(transition.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            transition.to_string(),
            "Invalid transition: cannot complete stage 2 while it is completed"
        );

        let timeout = ServiceError::ConcurrencyTimeout {
            order_id: Uuid::nil(),
            stage_number: 1,
        };
        assert_eq!(timeout.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(timeout.code(), "concurrency_timeout");

        assert_eq!(
            ServiceError::QuantityInvariantViolation("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::NotFound("order".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn quantity_violation_message_is_passed_through_verbatim() {
        let err = ServiceError::QuantityInvariantViolation(
            "output 60 + loss 5 exceeds recorded input 50".into(),
        );
        assert_eq!(
            err.response_message(),
            "Quantity invariant violated: output 60 + loss 5 exceeds recorded input 50"
        );
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = ServiceError::InternalError("stage 3 ledger corrupt".into());
        assert_eq!(err.response_message(), "Internal server error");
    }
}
