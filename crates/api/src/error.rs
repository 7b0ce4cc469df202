//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use brandcast_credits::CreditsError;
use brandcast_jobs::JobsError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid webhook signature")]
    InvalidSignature,

    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),

    // Rate limiting
    #[error("Too many requests")]
    RateLimited,

    // Credits
    #[error("{0}")]
    InsufficientCredits(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::InvalidSignature => {
                (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE", self.to_string())
            }

            // Validation
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Rate limiting
            ApiError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", self.to_string())
            }

            // Credits
            ApiError::InsufficientCredits(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDITS", msg.clone())
            }

            // Internal
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<CreditsError> for ApiError {
    fn from(err: CreditsError) -> Self {
        match err {
            CreditsError::AccountNotFound(_) | CreditsError::TeamNotFound(_) => ApiError::NotFound,
            e @ CreditsError::InsufficientCredits { .. } => {
                ApiError::InsufficientCredits(e.to_string())
            }
            CreditsError::WebhookSignatureInvalid => ApiError::InvalidSignature,
            e @ (CreditsError::InvalidAmount(_)
            | CreditsError::InvalidPlan(_)
            | CreditsError::InvalidPayload(_)) => ApiError::BadRequest(e.to_string()),
            e @ (CreditsError::TeamFull { .. } | CreditsError::AlreadyTeamed(_)) => {
                ApiError::Conflict(e.to_string())
            }
            CreditsError::Database(msg) => ApiError::Database(msg),
            CreditsError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal credits error");
                ApiError::Internal
            }
        }
    }
}

impl From<JobsError> for ApiError {
    fn from(err: JobsError) -> Self {
        match err {
            JobsError::JobNotFound(_) => ApiError::NotFound,
            JobsError::Credits(e) => e.into(),
            JobsError::Database(msg) => ApiError::Database(msg),
            other => {
                tracing::error!(error = %other, "Job subsystem error");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Unauthorized.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::InvalidSignature.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::InsufficientCredits("Insufficient credits".to_string())
                .into_response()
                .status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::BadRequest("bad".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Database("boom".to_string()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_credits_error_mapping() {
        let err: ApiError = CreditsError::InsufficientCredits {
            required: 5,
            available: 3,
        }
        .into();
        match &err {
            ApiError::InsufficientCredits(msg) => {
                assert!(msg.contains("required 5"));
                assert!(msg.contains("available 3"));
            }
            other => panic!("Expected InsufficientCredits, got: {:?}", other),
        }

        let err: ApiError = CreditsError::AccountNotFound("user-1".to_string()).into();
        assert!(matches!(err, ApiError::NotFound));

        let err: ApiError = CreditsError::WebhookSignatureInvalid.into();
        assert!(matches!(err, ApiError::InvalidSignature));

        let err: ApiError = CreditsError::TeamFull { members: 3, max: 3 }.into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[test]
    fn test_jobs_error_mapping() {
        let err: ApiError = JobsError::Credits(CreditsError::InsufficientCredits {
            required: 1,
            available: 0,
        })
        .into();
        assert!(matches!(err, ApiError::InsufficientCredits(_)));

        let err: ApiError = JobsError::Generation("backend returned 503".to_string()).into();
        assert!(matches!(err, ApiError::Internal));
    }
}
