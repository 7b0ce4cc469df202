//! Credit ledger error types

use thiserror::Error;

/// Errors from the credit ledger and billing sync
#[derive(Debug, Error)]
pub enum CreditsError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    #[error("Team is full ({members} of {max} members)")]
    TeamFull { members: i32, max: i32 },

    #[error("Account already belongs to a team: {0}")]
    AlreadyTeamed(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Malformed webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for CreditsError {
    fn from(err: sqlx::Error) -> Self {
        CreditsError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for CreditsError {
    fn from(err: serde_json::Error) -> Self {
        CreditsError::InvalidPayload(err.to_string())
    }
}

pub type CreditsResult<T> = Result<T, CreditsError>;
