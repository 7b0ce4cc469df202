//! Error types for scheduling and delivery

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobsError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Account has no brand profile: {0}")]
    MissingProfile(String),

    #[error("Generation request failed: {0}")]
    Generation(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Credits error: {0}")]
    Credits(#[from] brandcast_credits::CreditsError),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for JobsError {
    fn from(err: sqlx::Error) -> Self {
        JobsError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for JobsError {
    fn from(err: reqwest::Error) -> Self {
        JobsError::Http(err.to_string())
    }
}

pub type JobsResult<T> = Result<T, JobsError>;
