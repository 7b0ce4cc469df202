//! Batch trigger endpoint
//!
//! External cron services hit this instead of running the worker binary.
//! Both paths drive the same tick, so deployments can use either.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    routes::constant_time_eq,
    state::AppState,
};

/// Notifications delivered per triggered tick
const DELIVERY_BATCH_SIZE: i64 = 50;

#[derive(Debug, Serialize)]
pub struct BatchRunResponse {
    pub jobs_created: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub notifications_sent: u64,
}

/// Run one scheduler tick: create today's jobs, drain due ones, deliver
/// due notifications
pub async fn run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<BatchRunResponse>> {
    let provided = headers
        .get("x-batch-secret")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    if !constant_time_eq(
        provided.as_bytes(),
        state.config.batch_trigger_secret.as_bytes(),
    ) {
        return Err(ApiError::Unauthorized);
    }

    let tick = state.runner.tick().await?;
    let notifications_sent = state.notifications.deliver_due(DELIVERY_BATCH_SIZE).await?;

    tracing::info!(
        jobs_created = tick.jobs_created,
        succeeded = tick.succeeded,
        failed = tick.failed,
        notifications_sent,
        "Batch tick complete"
    );

    Ok(Json(BatchRunResponse {
        jobs_created: tick.jobs_created,
        succeeded: tick.succeeded,
        failed: tick.failed,
        notifications_sent,
    }))
}
