//! Credit balance routes
//!
//! Called by the product backend on behalf of authenticated users. The
//! balance read provisions unknown identities, which is where the signup
//! grant and the one-time conversion nudge originate.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use brandcast_credits::BalanceSummary;
use brandcast_jobs::{NotificationScheduler, MESSAGE_TYPE_CONVERSION};

use crate::{error::ApiResult, state::AppState};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    /// Contact email, recorded when the read provisions a new account
    pub email: Option<String>,
}

fn default_amount() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub external_key: String,
    /// Credits to consume, defaults to one generation's worth
    #[serde(default = "default_amount")]
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub external_key: String,
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceChangeResponse {
    pub external_key: String,
    pub balance: i64,
}

// =============================================================================
// Handlers
// =============================================================================

/// Read the effective balance, provisioning the account on first contact
pub async fn get_balance(
    State(state): State<AppState>,
    Path(external_key): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<Json<BalanceSummary>> {
    let is_new = state.ledger.find_by_external_key(&external_key).await?.is_none();
    let account = state
        .ledger
        .ensure_provisioned(&external_key, query.email.as_deref())
        .await?;

    if is_new {
        // First contact: line up the conversion nudge for tomorrow.
        // Duplicate suppression in the scheduler absorbs the provisioning
        // race where two first reads both see a missing account.
        schedule_conversion_nudge(state.notifications.clone(), account.id);
    }

    let summary = state.ledger.balance_summary(&external_key).await?;
    Ok(Json(summary))
}

/// Consume credits from the effective balance (team pool when teamed)
pub async fn consume(
    State(state): State<AppState>,
    Json(req): Json<ConsumeRequest>,
) -> ApiResult<Json<BalanceChangeResponse>> {
    let balance = state.ledger.consume(&req.external_key, req.amount).await?;

    // Paid usage means the conversion nudge no longer applies
    if let Some(account) = state.ledger.find_by_external_key(&req.external_key).await? {
        if account.current_plan().is_paid() {
            cancel_conversion_nudge(state.notifications.clone(), account.id);
        }
    }

    Ok(Json(BalanceChangeResponse {
        external_key: req.external_key,
        balance,
    }))
}

/// Return credits to the effective balance after a failed downstream call
pub async fn refund(
    State(state): State<AppState>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Json<BalanceChangeResponse>> {
    let balance = state.ledger.refund(&req.external_key, req.amount).await?;

    Ok(Json(BalanceChangeResponse {
        external_key: req.external_key,
        balance,
    }))
}

// =============================================================================
// Notification hooks (fire-and-forget)
// =============================================================================

fn schedule_conversion_nudge(notifications: NotificationScheduler, account_id: uuid::Uuid) {
    tokio::spawn(async move {
        let deliver_after = OffsetDateTime::now_utc() + Duration::hours(24);
        let metadata = serde_json::json!({ "source": "signup" });
        if let Err(e) = notifications
            .schedule(account_id, MESSAGE_TYPE_CONVERSION, deliver_after, metadata)
            .await
        {
            tracing::warn!(
                account_id = %account_id,
                error = %e,
                "Failed to schedule conversion nudge"
            );
        }
    });
}

pub(crate) fn cancel_conversion_nudge(notifications: NotificationScheduler, account_id: uuid::Uuid) {
    tokio::spawn(async move {
        if let Err(e) = notifications.cancel(account_id, MESSAGE_TYPE_CONVERSION).await {
            tracing::warn!(
                account_id = %account_id,
                error = %e,
                "Failed to cancel conversion nudge"
            );
        }
    });
}
