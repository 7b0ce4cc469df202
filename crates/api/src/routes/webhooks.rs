//! Billing provider webhook
//!
//! Signature verification happens against the raw body before any JSON
//! parsing. Every verified event is acknowledged with 200 so the provider
//! stops retrying; what the event did (applied, duplicate, unknown
//! account, ignored type) only shows up in logs and the billing_events
//! ledger.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::json;

use brandcast_credits::{BillingEvent, BillingEventKind, SyncOutcome};

use crate::{
    error::{ApiError, ApiResult},
    routes::credits::cancel_conversion_nudge,
    state::AppState,
};

/// Handle a signed billing event
pub async fn billing(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("brandcast-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::InvalidSignature)?;

    state.verifier.verify(&body, signature)?;

    let event: BillingEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed event payload: {}", e)))?;

    let outcome = state.sync.apply(&event).await?;

    match &outcome {
        SyncOutcome::Applied { kind, account } => {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                account_id = %account.id,
                "Billing event applied"
            );
            if *kind == BillingEventKind::SubscriptionActivated {
                // The account converted; the nudge no longer applies
                cancel_conversion_nudge(state.notifications.clone(), account.id);
            }
        }
        SyncOutcome::Duplicate => {
            tracing::info!(event_id = %event.id, "Billing event already applied, acknowledging");
        }
        SyncOutcome::UnknownAccount => {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Billing event references no known account, acknowledging"
            );
        }
        SyncOutcome::Ignored => {}
    }

    Ok(Json(json!({ "received": true })))
}
