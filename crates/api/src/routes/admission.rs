//! Admission checks for generation calls
//!
//! One call answers "may this identity run this operation right now":
//! fixed-window rate limits first (user scope, then IP scope for free
//! accounts, then the global ceiling), then the effective credit balance.
//! A denial is a normal 200 response with `allowed = false`; callers
//! treat the reason as display hinting, not control flow.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use brandcast_credits::RateLimitDecision;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct AdmissionRequest {
    pub external_key: String,
    /// Operation label, e.g. "visual.generate"; scopes the rate windows
    pub operation: String,
    /// End-user address as seen by the product backend
    pub client_ip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub remaining_credits: i64,
    pub rate: RateInfo,
}

#[derive(Debug, Serialize)]
pub struct RateInfo {
    pub remaining: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub reset_at: OffsetDateTime,
}

impl From<&RateLimitDecision> for RateInfo {
    fn from(decision: &RateLimitDecision) -> Self {
        Self {
            remaining: decision.remaining,
            reset_at: decision.reset_at,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Check whether one operation call would be admitted
pub async fn check(
    State(state): State<AppState>,
    Json(req): Json<AdmissionRequest>,
) -> ApiResult<Json<AdmissionResponse>> {
    if req.operation.is_empty() {
        return Err(ApiError::BadRequest("operation must not be empty".to_string()));
    }

    let account = state.ledger.get_account(&req.external_key).await?;
    let plan = account.current_plan();
    let remaining_credits = state.ledger.effective_balance(&account).await?;

    // Gate 1: per-user window with the plan-specific config
    let user_decision = state
        .limiter
        .check_user(&req.operation, &req.external_key, plan)
        .await;
    if !user_decision.allowed {
        return Ok(Json(denied("rate_limited", remaining_credits, &user_decision)));
    }

    // Gate 2: per-address window, free accounts only (paid accounts are
    // already identity-bound by billing)
    if !plan.is_paid() {
        if let Some(ip) = req.client_ip.as_deref() {
            let ip_decision = state.limiter.check_ip(&req.operation, ip).await;
            if !ip_decision.allowed {
                return Ok(Json(denied("rate_limited", remaining_credits, &ip_decision)));
            }
        }
    }

    // Gate 3: global ceiling for the operation
    let global_decision = state.limiter.check_global(&req.operation).await;
    if !global_decision.allowed {
        return Ok(Json(denied(
            "rate_limited",
            remaining_credits,
            &global_decision,
        )));
    }

    // Gate 4: would one credit be available
    if remaining_credits < 1 {
        return Ok(Json(denied(
            "insufficient_credits",
            remaining_credits,
            &user_decision,
        )));
    }

    Ok(Json(AdmissionResponse {
        allowed: true,
        reason: None,
        remaining_credits,
        rate: RateInfo::from(&user_decision),
    }))
}

fn denied(reason: &str, remaining_credits: i64, decision: &RateLimitDecision) -> AdmissionResponse {
    AdmissionResponse {
        allowed: false,
        reason: Some(reason.to_string()),
        remaining_credits,
        rate: RateInfo::from(decision),
    }
}
