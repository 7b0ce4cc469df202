//! One-click unsubscribe
//!
//! The only browser-facing endpoint. Links carry a token the delivery
//! sink mints with the shared `UNSUBSCRIBE_HMAC_SECRET`, so no session is
//! needed and tokens cannot be forged for other addresses. Responses do
//! not reveal whether the address exists.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    routes::{constant_time_eq, extract_client_ip},
    state::AppState,
};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct UnsubscribeQuery {
    pub email: String,
    pub token: String,
}

/// Opt an email address out of scheduled notifications
pub async fn unsubscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UnsubscribeQuery>,
) -> ApiResult<String> {
    // Public endpoint: throttle per address to slow token guessing
    if let Some(ip) = extract_client_ip(&headers) {
        let decision = state.limiter.check_ip("unsubscribe", &ip).await;
        if !decision.allowed {
            return Err(ApiError::RateLimited);
        }
    }

    let expected = unsubscribe_token(&state.config.unsubscribe_secret, &query.email)?;
    if !constant_time_eq(query.token.as_bytes(), expected.as_bytes()) {
        return Err(ApiError::Unauthorized);
    }

    let accounts: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        UPDATE accounts
        SET opted_out = TRUE, updated_at = NOW()
        WHERE LOWER(email) = LOWER($1)
        RETURNING id
        "#,
    )
    .bind(&query.email)
    .fetch_all(&state.pool)
    .await?;

    for (account_id,) in &accounts {
        state.notifications.cancel_all(*account_id).await?;
        tracing::info!(account_id = %account_id, "Account opted out of notifications");
    }

    Ok("You have been unsubscribed. No further emails will be sent.".to_string())
}

/// Token for an unsubscribe link: hex HMAC-SHA256 over the lowercased
/// address. The delivery sink computes the same token when rendering links.
pub fn unsubscribe_token(secret: &str, email: &str) -> ApiResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ApiError::Internal)?;
    mac.update(email.to_lowercase().as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
