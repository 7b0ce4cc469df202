//! API routes

pub mod admission;
pub mod batch;
pub mod credits;
pub mod health;
pub mod unsubscribe;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip") // Cloudflare
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

/// Constant-time equality for shared secrets and signed tokens
pub(crate) fn constant_time_eq(provided: &[u8], expected: &[u8]) -> bool {
    if provided.len() != expected.len() {
        // Burn a comparison anyway so timing does not reveal the length check
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Service API under /v1. The webhook and batch endpoints authenticate
    // with their own shared secrets; unsubscribe with a signed token. The
    // credits and admission endpoints are called by the product backend,
    // which fronts all end-user authentication.
    let api_v1_routes = Router::new()
        .route("/credits/:external_key", get(credits::get_balance))
        .route("/credits/consume", post(credits::consume))
        .route("/credits/refund", post(credits::refund))
        .route("/admission/check", post(admission::check))
        .route("/webhooks/billing", post(webhooks::billing))
        .route("/batch/run", post(batch::run))
        .route("/unsubscribe", get(unsubscribe::unsubscribe));

    Router::new()
        .merge(health_routes)
        .nest("/v1", api_v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        // Request body cap; the largest legitimate payload is a webhook event
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_client_ip_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        headers.insert("cf-connecting-ip", "192.0.2.1".parse().unwrap());

        // Cloudflare header wins over the generic proxy headers
        assert_eq!(extract_client_ip(&headers), Some("192.0.2.1".to_string()));

        headers.remove("cf-connecting-ip");
        assert_eq!(extract_client_ip(&headers), Some("198.51.100.4".to_string()));

        // x-forwarded-for takes the first hop and trims whitespace
        headers.remove("x-real-ip");
        assert_eq!(extract_client_ip(&headers), Some("203.0.113.9".to_string()));

        headers.remove("x-forwarded-for");
        assert_eq!(extract_client_ip(&headers), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret-value", b"secret-value"));
        assert!(!constant_time_eq(b"secret-value", b"secret-valuX"));
        assert!(!constant_time_eq(b"short", b"secret-value"));
        assert!(!constant_time_eq(b"", b"secret-value"));
        assert!(constant_time_eq(b"", b""));
    }
}
