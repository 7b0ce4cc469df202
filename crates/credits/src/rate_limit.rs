//! Fixed-window rate limiting for admission control
//!
//! Counters live in process memory: losing them on restart only resets the
//! limiter, never billing state. Entries are keyed `operation:scope:raw_id`
//! so per-user, per-IP, and global ceilings never collide.
//!
//! Per-operation limits are configurable via environment variables:
//! - `RATE_LIMIT_ANALYZE_FREE_PER_MINUTE`: analyze calls per free user (default: 10)
//! - `RATE_LIMIT_ANALYZE_PAID_PER_MINUTE`: analyze calls per paid user (default: 60)
//! - `RATE_LIMIT_GENERATE_FREE_PER_MINUTE`: generate calls per free user (default: 5)
//! - `RATE_LIMIT_GENERATE_PAID_PER_MINUTE`: generate calls per paid user (default: 30)
//! - `RATE_LIMIT_IP_PER_MINUTE`: calls per origin address (default: 20)
//! - `RATE_LIMIT_GLOBAL_PER_MINUTE`: calls per operation across all callers (default: 600)

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use time::OffsetDateTime;

use brandcast_shared::Plan;

/// Entries older than this are swept regardless of their window length
const CLEANUP_RETENTION_MS: i64 = 3_600_000;

/// Get configurable analyze limit for free accounts
fn get_analyze_free_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    *LIMIT.get_or_init(|| {
        std::env::var("RATE_LIMIT_ANALYZE_FREE_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10)
    })
}

/// Get configurable analyze limit for paid accounts
fn get_analyze_paid_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    *LIMIT.get_or_init(|| {
        std::env::var("RATE_LIMIT_ANALYZE_PAID_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60)
    })
}

/// Get configurable generate limit for free accounts
fn get_generate_free_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    *LIMIT.get_or_init(|| {
        std::env::var("RATE_LIMIT_GENERATE_FREE_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5)
    })
}

/// Get configurable generate limit for paid accounts
fn get_generate_paid_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    *LIMIT.get_or_init(|| {
        std::env::var("RATE_LIMIT_GENERATE_PAID_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30)
    })
}

/// Get configurable per-origin-address limit
fn get_ip_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    *LIMIT.get_or_init(|| {
        std::env::var("RATE_LIMIT_IP_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20)
    })
}

/// Get configurable per-operation global ceiling
fn get_global_limit() -> u32 {
    static LIMIT: OnceLock<u32> = OnceLock::new();
    *LIMIT.get_or_init(|| {
        std::env::var("RATE_LIMIT_GLOBAL_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600)
    })
}

/// Scope component of a rate-limit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    User,
    Ip,
    Global,
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Ip => write!(f, "ip"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Rate limit configuration for one identifier class
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Calls allowed per window
    pub max: u32,
    /// Window length in milliseconds, opened at the first call
    pub window_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: 60,
            window_ms: 60_000,
        }
    }
}

/// Per-user config for an operation, split by free vs paid plan
pub fn operation_config(operation: &str, plan: Plan) -> RateLimitConfig {
    let max = match (operation, plan.is_paid()) {
        ("analyze", false) => get_analyze_free_limit(),
        ("analyze", true) => get_analyze_paid_limit(),
        ("generate", false) => get_generate_free_limit(),
        ("generate", true) => get_generate_paid_limit(),
        // Unknown operations fall back to the analyze limits
        (_, false) => get_analyze_free_limit(),
        (_, true) => get_analyze_paid_limit(),
    };
    RateLimitConfig {
        max,
        window_ms: 60_000,
    }
}

/// Rate limit check result
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: OffsetDateTime,
    pub retry_after_seconds: Option<u32>,
}

/// In-memory fixed-window rate limiter
///
/// The window for an identifier opens at its first call and runs for the
/// configured length; calls inside the window increment a single counter and
/// are allowed while the count stays within `max`. Once the window has
/// elapsed the next call opens a fresh one. This trades fairness at window
/// boundaries for O(1) memory per identifier and a single counter mutation.
pub struct RateLimiter {
    /// Store: identifier -> (count, window_start_ms)
    windows: Arc<tokio::sync::RwLock<HashMap<String, (u32, i64)>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    /// Count a call against an identifier. Never errors; a denied call is
    /// counted and reported with `allowed = false`.
    pub async fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now_ms = unix_now_ms();

        let (count, window_start) = {
            let mut windows = self.windows.write().await;
            let entry = windows.entry(identifier.to_string()).or_insert((0, now_ms));

            // Window elapsed: the next call opens a fresh one
            if now_ms - entry.1 >= config.window_ms {
                entry.0 = 0;
                entry.1 = now_ms;
            }

            entry.0 += 1;
            (entry.0, entry.1)
        };

        let allowed = count <= config.max;
        let reset_ms = window_start + config.window_ms;
        let reset_at = OffsetDateTime::from_unix_timestamp_nanos(reset_ms as i128 * 1_000_000)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        let retry_after_seconds = if allowed {
            None
        } else {
            Some((((reset_ms - now_ms).max(0) + 999) / 1000) as u32)
        };

        RateLimitDecision {
            allowed,
            remaining: config.max.saturating_sub(count),
            reset_at,
            retry_after_seconds,
        }
    }

    /// Per-user check for an operation, with the plan-specific config
    pub async fn check_user(
        &self,
        operation: &str,
        external_key: &str,
        plan: Plan,
    ) -> RateLimitDecision {
        let key = format!("{}:{}:{}", operation, LimitScope::User, external_key);
        self.check(&key, &operation_config(operation, plan)).await
    }

    /// Per-origin-address check for an operation
    pub async fn check_ip(&self, operation: &str, ip_address: &str) -> RateLimitDecision {
        let key = format!("{}:{}:{}", operation, LimitScope::Ip, ip_address);
        let config = RateLimitConfig {
            max: get_ip_limit(),
            window_ms: 60_000,
        };
        self.check(&key, &config).await
    }

    /// Aggregate ceiling for an operation across all callers
    pub async fn check_global(&self, operation: &str) -> RateLimitDecision {
        let key = format!("{}:{}:all", operation, LimitScope::Global);
        let config = RateLimitConfig {
            max: get_global_limit(),
            window_ms: 60_000,
        };
        self.check(&key, &config).await
    }

    /// Sweep expired windows (call periodically)
    pub async fn cleanup(&self) {
        let now_ms = unix_now_ms();

        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, (_, start)| now_ms - *start < CLEANUP_RETENTION_MS);

        let swept = before - windows.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = windows.len(), "Swept rate limit windows");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            windows: Arc::clone(&self.windows),
        }
    }
}

fn unix_now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
