//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use brandcast_credits::{BillingSync, CreditLedger, RateLimiter, WebhookVerifier};
use brandcast_jobs::{DeliveryConfig, GenerationClient, JobRunner, NotificationScheduler};

use crate::config::Config;

/// Shared state available to all request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub ledger: CreditLedger,
    pub limiter: RateLimiter,
    pub sync: Arc<BillingSync>,
    pub verifier: Arc<WebhookVerifier>,
    pub notifications: NotificationScheduler,
    pub runner: Arc<JobRunner>,
}

impl AppState {
    /// Build the service graph from a database pool and loaded config
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let generator = GenerationClient::from_env()?;
        let notifications = NotificationScheduler::new(pool.clone(), DeliveryConfig::from_env())?;

        Ok(Self {
            ledger: CreditLedger::new(pool.clone()),
            limiter: RateLimiter::new(),
            sync: Arc::new(BillingSync::new(pool.clone())),
            verifier: Arc::new(WebhookVerifier::new(config.billing_webhook_secret.clone())),
            notifications,
            runner: Arc::new(JobRunner::new(pool.clone(), generator)),
            config: Arc::new(config),
            pool,
        })
    }
}
