//! Brandcast worker
//!
//! Periodic runner for the batch scheduler and notification delivery.
//! Deployments choose between this binary and an external cron hitting
//! the api batch endpoint; both drive the same tick.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};

use brandcast_jobs::{DeliveryConfig, GenerationClient, JobRunner, NotificationScheduler};
use brandcast_shared::db;

/// Notifications delivered per sweep
const DELIVERY_BATCH_SIZE: i64 = 50;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,brandcast_worker=debug".into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let runner = Arc::new(JobRunner::new(pool.clone(), GenerationClient::from_env()?));
    let notifications = NotificationScheduler::new(pool.clone(), DeliveryConfig::from_env())?;

    let mut scheduler = JobScheduler::new().await?;

    // Batch tick: create today's jobs and drain due ones, every 5 minutes
    let tick_runner = runner.clone();
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_id, _sched| {
            let runner = tick_runner.clone();
            Box::pin(async move {
                match runner.tick().await {
                    Ok(summary) => {
                        if summary.jobs_created > 0 || summary.succeeded > 0 || summary.failed > 0 {
                            tracing::info!(
                                jobs_created = summary.jobs_created,
                                succeeded = summary.succeeded,
                                failed = summary.failed,
                                "Batch tick complete"
                            );
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Batch tick failed"),
                }
            })
        })?)
        .await?;

    // Notification delivery sweep, every minute
    let sweep_notifications = notifications.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_id, _sched| {
            let notifications = sweep_notifications.clone();
            Box::pin(async move {
                match notifications.deliver_due(DELIVERY_BATCH_SIZE).await {
                    Ok(0) => {}
                    Ok(sent) => tracing::info!(sent, "Notification sweep complete"),
                    Err(e) => tracing::error!(error = %e, "Notification sweep failed"),
                }
            })
        })?)
        .await?;

    // Retention cleanup, daily at 03:00 UTC
    let cleanup_runner = runner.clone();
    let cleanup_notifications = notifications.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_id, _sched| {
            let runner = cleanup_runner.clone();
            let notifications = cleanup_notifications.clone();
            Box::pin(async move {
                match runner.cleanup_old_jobs().await {
                    Ok(deleted) => tracing::info!(deleted, "Old batch jobs removed"),
                    Err(e) => tracing::error!(error = %e, "Batch job cleanup failed"),
                }
                match notifications.cleanup_old_notifications().await {
                    Ok(deleted) => tracing::info!(deleted, "Old notifications removed"),
                    Err(e) => tracing::error!(error = %e, "Notification cleanup failed"),
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Brandcast worker started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping scheduler");
    scheduler.shutdown().await?;

    Ok(())
}
