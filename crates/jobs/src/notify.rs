//! Notification scheduling and delivery
//!
//! Notifications are rows, not outbound calls: scheduling writes a pending
//! row and a periodic sweep delivers the due ones. Duplicate suppression is
//! per `(account, message_type)` among pending rows, and opted-out accounts
//! never get a row. Delivery failures retry up to a small bound, then the
//! row is terminally failed; this differs from batch jobs, where failures
//! are terminal on the first strike.

use std::time::Duration;

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use brandcast_shared::{NotificationStatus, ScheduledNotification};

use crate::error::{JobsError, JobsResult};

/// Delivery attempts before a notification is terminally failed
pub const MAX_DELIVERY_ATTEMPTS: i32 = 3;

/// Conversion-nudge message type, cancelled once an account goes paid
pub const MESSAGE_TYPE_CONVERSION: &str = "conversion";

/// Upper bound on one delivery POST. A sink that accepts the connection and
/// never answers burns one recorded attempt, not the whole sweep.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Sink URL notifications are POSTed to; empty disables delivery
    pub webhook_url: String,
    /// Per-request bound on one delivery POST
    pub timeout: Duration,
}

impl DeliveryConfig {
    pub fn from_env() -> Self {
        Self {
            webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
            timeout: DELIVERY_TIMEOUT,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }
}

#[derive(Clone)]
pub struct NotificationScheduler {
    pool: PgPool,
    config: DeliveryConfig,
    client: reqwest::Client,
}

impl NotificationScheduler {
    pub fn new(pool: PgPool, config: DeliveryConfig) -> JobsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| JobsError::Internal(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            pool,
            config,
            client,
        })
    }

    /// Queue a notification. No-op when a pending row of the same type
    /// already exists for the account, when the account has opted out, or
    /// when the account is unknown. Returns whether a row was created.
    pub async fn schedule(
        &self,
        account_id: Uuid,
        message_type: &str,
        deliver_after: OffsetDateTime,
        metadata: serde_json::Value,
    ) -> JobsResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO scheduled_notifications
                (id, account_id, message_type, deliver_after, status, metadata)
            SELECT $1, a.id, $3, $4, 'pending', $5
            FROM accounts a
            WHERE a.id = $2
              AND a.opted_out = FALSE
              AND NOT EXISTS (
                  SELECT 1 FROM scheduled_notifications n
                  WHERE n.account_id = $2
                    AND n.message_type = $3
                    AND n.status = 'pending'
              )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(message_type)
        .bind(deliver_after)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        let created = inserted.rows_affected() > 0;
        if created {
            tracing::debug!(
                account_id = %account_id,
                message_type = %message_type,
                deliver_after = %deliver_after,
                "Scheduled notification"
            );
        }
        Ok(created)
    }

    /// Cancel pending notifications of one type. Idempotent; returns how
    /// many rows were cancelled.
    pub async fn cancel(&self, account_id: Uuid, message_type: &str) -> JobsResult<u64> {
        let cancelled = sqlx::query(
            r#"
            UPDATE scheduled_notifications
            SET status = 'cancelled'
            WHERE account_id = $1 AND message_type = $2 AND status = 'pending'
            "#,
        )
        .bind(account_id)
        .bind(message_type)
        .execute(&self.pool)
        .await?;
        Ok(cancelled.rows_affected())
    }

    /// Cancel every pending notification for an account (opt-out path)
    pub async fn cancel_all(&self, account_id: Uuid) -> JobsResult<u64> {
        let cancelled = sqlx::query(
            r#"
            UPDATE scheduled_notifications
            SET status = 'cancelled'
            WHERE account_id = $1 AND status = 'pending'
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        let count = cancelled.rows_affected();
        if count > 0 {
            tracing::info!(account_id = %account_id, count, "Cancelled pending notifications");
        }
        Ok(count)
    }

    /// Deliver due pending notifications. Returns how many were sent.
    /// Without a configured sink the sweep does nothing, so dev setups
    /// accumulate pending rows instead of fake-sending them.
    pub async fn deliver_due(&self, limit: i64) -> JobsResult<u64> {
        if !self.config.is_enabled() {
            tracing::debug!("Notification sink not configured, skipping delivery sweep");
            return Ok(0);
        }

        let due: Vec<ScheduledNotification> = sqlx::query_as(
            r#"
            SELECT * FROM scheduled_notifications
            WHERE status = 'pending' AND deliver_after <= NOW()
            ORDER BY deliver_after ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if due.is_empty() {
            return Ok(0);
        }
        tracing::info!(count = due.len(), "Delivering due notifications");

        let mut sent = 0;
        for notification in due {
            let attempt = notification.attempts + 1;
            match self.post_notification(&notification).await {
                Ok(()) => {
                    sqlx::query(
                        r#"
                        UPDATE scheduled_notifications
                        SET status = $2, attempts = $3, sent_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(notification.id)
                    .bind(NotificationStatus::Sent.to_string())
                    .bind(attempt)
                    .execute(&self.pool)
                    .await?;
                    sent += 1;
                }
                Err(err) => {
                    // Bounded retry: the row stays pending until attempts
                    // run out, then fails terminally
                    let status = if attempt >= MAX_DELIVERY_ATTEMPTS {
                        NotificationStatus::Failed
                    } else {
                        NotificationStatus::Pending
                    };
                    sqlx::query(
                        r#"
                        UPDATE scheduled_notifications
                        SET status = $2, attempts = $3, last_error = $4
                        WHERE id = $1
                        "#,
                    )
                    .bind(notification.id)
                    .bind(status.to_string())
                    .bind(attempt)
                    .bind(err.to_string())
                    .execute(&self.pool)
                    .await?;

                    if status == NotificationStatus::Failed {
                        tracing::error!(
                            notification_id = %notification.id,
                            attempts = attempt,
                            error = %err,
                            "Notification permanently failed"
                        );
                    } else {
                        tracing::warn!(
                            notification_id = %notification.id,
                            attempts = attempt,
                            error = %err,
                            "Notification delivery failed, will retry"
                        );
                    }
                }
            }
        }
        Ok(sent)
    }

    async fn post_notification(&self, notification: &ScheduledNotification) -> JobsResult<()> {
        let email: Option<String> =
            sqlx::query_scalar(r#"SELECT email FROM accounts WHERE id = $1"#)
                .bind(notification.account_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();

        let body = serde_json::json!({
            "account_id": notification.account_id,
            "email": email,
            "message_type": notification.message_type,
            "metadata": notification.metadata,
        });

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(JobsError::Notification(format!(
                "delivery sink returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Sweep terminal notifications past the retention window
    pub async fn cleanup_old_notifications(&self) -> JobsResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM scheduled_notifications
            WHERE status IN ('sent', 'cancelled', 'failed')
              AND created_at < NOW() - INTERVAL '90 days'
            "#,
        )
        .execute(&self.pool)
        .await?;

        let count = deleted.rows_affected();
        if count > 0 {
            tracing::info!(count, "Cleaned up old notifications");
        }
        Ok(count)
    }
}
