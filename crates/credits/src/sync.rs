//! Billing provider synchronization
//!
//! Translates signed webhook events from the payment provider into ledger
//! mutations. The provider is the source of truth for plan state; this
//! module never calls out to it, it only reacts to what it is told.
//!
//! Idempotency: every processed event id is recorded in `billing_events`
//! (unique on `event_id`), and replays are acknowledged without reapplying.
//! The mutations themselves are absolute writes (set balance, set period
//! end), so even a replay that slips past the check repeats the same final
//! state rather than double-granting.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use brandcast_shared::{Account, Plan};

use crate::error::{CreditsError, CreditsResult};
use crate::ledger::CreditLedger;

type HmacSha256 = Hmac<Sha256>;

/// Accepted skew between the signature timestamp and the current clock
const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

// ===== Signature verification =====

/// Verifies `Brandcast-Signature` headers of the form `t=<unix>,v1=<hex>`,
/// where `v1 = HMAC-SHA256(secret, "{t}.{raw body}")`.
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify(&self, payload: &[u8], signature_header: &str) -> CreditsResult<()> {
        self.verify_at(payload, signature_header, OffsetDateTime::now_utc())
    }

    /// Verification against an injected clock, split out so tests can pin
    /// the timestamp
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: OffsetDateTime,
    ) -> CreditsResult<()> {
        let (timestamp, provided) = parse_signature_header(signature_header)
            .ok_or(CreditsError::WebhookSignatureInvalid)?;

        if (now.unix_timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECONDS {
            return Err(CreditsError::WebhookSignatureInvalid);
        }

        let expected = self.compute_signature(payload, timestamp)?;
        if constant_time_compare(&expected, provided) {
            Ok(())
        } else {
            Err(CreditsError::WebhookSignatureInvalid)
        }
    }

    /// Produce a header the provider would send for `payload` at
    /// `timestamp`. Used to build fixtures in tests and staging tools.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> CreditsResult<String> {
        let signature = self.compute_signature(payload, timestamp)?;
        Ok(format!("t={},v1={}", timestamp, signature))
    }

    fn compute_signature(&self, payload: &[u8], timestamp: i64) -> CreditsResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| CreditsError::Internal("HMAC key initialization failed".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Parse `t=<unix>,v1=<hex>`. Unknown fields are skipped so the provider
/// can add signature versions without breaking us.
fn parse_signature_header(header: &str) -> Option<(i64, &str)> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value),
            _ => {}
        }
    }
    Some((timestamp?, signature?))
}

/// Constant-time comparison to prevent timing attacks on signature checks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        // Compare against self anyway so length mismatches cost the same
        let _ = a.as_bytes().ct_eq(a.as_bytes());
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ===== Event envelope =====

/// Event types this system reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEventKind {
    SubscriptionActivated,
    InvoicePaid,
    SubscriptionUpdated,
    SubscriptionCancelled,
    PaymentFailed,
}

impl BillingEventKind {
    /// Map a wire event type. Unrecognized types return `None` and are
    /// acknowledged without action.
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "subscription.activated" => Some(Self::SubscriptionActivated),
            "invoice.paid" => Some(Self::InvoicePaid),
            "subscription.updated" => Some(Self::SubscriptionUpdated),
            "subscription.cancelled" => Some(Self::SubscriptionCancelled),
            "payment.failed" => Some(Self::PaymentFailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionActivated => "subscription.activated",
            Self::InvoicePaid => "invoice.paid",
            Self::SubscriptionUpdated => "subscription.updated",
            Self::SubscriptionCancelled => "subscription.cancelled",
            Self::PaymentFailed => "payment.failed",
        }
    }
}

/// Webhook event envelope as the provider posts it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: BillingEventData,
}

/// Payload fields this system reads; everything else in the provider's
/// envelope is ignored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingEventData {
    pub external_key: Option<String>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub plan: Option<String>,
    /// Unix seconds
    pub period_end: Option<i64>,
}

/// What applying one event did
#[derive(Debug)]
pub enum SyncOutcome {
    Applied {
        kind: BillingEventKind,
        account: Account,
    },
    /// Event id already processed
    Duplicate,
    /// Event references no account we know
    UnknownAccount,
    /// Event type we do not handle
    Ignored,
}

// ===== Sync service =====

pub struct BillingSync {
    pool: PgPool,
    ledger: CreditLedger,
}

impl BillingSync {
    pub fn new(pool: PgPool) -> Self {
        let ledger = CreditLedger::new(pool.clone());
        Self { pool, ledger }
    }

    /// Apply one verified event to the ledger.
    ///
    /// Unknown accounts and unhandled types are logged and acknowledged so
    /// the provider stops retrying them. Ledger errors propagate, which
    /// surfaces as a 5xx and leaves the event unrecorded for redelivery.
    pub async fn apply(&self, event: &BillingEvent) -> CreditsResult<SyncOutcome> {
        let Some(kind) = BillingEventKind::parse(&event.event_type) else {
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Ignoring unhandled billing event type"
            );
            return Ok(SyncOutcome::Ignored);
        };

        if self.already_applied(&event.id).await? {
            tracing::info!(event_id = %event.id, "Skipping replayed billing event");
            return Ok(SyncOutcome::Duplicate);
        }

        let Some(account) = self.resolve_account(&event.data).await? else {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Billing event references no known account"
            );
            self.record_event(event, kind, None).await?;
            return Ok(SyncOutcome::UnknownAccount);
        };

        match kind {
            BillingEventKind::SubscriptionActivated => {
                let plan = parse_event_plan(&event.data)?;
                let period_end = parse_period_end(&event.data)?;
                self.ledger
                    .record_billing_refs(
                        &account.external_key,
                        event.data.customer_id.as_deref(),
                        event.data.subscription_id.as_deref(),
                        period_end,
                    )
                    .await?;
                self.ledger.reset_for_plan(&account.external_key, plan).await?;
            }
            BillingEventKind::InvoicePaid => {
                // Renewal: the plan already on file decides the grant
                self.ledger
                    .reset_for_plan(&account.external_key, account.current_plan())
                    .await?;
            }
            BillingEventKind::SubscriptionUpdated => match parse_period_end(&event.data)? {
                Some(period_end) => {
                    self.ledger
                        .update_period_end(&account.external_key, period_end)
                        .await?;
                }
                None => {
                    tracing::warn!(
                        event_id = %event.id,
                        "subscription.updated carried no period_end"
                    );
                }
            },
            BillingEventKind::SubscriptionCancelled => {
                self.ledger.downgrade_to_free(&account.external_key).await?;
            }
            BillingEventKind::PaymentFailed => {
                // Recorded for support visibility; the balance is untouched
                // until the provider follows up with a cancellation
                tracing::info!(
                    external_key = %account.external_key,
                    event_id = %event.id,
                    "Payment failed for account"
                );
            }
        }

        self.record_event(event, kind, Some(account.id)).await?;
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            external_key = %account.external_key,
            "Applied billing event"
        );

        // Return the post-mutation row
        let account = self.ledger.get_account(&account.external_key).await?;
        Ok(SyncOutcome::Applied { kind, account })
    }

    async fn already_applied(&self, event_id: &str) -> CreditsResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM billing_events WHERE event_id = $1)"#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Prefer the explicit identity key; fall back to the stored billing
    /// customer reference for events that only carry provider ids
    async fn resolve_account(&self, data: &BillingEventData) -> CreditsResult<Option<Account>> {
        if let Some(key) = &data.external_key {
            if let Some(account) = self.ledger.find_by_external_key(key).await? {
                return Ok(Some(account));
            }
        }
        if let Some(customer_id) = &data.customer_id {
            return self.ledger.find_by_customer_id(customer_id).await;
        }
        Ok(None)
    }

    async fn record_event(
        &self,
        event: &BillingEvent,
        kind: BillingEventKind,
        account_id: Option<Uuid>,
    ) -> CreditsResult<()> {
        let payload = serde_json::to_value(&event.data)?;
        sqlx::query(
            r#"
            INSERT INTO billing_events (id, event_id, event_type, account_id, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.id)
        .bind(kind.as_str())
        .bind(account_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_event_plan(data: &BillingEventData) -> CreditsResult<Plan> {
    let tag = data
        .plan
        .as_deref()
        .ok_or_else(|| CreditsError::InvalidPayload("activation event missing plan".to_string()))?;
    tag.parse()
        .map_err(|_| CreditsError::InvalidPlan(tag.to_string()))
}

fn parse_period_end(data: &BillingEventData) -> CreditsResult<Option<OffsetDateTime>> {
    match data.period_end {
        Some(seconds) => OffsetDateTime::from_unix_timestamp(seconds)
            .map(Some)
            .map_err(|_| {
                CreditsError::InvalidPayload(format!("invalid period_end timestamp: {}", seconds))
            }),
        None => Ok(None),
    }
}
