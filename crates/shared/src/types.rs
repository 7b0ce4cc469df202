//! Common types used across Brandcast

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Hard cap on team size, independent of plan
pub const TEAM_MAX_MEMBERS: i32 = 3;

// =============================================================================
// Enums
// =============================================================================

/// Subscription plan for billing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Tier1,
    Tier2,
}

impl Default for Plan {
    fn default() -> Self {
        Self::Free
    }
}

impl Plan {
    /// Credits granted at each billing-period reset
    ///
    /// Default grants:
    /// - Free: 1 (applies on downgrade; the signup grant covers first contact)
    /// - Tier1: 50
    /// - Tier2: 150
    ///
    /// Configurable via environment variables:
    /// - `PLAN_GRANT_FREE_CREDITS`
    /// - `PLAN_GRANT_TIER1_CREDITS`
    /// - `PLAN_GRANT_TIER2_CREDITS`
    pub fn monthly_grant(&self) -> i64 {
        match self {
            Self::Free => std::env::var("PLAN_GRANT_FREE_CREDITS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            Self::Tier1 => std::env::var("PLAN_GRANT_TIER1_CREDITS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            Self::Tier2 => std::env::var("PLAN_GRANT_TIER2_CREDITS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(150),
        }
    }

    /// Whether this plan is billed (non-free)
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Whether subscribers on this plan receive the automatic daily visual
    pub fn has_daily_visuals(&self) -> bool {
        matches!(self, Self::Tier1 | Self::Tier2)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Tier1 => write!(f, "tier1"),
            Self::Tier2 => write!(f, "tier2"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "tier1" => Ok(Self::Tier1),
            "tier2" => Ok(Self::Tier2),
            _ => Err(format!("Invalid plan: {}", s)),
        }
    }
}

/// Onboarding tier assigned from the daily signup counter
/// - EarlyBird: among the first `early_bird_cap` signups of the day
/// - Normal: within daily capacity but past the early-bird cutoff
/// - CapacityReached: past daily capacity, no signup grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignupTier {
    EarlyBird,
    Normal,
    CapacityReached,
}

impl SignupTier {
    /// Classify a post-increment counter value against the day's caps.
    /// The count must already include the signup being classified.
    pub fn for_count(count: i64, early_bird_cap: i64, daily_cap: i64) -> Self {
        if count <= early_bird_cap {
            Self::EarlyBird
        } else if count <= daily_cap {
            Self::Normal
        } else {
            Self::CapacityReached
        }
    }

    /// Credits granted at provisioning for this tier
    ///
    /// Default grants (configurable via environment variables):
    /// - EarlyBird: 2 (`SIGNUP_EARLY_BIRD_GRANT`)
    /// - Normal: 1 (`SIGNUP_STANDARD_GRANT`)
    /// - CapacityReached: 0 (fixed)
    pub fn grant(&self) -> i64 {
        match self {
            Self::EarlyBird => std::env::var("SIGNUP_EARLY_BIRD_GRANT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            Self::Normal => std::env::var("SIGNUP_STANDARD_GRANT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            Self::CapacityReached => 0,
        }
    }

    pub fn is_early_bird(&self) -> bool {
        matches!(self, Self::EarlyBird)
    }
}

impl std::fmt::Display for SignupTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EarlyBird => write!(f, "early_bird"),
            Self::Normal => write!(f, "normal"),
            Self::CapacityReached => write!(f, "capacity_reached"),
        }
    }
}

/// Batch job status
/// `completed` and `failed` are terminal: no transition ever leaves them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transition to `next` is legal from this status
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Scheduled notification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl Default for NotificationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Account (subscriber) model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub external_key: String,
    pub email: Option<String>,
    pub plan: String,
    pub credits: i64,
    pub credits_reset_at: Option<OffsetDateTime>,
    pub team_id: Option<Uuid>,
    pub is_early_bird: bool,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    pub billing_period_end: Option<OffsetDateTime>,
    pub opted_out: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Parse the stored plan tag, falling back to Free for unknown values
    pub fn current_plan(&self) -> Plan {
        self.plan.parse().unwrap_or_default()
    }

    /// Whether consumption resolves to a team pool instead of the
    /// personal balance
    pub fn is_teamed(&self) -> bool {
        self.team_id.is_some()
    }
}

/// Team model with the pooled credit balance
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Team {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub credits: i64,
    pub member_count: i32,
    pub credits_reset_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Team {
    pub fn is_full(&self) -> bool {
        self.member_count >= TEAM_MAX_MEMBERS
    }
}

/// One calendar day's signup counter row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailySignup {
    pub signup_date: Date,
    pub count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Brand profile (generation input) model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BrandProfile {
    pub id: Uuid,
    pub account_id: Uuid,
    pub name: String,
    pub tagline: Option<String>,
    pub industry: Option<String>,
    pub audience: Option<String>,
    pub tone: Option<String>,
    pub angles: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl BrandProfile {
    /// Stored marketing angles as strings; non-string entries are dropped
    pub fn angle_list(&self) -> Vec<String> {
        self.angles
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Batch job model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchJob {
    pub id: Uuid,
    pub account_id: Uuid,
    pub brand_profile_id: Option<Uuid>,
    pub status: String,
    pub scheduled_for: OffsetDateTime,
    pub result_url: Option<String>,
    pub error: Option<String>,
    pub processed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl BatchJob {
    /// Parse the stored status tag, falling back to Pending for unknown values
    pub fn current_status(&self) -> JobStatus {
        self.status.parse().unwrap_or_default()
    }
}

/// Scheduled notification model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledNotification {
    pub id: Uuid,
    pub account_id: Uuid,
    pub message_type: String,
    pub deliver_after: OffsetDateTime,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub sent_at: Option<OffsetDateTime>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Plan Tests
    // =========================================================================

    #[test]
    fn test_plan_default() {
        assert_eq!(Plan::default(), Plan::Free);
    }

    #[test]
    fn test_plan_monthly_grants() {
        // Test defaults only when env overrides are not set
        if std::env::var("PLAN_GRANT_FREE_CREDITS").is_err() {
            assert_eq!(Plan::Free.monthly_grant(), 1);
        }
        if std::env::var("PLAN_GRANT_TIER1_CREDITS").is_err() {
            assert_eq!(Plan::Tier1.monthly_grant(), 50);
        }
        if std::env::var("PLAN_GRANT_TIER2_CREDITS").is_err() {
            assert_eq!(Plan::Tier2.monthly_grant(), 150);
        }
    }

    #[test]
    fn test_plan_daily_visuals() {
        assert!(!Plan::Free.has_daily_visuals());
        assert!(Plan::Tier1.has_daily_visuals());
        assert!(Plan::Tier2.has_daily_visuals());
    }

    #[test]
    fn test_plan_is_paid() {
        assert!(!Plan::Free.is_paid());
        assert!(Plan::Tier1.is_paid());
        assert!(Plan::Tier2.is_paid());
    }

    #[test]
    fn test_plan_display_and_parse() {
        assert_eq!(format!("{}", Plan::Free), "free");
        assert_eq!(format!("{}", Plan::Tier1), "tier1");
        assert_eq!(format!("{}", Plan::Tier2), "tier2");

        assert_eq!("free".parse::<Plan>().unwrap(), Plan::Free);
        assert_eq!("TIER1".parse::<Plan>().unwrap(), Plan::Tier1);
        assert_eq!("Tier2".parse::<Plan>().unwrap(), Plan::Tier2);
        assert!("platinum".parse::<Plan>().is_err());
    }

    // =========================================================================
    // SignupTier Tests
    // =========================================================================

    #[test]
    fn test_signup_tier_boundaries() {
        assert_eq!(SignupTier::for_count(1, 30, 300), SignupTier::EarlyBird);
        assert_eq!(SignupTier::for_count(30, 30, 300), SignupTier::EarlyBird);
        assert_eq!(SignupTier::for_count(31, 30, 300), SignupTier::Normal);
        assert_eq!(SignupTier::for_count(300, 30, 300), SignupTier::Normal);
        assert_eq!(
            SignupTier::for_count(301, 30, 300),
            SignupTier::CapacityReached
        );
    }

    #[test]
    fn test_signup_tier_grants() {
        if std::env::var("SIGNUP_EARLY_BIRD_GRANT").is_err() {
            assert_eq!(SignupTier::EarlyBird.grant(), 2);
        }
        if std::env::var("SIGNUP_STANDARD_GRANT").is_err() {
            assert_eq!(SignupTier::Normal.grant(), 1);
        }
        assert_eq!(SignupTier::CapacityReached.grant(), 0);
    }

    #[test]
    fn test_signup_tier_early_bird_flag() {
        assert!(SignupTier::EarlyBird.is_early_bird());
        assert!(!SignupTier::Normal.is_early_bird());
        assert!(!SignupTier::CapacityReached.is_early_bird());
    }

    #[test]
    fn test_signup_tier_display() {
        assert_eq!(format!("{}", SignupTier::EarlyBird), "early_bird");
        assert_eq!(format!("{}", SignupTier::Normal), "normal");
        assert_eq!(
            format!("{}", SignupTier::CapacityReached),
            "capacity_reached"
        );
    }

    // =========================================================================
    // JobStatus Tests
    // =========================================================================

    #[test]
    fn test_job_status_default() {
        assert_eq!(JobStatus::default(), JobStatus::Pending);
    }

    #[test]
    fn test_job_status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));

        // Nothing leaves a terminal state
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));

        // No skipping the processing step
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_job_status_display_and_parse() {
        assert_eq!(format!("{}", JobStatus::Pending), "pending");
        assert_eq!(format!("{}", JobStatus::Processing), "processing");
        assert_eq!(
            "completed".parse::<JobStatus>().unwrap(),
            JobStatus::Completed
        );
        assert_eq!("FAILED".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("paused".parse::<JobStatus>().is_err());
    }

    // =========================================================================
    // NotificationStatus Tests
    // =========================================================================

    #[test]
    fn test_notification_status_terminality() {
        assert!(!NotificationStatus::Pending.is_terminal());
        assert!(NotificationStatus::Sent.is_terminal());
        assert!(NotificationStatus::Cancelled.is_terminal());
        assert!(NotificationStatus::Failed.is_terminal());
    }

    // =========================================================================
    // Model Helper Tests
    // =========================================================================

    fn test_account(plan: &str, team_id: Option<Uuid>) -> Account {
        Account {
            id: Uuid::new_v4(),
            external_key: "user_123".to_string(),
            email: Some("owner@example.com".to_string()),
            plan: plan.to_string(),
            credits: 0,
            credits_reset_at: None,
            team_id,
            is_early_bird: false,
            billing_customer_id: None,
            billing_subscription_id: None,
            billing_period_end: None,
            opted_out: false,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_account_current_plan() {
        assert_eq!(test_account("tier1", None).current_plan(), Plan::Tier1);
        // Unknown tags fall back to free rather than erroring
        assert_eq!(test_account("legacy", None).current_plan(), Plan::Free);
    }

    #[test]
    fn test_account_is_teamed() {
        assert!(!test_account("free", None).is_teamed());
        assert!(test_account("tier1", Some(Uuid::new_v4())).is_teamed());
    }

    #[test]
    fn test_team_is_full() {
        let mut team = Team {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            credits: 10,
            member_count: 2,
            credits_reset_at: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        assert!(!team.is_full());
        team.member_count = TEAM_MAX_MEMBERS;
        assert!(team.is_full());
    }

    #[test]
    fn test_brand_profile_angle_list() {
        let profile = BrandProfile {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            name: "Acme Coffee".to_string(),
            tagline: Some("Wake up better".to_string()),
            industry: Some("food".to_string()),
            audience: None,
            tone: None,
            angles: serde_json::json!(["morning ritual", "local roaster", 42]),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(
            profile.angle_list(),
            vec!["morning ritual".to_string(), "local roaster".to_string()]
        );

        let empty = BrandProfile {
            angles: serde_json::json!({}),
            ..profile
        };
        assert!(empty.angle_list().is_empty());
    }
}
