//! Credit ledger
//!
//! Owns the authoritative balance for every account. An account spends from
//! its personal `accounts.credits` column unless it belongs to a team, in
//! which case all members draw from the shared `teams.credits` pool. Every
//! balance mutation is a single conditional UPDATE so concurrent spenders
//! serialize on the row instead of racing a read-then-write.

use sqlx::PgPool;
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use brandcast_shared::{Account, Plan, Team, TEAM_MAX_MEMBERS};

use crate::error::{CreditsError, CreditsResult};
use crate::signup::observe_signup;

/// Effective balance view returned to API callers
#[derive(Debug, Clone, serde::Serialize)]
pub struct BalanceSummary {
    pub external_key: String,
    pub plan: Plan,
    pub balance: i64,
    pub is_early_bird: bool,
    /// True when the balance is a shared team pool
    pub pooled: bool,
}

#[derive(Clone)]
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ===== Provisioning =====

    /// Fetch the account for an external identity key, creating it on first
    /// contact.
    ///
    /// Provisioning observes the daily signup counter exactly once and sizes
    /// the initial grant from the resulting tier. Both writes share one
    /// transaction: losing the insert race to a concurrent request rolls the
    /// counter increment back and returns the winner's row, so one identity
    /// never counts twice.
    pub async fn ensure_provisioned(
        &self,
        external_key: &str,
        email: Option<&str>,
    ) -> CreditsResult<Account> {
        if let Some(account) = self.find_by_external_key(external_key).await? {
            return Ok(account);
        }

        let today = OffsetDateTime::now_utc().date();
        let mut tx = self.pool.begin().await?;

        let observation = observe_signup(&mut *tx, today).await?;
        let grant = observation.tier.grant();

        let inserted: Option<Account> = sqlx::query_as(
            r#"
            INSERT INTO accounts (id, external_key, email, plan, credits, is_early_bird)
            VALUES ($1, $2, $3, 'free', $4, $5)
            ON CONFLICT (external_key) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(external_key)
        .bind(email)
        .bind(grant)
        .bind(observation.tier.is_early_bird())
        .fetch_optional(&mut *tx)
        .await?;

        match inserted {
            Some(account) => {
                tx.commit().await?;
                tracing::info!(
                    external_key = %external_key,
                    tier = %observation.tier,
                    grant,
                    day_count = observation.count,
                    "Provisioned account"
                );
                Ok(account)
            }
            None => {
                // Lost the creation race; undo our counter increment and
                // return the row the winner created
                tx.rollback().await?;
                self.find_by_external_key(external_key)
                    .await?
                    .ok_or_else(|| CreditsError::AccountNotFound(external_key.to_string()))
            }
        }
    }

    // ===== Lookups =====

    pub async fn find_by_external_key(
        &self,
        external_key: &str,
    ) -> CreditsResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"SELECT * FROM accounts WHERE external_key = $1"#,
        )
        .bind(external_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    pub async fn get_account(&self, external_key: &str) -> CreditsResult<Account> {
        self.find_by_external_key(external_key)
            .await?
            .ok_or_else(|| CreditsError::AccountNotFound(external_key.to_string()))
    }

    pub async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> CreditsResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"SELECT * FROM accounts WHERE billing_customer_id = $1"#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    /// Effective balance: the team pool when teamed, else personal credits
    pub async fn effective_balance(&self, account: &Account) -> CreditsResult<i64> {
        match account.team_id {
            Some(team_id) => {
                let credits: Option<i64> =
                    sqlx::query_scalar(r#"SELECT credits FROM teams WHERE id = $1"#)
                        .bind(team_id)
                        .fetch_optional(&self.pool)
                        .await?;
                credits.ok_or_else(|| CreditsError::TeamNotFound(team_id.to_string()))
            }
            None => Ok(account.credits),
        }
    }

    pub async fn balance_summary(&self, external_key: &str) -> CreditsResult<BalanceSummary> {
        let account = self.get_account(external_key).await?;
        let balance = self.effective_balance(&account).await?;
        Ok(BalanceSummary {
            external_key: account.external_key.clone(),
            plan: account.current_plan(),
            balance,
            is_early_bird: account.is_early_bird,
            pooled: account.is_teamed(),
        })
    }

    // ===== Spending =====

    /// Atomically consume credits from the effective owner. Returns the
    /// post-decrement balance.
    ///
    /// The decrement only lands when the balance covers the full amount, so
    /// two consumers racing for the last credit cannot both win and the
    /// balance never goes negative.
    pub async fn consume(&self, external_key: &str, amount: i64) -> CreditsResult<i64> {
        if amount <= 0 {
            return Err(CreditsError::InvalidAmount(format!(
                "consume amount must be positive, got {}",
                amount
            )));
        }

        let account = self.get_account(external_key).await?;

        let new_balance: Option<i64> = match account.team_id {
            Some(team_id) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE teams
                    SET credits = credits - $2, updated_at = NOW()
                    WHERE id = $1 AND credits >= $2
                    RETURNING credits
                    "#,
                )
                .bind(team_id)
                .bind(amount)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    UPDATE accounts
                    SET credits = credits - $2, updated_at = NOW()
                    WHERE id = $1 AND credits >= $2
                    RETURNING credits
                    "#,
                )
                .bind(account.id)
                .bind(amount)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match new_balance {
            Some(balance) => {
                tracing::debug!(
                    external_key = %external_key,
                    amount,
                    balance,
                    pooled = account.is_teamed(),
                    "Consumed credits"
                );
                Ok(balance)
            }
            None => {
                let available = self.effective_balance(&account).await?;
                Err(CreditsError::InsufficientCredits {
                    required: amount,
                    available,
                })
            }
        }
    }

    /// Return credits to the effective owner after a failed downstream call.
    /// There is no reservation phase; spend paths consume first and refund
    /// on failure.
    pub async fn refund(&self, external_key: &str, amount: i64) -> CreditsResult<i64> {
        if amount <= 0 {
            return Err(CreditsError::InvalidAmount(format!(
                "refund amount must be positive, got {}",
                amount
            )));
        }

        let account = self.get_account(external_key).await?;

        let new_balance: Option<i64> = match account.team_id {
            Some(team_id) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE teams
                    SET credits = credits + $2, updated_at = NOW()
                    WHERE id = $1
                    RETURNING credits
                    "#,
                )
                .bind(team_id)
                .bind(amount)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    UPDATE accounts
                    SET credits = credits + $2, updated_at = NOW()
                    WHERE id = $1
                    RETURNING credits
                    "#,
                )
                .bind(account.id)
                .bind(amount)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        let balance = new_balance.ok_or_else(|| {
            CreditsError::AccountNotFound(external_key.to_string())
        })?;

        tracing::debug!(
            external_key = %external_key,
            amount,
            balance,
            "Refunded credits"
        );
        Ok(balance)
    }

    // ===== Billing-driven resets =====

    /// Set the effective owner's balance to the plan's monthly grant and
    /// schedule the next reset one calendar month from now. Anchoring on
    /// now (not the previous reset) keeps late-arriving webhooks from
    /// drifting the period.
    pub async fn reset_for_plan(&self, external_key: &str, plan: Plan) -> CreditsResult<Account> {
        let account = self.get_account(external_key).await?;
        let grant = plan.monthly_grant();
        let next_reset = one_month_from(OffsetDateTime::now_utc());

        let mut tx = self.pool.begin().await?;
        match account.team_id {
            Some(team_id) => {
                // Pooled account: the grant lands on the team row
                let updated = sqlx::query(
                    r#"
                    UPDATE teams
                    SET credits = $2, credits_reset_at = $3, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(team_id)
                .bind(grant)
                .bind(next_reset)
                .execute(&mut *tx)
                .await?;
                if updated.rows_affected() == 0 {
                    return Err(CreditsError::TeamNotFound(team_id.to_string()));
                }

                sqlx::query(
                    r#"
                    UPDATE accounts
                    SET plan = $2, credits_reset_at = $3, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(account.id)
                .bind(plan.to_string())
                .bind(next_reset)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE accounts
                    SET plan = $2, credits = $3, credits_reset_at = $4, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(account.id)
                .bind(plan.to_string())
                .bind(grant)
                .bind(next_reset)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        tracing::info!(
            external_key = %external_key,
            plan = %plan,
            grant,
            next_reset = %next_reset,
            "Reset credits for plan"
        );
        self.get_account(external_key).await
    }

    /// Drop an account to the free plan: free-tier balance, no scheduled
    /// reset, billing references cleared.
    pub async fn downgrade_to_free(&self, external_key: &str) -> CreditsResult<Account> {
        let account = self.get_account(external_key).await?;
        let grant = Plan::Free.monthly_grant();

        let mut tx = self.pool.begin().await?;
        match account.team_id {
            Some(team_id) => {
                sqlx::query(
                    r#"
                    UPDATE teams
                    SET credits = $2, credits_reset_at = NULL, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(team_id)
                .bind(grant)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE accounts
                    SET plan = 'free',
                        credits_reset_at = NULL,
                        billing_customer_id = NULL,
                        billing_subscription_id = NULL,
                        billing_period_end = NULL,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(account.id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE accounts
                    SET plan = 'free',
                        credits = $2,
                        credits_reset_at = NULL,
                        billing_customer_id = NULL,
                        billing_subscription_id = NULL,
                        billing_period_end = NULL,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(account.id)
                .bind(grant)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        tracing::info!(external_key = %external_key, "Downgraded account to free");
        self.get_account(external_key).await
    }

    /// Store the external billing references delivered with an activation.
    /// Absent fields keep their current values.
    pub async fn record_billing_refs(
        &self,
        external_key: &str,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
        period_end: Option<OffsetDateTime>,
    ) -> CreditsResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET billing_customer_id = COALESCE($2, billing_customer_id),
                billing_subscription_id = COALESCE($3, billing_subscription_id),
                billing_period_end = COALESCE($4, billing_period_end),
                updated_at = NOW()
            WHERE external_key = $1
            "#,
        )
        .bind(external_key)
        .bind(customer_id)
        .bind(subscription_id)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CreditsError::AccountNotFound(external_key.to_string()));
        }
        Ok(())
    }

    /// Record a renewed billing period end without touching the balance
    pub async fn update_period_end(
        &self,
        external_key: &str,
        period_end: OffsetDateTime,
    ) -> CreditsResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET billing_period_end = $2, updated_at = NOW()
            WHERE external_key = $1
            "#,
        )
        .bind(external_key)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CreditsError::AccountNotFound(external_key.to_string()));
        }
        Ok(())
    }

    // ===== Teams =====

    /// Create a team pool owned by an existing account. The pool starts at
    /// zero; the owner's next billing reset funds it.
    pub async fn create_team(&self, owner_external_key: &str) -> CreditsResult<Team> {
        let owner = self.get_account(owner_external_key).await?;
        if owner.team_id.is_some() {
            return Err(CreditsError::AlreadyTeamed(owner_external_key.to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let team: Team = sqlx::query_as(
            r#"
            INSERT INTO teams (id, owner_id, credits, member_count)
            VALUES ($1, $2, 0, 1)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner.id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(r#"UPDATE accounts SET team_id = $2, updated_at = NOW() WHERE id = $1"#)
            .bind(owner.id)
            .bind(team.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(owner = %owner_external_key, team_id = %team.id, "Created team");
        Ok(team)
    }

    /// Add an account to a team. The member count increment is conditional
    /// on the cap, so concurrent joins cannot overfill the team.
    pub async fn add_member(
        &self,
        team_id: Uuid,
        member_external_key: &str,
    ) -> CreditsResult<Team> {
        let member = self.get_account(member_external_key).await?;
        if member.team_id.is_some() {
            return Err(CreditsError::AlreadyTeamed(member_external_key.to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let team: Option<Team> = sqlx::query_as(
            r#"
            UPDATE teams
            SET member_count = member_count + 1, updated_at = NOW()
            WHERE id = $1 AND member_count < $2
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(TEAM_MAX_MEMBERS)
        .fetch_optional(&mut *tx)
        .await?;

        let team = match team {
            Some(team) => team,
            None => {
                let members: Option<i32> =
                    sqlx::query_scalar(r#"SELECT member_count FROM teams WHERE id = $1"#)
                        .bind(team_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return match members {
                    Some(members) => Err(CreditsError::TeamFull {
                        members,
                        max: TEAM_MAX_MEMBERS,
                    }),
                    None => Err(CreditsError::TeamNotFound(team_id.to_string())),
                };
            }
        };

        sqlx::query(r#"UPDATE accounts SET team_id = $2, updated_at = NOW() WHERE id = $1"#)
            .bind(member.id)
            .bind(team.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            member = %member_external_key,
            team_id = %team.id,
            members = team.member_count,
            "Added team member"
        );
        Ok(team)
    }
}

/// One calendar month after `now`, clamping the day to the target month's
/// length (Jan 31 lands on Feb 28, or Feb 29 in a leap year)
fn one_month_from(now: OffsetDateTime) -> OffsetDateTime {
    let date = now.date();
    let (year, month) = match date.month() {
        Month::December => (date.year() + 1, Month::January),
        current => (date.year(), current.next()),
    };

    let mut day = date.day();
    let next = loop {
        match Date::from_calendar_date(year, month, day) {
            Ok(next) => break next,
            Err(_) => day -= 1,
        }
    };
    now.replace_date(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_one_month_from_plain_day() {
        assert_eq!(
            one_month_from(datetime!(2025-03-15 10:30:00 UTC)),
            datetime!(2025-04-15 10:30:00 UTC)
        );
    }

    #[test]
    fn test_one_month_from_clamps_to_shorter_month() {
        assert_eq!(
            one_month_from(datetime!(2025-01-31 00:00:00 UTC)),
            datetime!(2025-02-28 00:00:00 UTC)
        );
        assert_eq!(
            one_month_from(datetime!(2024-01-31 00:00:00 UTC)),
            datetime!(2024-02-29 00:00:00 UTC)
        );
        assert_eq!(
            one_month_from(datetime!(2025-05-31 12:00:00 UTC)),
            datetime!(2025-06-30 12:00:00 UTC)
        );
    }

    #[test]
    fn test_one_month_from_december_wraps_year() {
        assert_eq!(
            one_month_from(datetime!(2025-12-20 08:00:00 UTC)),
            datetime!(2026-01-20 08:00:00 UTC)
        );
    }

    #[test]
    fn test_one_month_from_preserves_time_of_day() {
        let next = one_month_from(datetime!(2025-07-04 23:59:59 UTC));
        assert_eq!(next, datetime!(2025-08-04 23:59:59 UTC));
    }
}
