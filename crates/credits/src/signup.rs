//! Daily signup tier counter
//!
//! One row per UTC calendar day, incremented with a single atomic upsert so
//! racing first-time signups each get a distinct post-increment count. The
//! count including the current signup decides the onboarding tier. Rows are
//! never decremented or deleted.
//!
//! Caps are configurable via environment variables:
//! - `SIGNUP_EARLY_BIRD_CAP`: early-bird cutoff per day (default: 30)
//! - `SIGNUP_DAILY_CAP`: granted-signup capacity per day (default: 300)

use std::sync::OnceLock;
use time::Date;

use brandcast_shared::SignupTier;

use crate::error::CreditsResult;

/// Get configurable early-bird cutoff
fn get_early_bird_cap() -> i64 {
    static CAP: OnceLock<i64> = OnceLock::new();
    *CAP.get_or_init(|| {
        std::env::var("SIGNUP_EARLY_BIRD_CAP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30)
    })
}

/// Get configurable daily signup capacity
fn get_daily_cap() -> i64 {
    static CAP: OnceLock<i64> = OnceLock::new();
    *CAP.get_or_init(|| {
        std::env::var("SIGNUP_DAILY_CAP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300)
    })
}

/// Outcome of observing one signup
#[derive(Debug, Clone)]
pub struct SignupObservation {
    pub tier: SignupTier,
    /// The day's count including this signup
    pub count: i64,
}

/// Count one first-time signup for `today` and classify it.
///
/// The upsert is the only write path to the counter; callers must invoke it
/// at most once per identity (the ledger's provision path guards this, and
/// rolls the increment back when it loses the account-creation race).
pub async fn observe_signup<'e, E>(executor: E, today: Date) -> CreditsResult<SignupObservation>
where
    E: sqlx::PgExecutor<'e>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO daily_signups (signup_date, count)
        VALUES ($1, 1)
        ON CONFLICT (signup_date)
        DO UPDATE SET count = daily_signups.count + 1, updated_at = NOW()
        RETURNING count
        "#,
    )
    .bind(today)
    .fetch_one(executor)
    .await?;

    let tier = SignupTier::for_count(count, get_early_bird_cap(), get_daily_cap());
    tracing::debug!(date = %today, count, tier = %tier, "Observed signup");

    Ok(SignupObservation { tier, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandcast_shared::create_pool;
    use uuid::Uuid;

    #[test]
    fn test_cap_defaults() {
        if std::env::var("SIGNUP_EARLY_BIRD_CAP").is_err() {
            assert_eq!(get_early_bird_cap(), 30);
        }
        if std::env::var("SIGNUP_DAILY_CAP").is_err() {
            assert_eq!(get_daily_cap(), 300);
        }
    }

    /// Pick a date no other test run has touched so counts start from zero
    fn fresh_test_date() -> Date {
        let base = Date::from_julian_day(2_500_000).unwrap_or(Date::MIN);
        let offset = (Uuid::new_v4().as_u128() % 500_000) as i32;
        Date::from_julian_day(base.to_julian_day() + offset).unwrap_or(base)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_observe_increments_sequentially() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url).await.expect("Failed to create pool");
        let date = fresh_test_date();

        let first = observe_signup(&pool, date).await.unwrap();
        let second = observe_signup(&pool, date).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_concurrent_observations_never_share_a_count() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url).await.expect("Failed to create pool");
        let date = fresh_test_date();

        let mut handles = Vec::new();
        for _ in 0..35 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                observe_signup(&pool, date).await.unwrap()
            }));
        }

        let mut counts = Vec::new();
        let mut early_birds = 0;
        let mut normals = 0;
        for handle in handles {
            let observation = handle.await.unwrap();
            counts.push(observation.count);
            match observation.tier {
                SignupTier::EarlyBird => early_birds += 1,
                SignupTier::Normal => normals += 1,
                SignupTier::CapacityReached => {}
            }
        }

        counts.sort_unstable();
        assert_eq!(counts, (1..=35).collect::<Vec<i64>>());

        // Tier split only holds at the default caps
        if std::env::var("SIGNUP_EARLY_BIRD_CAP").is_err()
            && std::env::var("SIGNUP_DAILY_CAP").is_err()
        {
            assert_eq!(early_birds, 30);
            assert_eq!(normals, 5);
        }
    }
}
