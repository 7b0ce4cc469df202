//! Idempotent daily job creation
//!
//! Every account on a plan with daily visuals and at least one brand
//! profile gets one job per UTC calendar day. Existence is checked with a
//! date-range predicate instead of a unique constraint because on-demand
//! jobs with arbitrary schedules share the table.

use sqlx::PgPool;

use brandcast_shared::Plan;

use crate::error::JobsResult;

/// Create today's jobs for qualifying accounts. Returns how many were
/// created. Accounts without a brand profile are skipped silently; calling
/// again on the same day creates nothing.
pub async fn ensure_daily_jobs(pool: &PgPool) -> JobsResult<u64> {
    let qualifying: Vec<String> = [Plan::Free, Plan::Tier1, Plan::Tier2]
        .iter()
        .filter(|plan| plan.has_daily_visuals())
        .map(|plan| plan.to_string())
        .collect();

    let created = sqlx::query(
        r#"
        INSERT INTO batch_jobs (id, account_id, status, scheduled_for)
        SELECT gen_random_uuid(), a.id, 'pending', NOW()
        FROM accounts a
        WHERE a.plan = ANY($1)
          AND EXISTS (
              SELECT 1 FROM brand_profiles p WHERE p.account_id = a.id
          )
          AND NOT EXISTS (
              SELECT 1 FROM batch_jobs j
              WHERE j.account_id = a.id
                AND j.scheduled_for >= date_trunc('day', NOW())
                AND j.scheduled_for < date_trunc('day', NOW()) + INTERVAL '1 day'
          )
        "#,
    )
    .bind(&qualifying)
    .execute(pool)
    .await?;

    let count = created.rows_affected();
    if count > 0 {
        tracing::info!(count, "Created daily visual jobs");
    }
    Ok(count)
}
