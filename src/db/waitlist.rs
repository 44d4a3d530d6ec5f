//! Waitlist entries
//!
//! One email per service date; duplicate submissions are idempotent.

use sqlx::SqlitePool;

use super::RepoResult;
use crate::util;

/// Record an email against a date. Re-submitting the same pair is a no-op.
pub async fn add(pool: &SqlitePool, service_date: &str, email: &str) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO waitlist_entry (id, service_date, email, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (service_date, email) DO NOTHING",
    )
    .bind(util::snowflake_id())
    .bind(service_date)
    .bind(email)
    .bind(util::now_millis())
    .execute(pool)
    .await?;
    Ok(())
}
