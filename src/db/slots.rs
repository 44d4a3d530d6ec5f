//! Capacity Ledger
//!
//! Per (service_date, start_time) seat counters. Every mutation is a single
//! conditional UPDATE checked through `rows_affected()`, so two concurrent
//! bookings contending for the last seats can never both succeed; the CHECK
//! constraints in the schema back this up at the storage level.
//!
//! Slots are created lazily on the first booking attempt and never deleted.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnection, SqliteExecutor};

use super::{RepoError, RepoResult};
use crate::util;

const SLOT_SELECT: &str = "SELECT id, service_date, start_time, label, capacity_total, capacity_held, capacity_confirmed, is_enabled, created_at, updated_at FROM service_slot";

/// Service slot row (服务时段)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceSlot {
    pub id: i64,
    pub service_date: String,
    pub start_time: String,
    pub label: String,
    pub capacity_total: i64,
    pub capacity_held: i64,
    pub capacity_confirmed: i64,
    pub is_enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ServiceSlot {
    /// Seats still bookable. Never negative even if counters drift.
    pub fn remaining(&self) -> i64 {
        (self.capacity_total - self.capacity_held - self.capacity_confirmed).max(0)
    }
}

pub async fn find_by_id<'e, E>(db: E, id: i64) -> RepoResult<Option<ServiceSlot>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{SLOT_SELECT} WHERE id = ?");
    let row = sqlx::query_as::<_, ServiceSlot>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

/// All existing slots for one date, restricted to the configured times.
pub async fn find_for_date(
    pool: &SqlitePool,
    date: &str,
    times: &[String],
) -> RepoResult<Vec<ServiceSlot>> {
    if times.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; times.len()].join(", ");
    let sql = format!("{SLOT_SELECT} WHERE service_date = ? AND start_time IN ({placeholders})");
    let mut query = sqlx::query_as::<_, ServiceSlot>(&sql).bind(date);
    for time in times {
        query = query.bind(time.as_str());
    }
    Ok(query.fetch_all(pool).await?)
}

/// All existing slots in an inclusive date range (for the range endpoint).
pub async fn find_in_range(
    pool: &SqlitePool,
    from: &str,
    to: &str,
) -> RepoResult<Vec<ServiceSlot>> {
    let sql = format!("{SLOT_SELECT} WHERE service_date >= ? AND service_date <= ?");
    let rows = sqlx::query_as::<_, ServiceSlot>(&sql)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Load the slot for (date, time), creating it lazily with the configured
/// default capacity on first booking attempt.
pub async fn get_or_create(
    conn: &mut SqliteConnection,
    date: &str,
    time: &str,
    label: &str,
    capacity_total: i64,
    now: i64,
) -> RepoResult<ServiceSlot> {
    sqlx::query(
        "INSERT INTO service_slot (id, service_date, start_time, label, capacity_total, capacity_held, capacity_confirmed, is_enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 1, ?6, ?6)
         ON CONFLICT (service_date, start_time) DO NOTHING",
    )
    .bind(util::snowflake_id())
    .bind(date)
    .bind(time)
    .bind(label)
    .bind(capacity_total)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let sql = format!("{SLOT_SELECT} WHERE service_date = ? AND start_time = ?");
    let slot = sqlx::query_as::<_, ServiceSlot>(&sql)
        .bind(date)
        .bind(time)
        .fetch_one(&mut *conn)
        .await?;
    Ok(slot)
}

/// Take a hold of `guests` seats. The remaining-capacity check and the
/// increment execute as one conditional UPDATE; returns `false` when the
/// slot is disabled or lacks capacity (caller re-reads to classify).
pub async fn try_hold(
    conn: &mut SqliteConnection,
    slot_id: i64,
    guests: i64,
    now: i64,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE service_slot
         SET capacity_held = capacity_held + ?1, updated_at = ?2
         WHERE id = ?3 AND is_enabled = 1
           AND capacity_total - capacity_held - capacity_confirmed >= ?1",
    )
    .bind(guests)
    .bind(now)
    .bind(slot_id)
    .execute(&mut *conn)
    .await;
    match result {
        Ok(r) => Ok(r.rows_affected() == 1),
        // The schema CHECK is the backstop; tripping it means out of capacity
        Err(sqlx::Error::Database(e)) if e.is_check_violation() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Give a hold back (expiry or payment failure). Callers guard this behind
/// a status transition so it fires exactly once per reservation.
pub async fn release(
    conn: &mut SqliteConnection,
    slot_id: i64,
    guests: i64,
    now: i64,
) -> RepoResult<()> {
    let result = sqlx::query(
        "UPDATE service_slot
         SET capacity_held = capacity_held - ?1, updated_at = ?2
         WHERE id = ?3 AND capacity_held >= ?1",
    )
    .bind(guests)
    .bind(now)
    .bind(slot_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() != 1 {
        return Err(RepoError::Capacity(format!(
            "release of {guests} seats on slot {slot_id} would underflow"
        )));
    }
    Ok(())
}

/// Move `guests` seats from held to confirmed (successful payment).
pub async fn convert(
    conn: &mut SqliteConnection,
    slot_id: i64,
    guests: i64,
    now: i64,
) -> RepoResult<()> {
    let result = sqlx::query(
        "UPDATE service_slot
         SET capacity_held = capacity_held - ?1,
             capacity_confirmed = capacity_confirmed + ?1,
             updated_at = ?2
         WHERE id = ?3 AND capacity_held >= ?1",
    )
    .bind(guests)
    .bind(now)
    .bind(slot_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() != 1 {
        return Err(RepoError::Capacity(format!(
            "convert of {guests} seats on slot {slot_id} had no matching hold"
        )));
    }
    Ok(())
}

/// Confirm seats without a prior hold (late payment after the hold already
/// expired). Capacity-guarded; returns `false` when the seats are gone.
pub async fn confirm_direct(
    conn: &mut SqliteConnection,
    slot_id: i64,
    guests: i64,
    now: i64,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE service_slot
         SET capacity_confirmed = capacity_confirmed + ?1, updated_at = ?2
         WHERE id = ?3
           AND capacity_total - capacity_held - capacity_confirmed >= ?1",
    )
    .bind(guests)
    .bind(now)
    .bind(slot_id)
    .execute(&mut *conn)
    .await;
    match result {
        Ok(r) => Ok(r.rows_affected() == 1),
        Err(sqlx::Error::Database(e)) if e.is_check_violation() => Ok(false),
        Err(e) => Err(e.into()),
    }
}
