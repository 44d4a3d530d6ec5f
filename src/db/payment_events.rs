//! Payment event records
//!
//! One row per gateway event id; the UNIQUE index is the dedup barrier
//! against Stripe's at-least-once delivery. `processed_at` stays NULL until
//! the reservation-side transition committed, so a crash mid-processing is
//! retried by the next delivery of the same event.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::RepoResult;
use crate::util;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentEvent {
    pub id: i64,
    pub event_id: String,
    pub event_type: String,
    pub livemode: bool,
    pub payload: String,
    pub processed_at: Option<i64>,
    pub reservation_id: Option<i64>,
    pub created_at: i64,
}

const EVENT_SELECT: &str = "SELECT id, event_id, event_type, livemode, payload, processed_at, reservation_id, created_at FROM payment_event";

/// Record the event, or load the previously recorded row for this event id.
pub async fn insert_or_load(
    pool: &SqlitePool,
    event_id: &str,
    event_type: &str,
    livemode: bool,
    payload: &str,
) -> RepoResult<PaymentEvent> {
    sqlx::query(
        "INSERT INTO payment_event (id, event_id, event_type, livemode, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (event_id) DO NOTHING",
    )
    .bind(util::snowflake_id())
    .bind(event_id)
    .bind(event_type)
    .bind(livemode)
    .bind(payload)
    .bind(util::now_millis())
    .execute(pool)
    .await?;

    let sql = format!("{EVENT_SELECT} WHERE event_id = ?");
    let event = sqlx::query_as::<_, PaymentEvent>(&sql)
        .bind(event_id)
        .fetch_one(pool)
        .await?;
    Ok(event)
}

/// Set `processed_at` once downstream processing completed successfully.
pub async fn mark_processed(
    pool: &SqlitePool,
    id: i64,
    reservation_id: Option<i64>,
) -> RepoResult<()> {
    sqlx::query("UPDATE payment_event SET processed_at = ?1, reservation_id = ?2 WHERE id = ?3")
        .bind(util::now_millis())
        .bind(reservation_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
