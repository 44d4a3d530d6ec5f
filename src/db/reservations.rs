//! Reservation Record & State Machine
//!
//! Rows are never deleted; they are the audit trail. Status transitions that
//! carry a capacity effect (`confirm_pending`, `expire_pending`,
//! `expire_lapsed`, `confirm_expired`) run the conditional status UPDATE and
//! the paired ledger mutation inside one transaction, so an observer never
//! sees a status change without its capacity effect. The loser of a race
//! observes zero affected rows and re-reads to decide its next action.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::{RepoError, RepoResult, is_unique_violation, slots};
use crate::util;

/// 预订状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    /// 初始状态, 占座等待支付
    PendingPayment,
    /// 终态: 支付成功
    Confirmed,
    /// 软终态: 占座超时释放, 迟到支付仍可恢复
    Expired,
    /// 终态: 已取消
    Cancelled,
    /// 终态: 需要人工处理
    RequiresManualReview,
}

impl ReservationStatus {
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Confirmed => "CONFIRMED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
            Self::RequiresManualReview => "REQUIRES_MANUAL_REVIEW",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "PENDING_PAYMENT" => Some(Self::PendingPayment),
            "CONFIRMED" => Some(Self::Confirmed),
            "EXPIRED" => Some(Self::Expired),
            "CANCELLED" => Some(Self::Cancelled),
            "REQUIRES_MANUAL_REVIEW" => Some(Self::RequiresManualReview),
            _ => None,
        }
    }
}

const RESERVATION_SELECT: &str = "SELECT id, reference_code, slot_id, status, guests, notes, currency, price_per_person_amount, deposit_bps, deposit_amount, total_amount, hold_expires_at, stripe_checkout_session_id, stripe_payment_intent_id, stripe_customer_email, paid_at, confirmed_at, created_at, updated_at FROM reservation";

/// Reservation row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reservation {
    pub id: i64,
    pub reference_code: String,
    pub slot_id: i64,
    pub status: String,
    pub guests: i64,
    pub notes: Option<String>,
    pub currency: String,
    pub price_per_person_amount: i64,
    pub deposit_bps: i64,
    pub deposit_amount: i64,
    pub total_amount: i64,
    pub hold_expires_at: i64,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_customer_email: Option<String>,
    pub paid_at: Option<i64>,
    pub confirmed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Reservation {
    pub fn status(&self) -> Option<ReservationStatus> {
        ReservationStatus::from_db(&self.status)
    }
}

/// New reservation parameters (slot is resolved inside `create_with_hold`)
pub struct NewReservation<'a> {
    pub service_date: &'a str,
    pub start_time: &'a str,
    pub slot_label: &'a str,
    pub slot_capacity_total: i64,
    pub guests: i64,
    pub notes: Option<&'a str>,
    pub currency: &'a str,
    pub price_per_person_amount: i64,
    pub deposit_bps: i64,
    pub deposit_amount: i64,
    pub total_amount: i64,
    pub hold_expires_at: i64,
    /// When set, the idempotency record is linked to the new reservation in
    /// the same transaction, so a crashed retry resumes instead of
    /// double-booking.
    pub idempotency_record_id: Option<i64>,
}

/// How many times a colliding reference code is re-rolled before giving up.
const REFERENCE_CODE_ATTEMPTS: usize = 8;

pub async fn find_by_id(pool: &SqlitePool, id: i64) -> RepoResult<Option<Reservation>> {
    let sql = format!("{RESERVATION_SELECT} WHERE id = ?");
    let row = sqlx::query_as::<_, Reservation>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn find_by_checkout_session(
    pool: &SqlitePool,
    checkout_session_id: &str,
) -> RepoResult<Option<Reservation>> {
    let sql = format!("{RESERVATION_SELECT} WHERE stripe_checkout_session_id = ?");
    let row = sqlx::query_as::<_, Reservation>(&sql)
        .bind(checkout_session_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Resolve the reservation for a gateway session: by stored session id first,
/// falling back to the reservation id embedded in the session metadata.
pub async fn find_for_session(
    pool: &SqlitePool,
    checkout_session_id: &str,
    metadata_reservation_id: Option<i64>,
) -> RepoResult<Option<Reservation>> {
    if let Some(found) = find_by_checkout_session(pool, checkout_session_id).await? {
        return Ok(Some(found));
    }
    match metadata_reservation_id {
        Some(id) => find_by_id(pool, id).await,
        None => Ok(None),
    }
}

/// Acquire a capacity hold and create the PENDING_PAYMENT reservation in one
/// transaction. Fails with `SlotDisabled` / `SoldOut` without side effects;
/// under concurrency only parties that fit the remaining capacity succeed.
pub async fn create_with_hold(
    pool: &SqlitePool,
    params: &NewReservation<'_>,
) -> RepoResult<Reservation> {
    let now = util::now_millis();
    let mut tx = pool.begin().await?;

    let slot = slots::get_or_create(
        &mut tx,
        params.service_date,
        params.start_time,
        params.slot_label,
        params.slot_capacity_total,
        now,
    )
    .await?;

    if !slot.is_enabled {
        return Err(RepoError::SlotDisabled);
    }

    if !slots::try_hold(&mut tx, slot.id, params.guests, now).await? {
        // Re-read to classify: the enabled flag can flip between statements.
        let current = slots::find_by_id(&mut *tx, slot.id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("slot {}", slot.id)))?;
        if !current.is_enabled {
            return Err(RepoError::SlotDisabled);
        }
        return Err(RepoError::SoldOut);
    }

    let mut created_id: Option<i64> = None;
    for _ in 0..REFERENCE_CODE_ATTEMPTS {
        let id = util::snowflake_id();
        let reference_code = util::generate_reference_code();
        let result = sqlx::query(
            "INSERT INTO reservation (id, reference_code, slot_id, status, guests, notes, currency, price_per_person_amount, deposit_bps, deposit_amount, total_amount, hold_expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'PENDING_PAYMENT', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        )
        .bind(id)
        .bind(&reference_code)
        .bind(slot.id)
        .bind(params.guests)
        .bind(params.notes)
        .bind(params.currency)
        .bind(params.price_per_person_amount)
        .bind(params.deposit_bps)
        .bind(params.deposit_amount)
        .bind(params.total_amount)
        .bind(params.hold_expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                created_id = Some(id);
                break;
            }
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let Some(id) = created_id else {
        return Err(RepoError::Duplicate(
            "reference code space exhausted".into(),
        ));
    };

    if let Some(record_id) = params.idempotency_record_id {
        sqlx::query("UPDATE idempotency_key SET reservation_id = ?1 WHERE id = ?2")
            .bind(id)
            .bind(record_id)
            .execute(&mut *tx)
            .await?;
    }

    let sql = format!("{RESERVATION_SELECT} WHERE id = ?");
    let reservation = sqlx::query_as::<_, Reservation>(&sql)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(reservation)
}

pub async fn set_checkout_session(
    pool: &SqlitePool,
    id: i64,
    checkout_session_id: &str,
) -> RepoResult<()> {
    sqlx::query("UPDATE reservation SET stripe_checkout_session_id = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(checkout_session_id)
        .bind(util::now_millis())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Update gateway-supplied contact metadata without touching status or
/// capacity. Fields are only overwritten when a value is present.
pub async fn update_contact(
    pool: &SqlitePool,
    id: i64,
    customer_email: Option<&str>,
    payment_intent_id: Option<&str>,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE reservation
         SET stripe_customer_email = COALESCE(?1, stripe_customer_email),
             stripe_payment_intent_id = COALESCE(?2, stripe_payment_intent_id),
             updated_at = ?3
         WHERE id = ?4",
    )
    .bind(customer_email)
    .bind(payment_intent_id)
    .bind(util::now_millis())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Unconditionally route a reservation to operator review, keeping whatever
/// contact details the gateway supplied. Capacity is left untouched.
pub async fn mark_manual_review(
    pool: &SqlitePool,
    id: i64,
    customer_email: Option<&str>,
    payment_intent_id: Option<&str>,
) -> RepoResult<()> {
    sqlx::query(
        "UPDATE reservation
         SET status = 'REQUIRES_MANUAL_REVIEW',
             stripe_customer_email = COALESCE(?1, stripe_customer_email),
             stripe_payment_intent_id = COALESCE(?2, stripe_payment_intent_id),
             updated_at = ?3
         WHERE id = ?4",
    )
    .bind(customer_email)
    .bind(payment_intent_id)
    .bind(util::now_millis())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// PENDING_PAYMENT -> CONFIRMED plus held -> confirmed capacity, atomically.
/// Returns `false` when the row was no longer PENDING_PAYMENT (lost the race
/// against the sweeper or a duplicate event); the caller re-reads.
pub async fn confirm_pending(
    pool: &SqlitePool,
    reservation: &Reservation,
    customer_email: Option<&str>,
    payment_intent_id: Option<&str>,
) -> RepoResult<bool> {
    let now = util::now_millis();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE reservation
         SET status = 'CONFIRMED',
             stripe_customer_email = COALESCE(?1, stripe_customer_email),
             stripe_payment_intent_id = COALESCE(?2, stripe_payment_intent_id),
             paid_at = ?3, confirmed_at = ?3, updated_at = ?3
         WHERE id = ?4 AND status = 'PENDING_PAYMENT'",
    )
    .bind(customer_email)
    .bind(payment_intent_id)
    .bind(now)
    .bind(reservation.id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        return Ok(false);
    }

    slots::convert(&mut tx, reservation.slot_id, reservation.guests, now).await?;
    tx.commit().await?;
    Ok(true)
}

/// PENDING_PAYMENT -> EXPIRED plus hold release, atomically (webhook failure
/// path, no lapse condition). Returns `false` if the row already moved on.
pub async fn expire_pending(pool: &SqlitePool, reservation: &Reservation) -> RepoResult<bool> {
    let now = util::now_millis();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE reservation SET status = 'EXPIRED', updated_at = ?1
         WHERE id = ?2 AND status = 'PENDING_PAYMENT'",
    )
    .bind(now)
    .bind(reservation.id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        return Ok(false);
    }

    slots::release(&mut tx, reservation.slot_id, reservation.guests, now).await?;
    tx.commit().await?;
    Ok(true)
}

/// Sweeper variant of [`expire_pending`]: also requires the hold to have
/// lapsed at commit time, guarding against a concurrent payment success.
pub async fn expire_lapsed(
    pool: &SqlitePool,
    reservation_id: i64,
    slot_id: i64,
    guests: i64,
    now: i64,
) -> RepoResult<bool> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE reservation SET status = 'EXPIRED', updated_at = ?1
         WHERE id = ?2 AND status = 'PENDING_PAYMENT' AND hold_expires_at < ?3",
    )
    .bind(now)
    .bind(reservation_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        return Ok(false);
    }

    slots::release(&mut tx, slot_id, guests, now).await?;
    tx.commit().await?;
    Ok(true)
}

/// Outcome of the EXPIRED -> CONFIRMED reopen attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmExpiredOutcome {
    /// Seats were still free; reservation is CONFIRMED again.
    Confirmed,
    /// Another booking took the seats; capacity untouched.
    NoCapacity,
    /// Status changed concurrently; caller re-reads.
    LostRace,
}

/// Late-arriving payment success after the hold already expired. The expiry
/// released the hold, so seats are only re-taken when the slot still has
/// room; otherwise nothing is mutated and the caller routes the row to
/// manual review.
pub async fn confirm_expired(
    pool: &SqlitePool,
    reservation: &Reservation,
    customer_email: Option<&str>,
    payment_intent_id: Option<&str>,
) -> RepoResult<ConfirmExpiredOutcome> {
    let now = util::now_millis();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE reservation
         SET status = 'CONFIRMED',
             stripe_customer_email = COALESCE(?1, stripe_customer_email),
             stripe_payment_intent_id = COALESCE(?2, stripe_payment_intent_id),
             paid_at = ?3, confirmed_at = ?3, updated_at = ?3
         WHERE id = ?4 AND status = 'EXPIRED'",
    )
    .bind(customer_email)
    .bind(payment_intent_id)
    .bind(now)
    .bind(reservation.id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        return Ok(ConfirmExpiredOutcome::LostRace);
    }

    if !slots::confirm_direct(&mut tx, reservation.slot_id, reservation.guests, now).await? {
        // Roll the status change back; the seats are gone.
        tx.rollback().await?;
        return Ok(ConfirmExpiredOutcome::NoCapacity);
    }

    tx.commit().await?;
    Ok(ConfirmExpiredOutcome::Confirmed)
}

/// Candidate row for the sweeper.
#[derive(Debug, sqlx::FromRow)]
pub struct ExpiryCandidate {
    pub id: i64,
    pub slot_id: i64,
    pub guests: i64,
}

/// Bounded batch of lapsed PENDING_PAYMENT reservations. A candidate stays
/// selectable until its transition commits, so failed rows retry next sweep.
pub async fn find_expiry_candidates(
    pool: &SqlitePool,
    now: i64,
    limit: i64,
) -> RepoResult<Vec<ExpiryCandidate>> {
    let rows = sqlx::query_as::<_, ExpiryCandidate>(
        "SELECT id, slot_id, guests FROM reservation
         WHERE status = 'PENDING_PAYMENT' AND hold_expires_at < ?1
         LIMIT ?2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
