//! Checkout initiation
//!
//! POST /api/v1/checkout-sessions: validates the request, takes a capacity
//! hold, creates the PENDING_PAYMENT reservation and opens a Stripe Checkout
//! Session for the deposit. With an `Idempotency-Key` header the whole
//! operation is at-most-once: for a given (key, scope) at most one
//! reservation and one gateway session are ever produced, regardless of how
//! often the client retries.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::db::reservations::{self, NewReservation, Reservation, ReservationStatus};
use crate::db::idempotency;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::{dates, stripe, util};

const IDEMPOTENCY_SCOPE: &str = "checkout_session_create";

const MAX_NOTES_LEN: usize = 2000;
const MAX_NAME_LEN: usize = 200;
const MAX_PHONE_LEN: usize = 50;
const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckoutRequest {
    pub date: String,
    pub time: String,
    pub guests: i64,
    pub notes: Option<String>,
    pub customer: Option<CustomerInput>,
}

fn validate_customer(customer: &CustomerInput) -> AppResult<()> {
    if let Some(email) = &customer.email
        && (email.len() > MAX_EMAIL_LEN || !email.contains('@'))
    {
        return Err(AppError::validation("Invalid customer email"));
    }
    if let Some(name) = &customer.name
        && (name.is_empty() || name.len() > MAX_NAME_LEN)
    {
        return Err(AppError::validation("Invalid customer name"));
    }
    if let Some(phone) = &customer.phone
        && (phone.is_empty() || phone.len() > MAX_PHONE_LEN)
    {
        return Err(AppError::validation("Invalid customer phone"));
    }
    Ok(())
}

/// POST /api/v1/checkout-sessions
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Response> {
    let config = &state.config;

    // ── Validation ──────────────────────────────────────────────────
    let service_time = config
        .service_time(&payload.time)
        .ok_or(AppError::InvalidTime)?
        .clone();

    if payload.guests < config.min_guests || payload.guests > config.max_guests {
        return Err(AppError::InvalidGuests);
    }
    if let Some(notes) = &payload.notes
        && notes.len() > MAX_NOTES_LEN
    {
        return Err(AppError::validation("Notes too long"));
    }
    if let Some(customer) = &payload.customer {
        validate_customer(customer)?;
    }

    let date = dates::parse_iso_date(&payload.date)?;
    let today = dates::today_in_tz(config.timezone);
    if date < today {
        return Err(AppError::PastDate);
    }
    if config.is_closed_weekday(dates::weekday_number(date)) {
        return Err(AppError::DateClosed);
    }

    // ── Idempotency guard ───────────────────────────────────────────
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let request_hash = util::request_hash(&serde_json::json!({
        "date": &payload.date,
        "time": &payload.time,
        "guests": payload.guests,
        "notes": payload.notes.clone().unwrap_or_default(),
        "customer": payload
            .customer
            .as_ref()
            .map(|c| serde_json::to_value(c).unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null),
    }));

    let mut idempotency_record = None;
    if let Some(key) = idempotency_key {
        let record = idempotency::begin(&state.pool, key, IDEMPOTENCY_SCOPE, &request_hash).await?;

        if record.request_hash != request_hash {
            return Err(AppError::IdempotencyConflict);
        }
        if record.is_completed()
            && let Some(body) = &record.response_body
        {
            // Replay the cached response; the booking must not re-run.
            let cached: serde_json::Value = serde_json::from_str(body)
                .map_err(|e| AppError::internal(format!("Corrupt cached response: {e}")))?;
            return Ok((StatusCode::OK, Json(cached)).into_response());
        }
        idempotency_record = Some(record);
    }

    let now = util::now_millis();

    // ── Resume or create the reservation ────────────────────────────
    let mut reservation: Option<Reservation> = None;
    if let Some(record) = &idempotency_record
        && let Some(reservation_id) = record.reservation_id
    {
        let existing = reservations::find_by_id(&state.pool, reservation_id).await?;
        if let Some(existing) = &existing
            && existing.hold_expires_at < now
        {
            return Err(AppError::HoldExpired);
        }
        reservation = existing;
    }

    let reservation = match reservation {
        Some(r) => r,
        None => {
            let total_amount = payload.guests * config.price_per_person_amount;
            let deposit_amount = (total_amount * config.deposit_bps) / 10000;

            reservations::create_with_hold(
                &state.pool,
                &NewReservation {
                    service_date: &payload.date,
                    start_time: &payload.time,
                    slot_label: &service_time.label,
                    slot_capacity_total: config.capacity_total,
                    guests: payload.guests,
                    notes: payload.notes.as_deref().filter(|n| !n.is_empty()),
                    currency: &config.currency,
                    price_per_person_amount: config.price_per_person_amount,
                    deposit_bps: config.deposit_bps,
                    deposit_amount,
                    total_amount,
                    hold_expires_at: now + config.hold_ttl_millis(),
                    idempotency_record_id: idempotency_record.as_ref().map(|r| r.id),
                },
            )
            .await?
        }
    };

    if reservation.status() != Some(ReservationStatus::PendingPayment) {
        return Err(AppError::ReservationNotPending);
    }

    // ── Stripe Checkout Session ─────────────────────────────────────
    let frontend_origin = config.frontend_origin.trim_end_matches('/');
    let success_url =
        format!("{frontend_origin}/#/confirmation?session_id={{CHECKOUT_SESSION_ID}}");
    let cancel_url = format!("{frontend_origin}/#/reservations?canceled=1");

    let had_session = reservation.stripe_checkout_session_id.is_some();
    let session = match &reservation.stripe_checkout_session_id {
        Some(session_id) => stripe::retrieve_checkout_session(&config.stripe_secret_key, session_id)
            .await
            .map_err(|e| AppError::internal(format!("Stripe session retrieve failed: {e}")))?,
        None => {
            // Stripe enforces a minimum expires_at; only pin the session to
            // the hold when the configured TTL is compatible.
            let expires_at = (config.hold_ttl_minutes >= 30)
                .then_some(reservation.hold_expires_at / 1000);

            let session = stripe::create_checkout_session(
                &config.stripe_secret_key,
                &stripe::CreateDepositSession {
                    currency: &reservation.currency,
                    deposit_amount: reservation.deposit_amount,
                    reservation_id: reservation.id,
                    reference_code: &reservation.reference_code,
                    service_date: &payload.date,
                    service_time: &payload.time,
                    guests: reservation.guests,
                    customer_email: payload
                        .customer
                        .as_ref()
                        .and_then(|c| c.email.as_deref()),
                    success_url: &success_url,
                    cancel_url: &cancel_url,
                    expires_at,
                    idempotency_key,
                },
            )
            .await
            .map_err(|e| AppError::internal(format!("Stripe session create failed: {e}")))?;

            reservations::set_checkout_session(&state.pool, reservation.id, &session.id).await?;
            session
        }
    };

    // ── Response (cached verbatim for idempotent replay) ────────────
    let response_body = serde_json::json!({
        "reservationId": reservation.id,
        "reference": &reservation.reference_code,
        "status": &reservation.status,
        "holdExpiresAt": dates::millis_to_rfc3339(reservation.hold_expires_at),
        "amount": {
            "currency": &reservation.currency,
            "deposit": reservation.deposit_amount,
            "total": reservation.total_amount,
        },
        "stripe": {
            "checkoutSessionId": session.id,
            "checkoutUrl": session.url,
        },
    });

    if let Some(record) = &idempotency_record {
        idempotency::complete(&state.pool, record.id, &response_body).await?;
    }

    tracing::info!(
        reservation_id = reservation.id,
        reference = %reservation.reference_code,
        guests = reservation.guests,
        date = %payload.date,
        time = %payload.time,
        "Checkout session opened"
    );

    let status = if had_session {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(response_body)).into_response())
}
