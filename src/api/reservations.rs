//! Reservation lookup for the confirmation page
//!
//! The confirmation page polls this endpoint after the gateway redirect:
//! 202 with a poll-again hint while payment is still reconciling, the final
//! reservation view otherwise.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::db::reservations::{self, ReservationStatus};
use crate::db::slots;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

const NEXT_POLL_MS: i64 = 1500;

/// GET /api/v1/reservations/by-checkout-session/{checkout_session_id}
pub async fn by_checkout_session(
    State(state): State<AppState>,
    Path(checkout_session_id): Path<String>,
) -> AppResult<Response> {
    if checkout_session_id.trim().is_empty() {
        return Err(AppError::validation("Missing checkout session id"));
    }

    let reservation =
        reservations::find_by_checkout_session(&state.pool, &checkout_session_id)
            .await?
            .ok_or_else(|| AppError::not_found("Reservation not found"))?;

    if reservation.status() == Some(ReservationStatus::PendingPayment) {
        let body = serde_json::json!({
            "status": reservation.status,
            "nextPollMs": NEXT_POLL_MS,
        });
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let slot = slots::find_by_id(&state.pool, reservation.slot_id)
        .await?
        .ok_or_else(|| AppError::database(format!("slot {} missing", reservation.slot_id)))?;

    let body = serde_json::json!({
        "reservationId": reservation.id,
        "reference": reservation.reference_code,
        "status": reservation.status,
        "date": slot.service_date,
        "time": slot.start_time,
        "guests": reservation.guests,
        "notes": reservation.notes,
        "customer": { "email": reservation.stripe_customer_email },
        "amount": {
            "currency": reservation.currency,
            "deposit": reservation.deposit_amount,
            "total": reservation.total_amount,
        },
        "stripe": {
            "checkoutSessionId": reservation.stripe_checkout_session_id,
            "paymentIntentId": reservation.stripe_payment_intent_id,
        },
    });
    Ok((StatusCode::OK, Json(body)).into_response())
}
