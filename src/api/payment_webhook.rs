//! Payment Event Reconciler
//!
//! POST /api/v1/webhooks/stripe translates gateway payment outcomes into
//! reservation state transitions. The handler must receive the raw body (not
//! parsed JSON) for HMAC signature verification.
//!
//! Delivery is at-least-once: the event row keyed by the gateway event id is
//! the dedup barrier, and `processed_at` is only set after the
//! reservation-side transition committed, so a crash mid-processing is
//! retried by the next delivery. Races against the sweeper are resolved by
//! conditional updates: the loser observes zero affected rows and re-reads.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::db::reservations::{self, ConfirmExpiredOutcome, ReservationStatus};
use crate::db::{RepoResult, payment_events};
use crate::state::AppState;
use crate::stripe::{self, CheckoutSession};
use crate::util;

/// Handle incoming Stripe webhook events
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    // 1. Get Stripe-Signature header
    let sig_header = match headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    {
        Some(s) => s,
        None => {
            tracing::warn!("Missing Stripe-Signature header");
            return StatusCode::BAD_REQUEST;
        }
    };

    // 2. Verify signature before any processing
    if let Err(e) =
        stripe::verify_webhook_signature(&body, sig_header, &state.config.stripe_webhook_secret)
    {
        tracing::warn!(error = e, "Webhook signature verification failed");
        return StatusCode::BAD_REQUEST;
    }

    // 3. Parse JSON event
    let event: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(%e, "Failed to parse webhook JSON");
            return StatusCode::BAD_REQUEST;
        }
    };

    let event_id = match event["id"].as_str() {
        Some(id) => id,
        None => {
            tracing::warn!("Webhook event missing id");
            return StatusCode::BAD_REQUEST;
        }
    };
    let event_type = event["type"].as_str().unwrap_or("");
    let livemode = event["livemode"].as_bool().unwrap_or(false);
    tracing::info!(event_id = event_id, event_type = event_type, "Received Stripe webhook");

    // 4. Dedup barrier: one row per gateway event id
    let record = match payment_events::insert_or_load(
        &state.pool,
        event_id,
        event_type,
        livemode,
        &String::from_utf8_lossy(&body),
    )
    .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(%e, "DB error recording webhook event");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    if record.processed_at.is_some() {
        tracing::info!(event_id = event_id, "Duplicate webhook event, skipping");
        return StatusCode::OK;
    }

    // 5. Dispatch on event type
    let outcome = match event_type {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            match session_object(&event) {
                Some(session) => handle_session_paid(&state, &session).await,
                None => Ok(None),
            }
        }
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            match session_object(&event) {
                Some(session) => handle_session_expired(&state, &session).await,
                None => Ok(None),
            }
        }
        _ => {
            tracing::debug!(event_type = event_type, "Unhandled webhook event type");
            Ok(None)
        }
    };

    // 6. Mark processed only after the reservation side settled; an error
    //    leaves the row unprocessed so the gateway's redelivery retries it.
    match outcome {
        Ok(reservation_id) => {
            if let Err(e) =
                payment_events::mark_processed(&state.pool, record.id, reservation_id).await
            {
                tracing::error!(%e, event_id = event_id, "Failed to mark event processed");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!(
                %e,
                event_id = event_id,
                event_type = event_type,
                "Webhook processing failed, event left for redelivery"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn session_object(event: &serde_json::Value) -> Option<CheckoutSession> {
    let obj = event.get("data").and_then(|d| d.get("object"))?;
    match stripe::parse_session(obj) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(error = %e, "Webhook session object unreadable");
            None
        }
    }
}

/// Payment success: drive the reservation to CONFIRMED, or to manual review
/// when the money and the seats no longer line up.
async fn handle_session_paid(
    state: &AppState,
    session: &CheckoutSession,
) -> RepoResult<Option<i64>> {
    let pool = &state.pool;
    let Some(mut reservation) =
        reservations::find_for_session(pool, &session.id, session.metadata_reservation_id).await?
    else {
        // Acknowledge anyway: retry-looping the gateway cannot conjure the row.
        tracing::warn!(checkout_session_id = %session.id, "No reservation for paid session");
        return Ok(None);
    };

    let email = session.customer_email.as_deref();
    let intent = session.payment_intent_id.as_deref();

    // Gateway says the session completed but the money is not actually in
    // (e.g. delayed verification): operator decision.
    if session.payment_status.as_deref() != Some("paid") {
        reservations::mark_manual_review(pool, reservation.id, email, intent).await?;
        tracing::warn!(
            reservation_id = reservation.id,
            payment_status = ?session.payment_status,
            "Session completed without paid status, flagged for review"
        );
        return Ok(Some(reservation.id));
    }

    if reservation.status() == Some(ReservationStatus::PendingPayment) {
        if reservations::confirm_pending(pool, &reservation, email, intent).await? {
            tracing::info!(
                reservation_id = reservation.id,
                reference = %reservation.reference_code,
                "Reservation confirmed"
            );
            return Ok(Some(reservation.id));
        }
        // Lost the race (sweeper expired it between our read and the update).
        // Re-read and fall through to the terminal-state handling below.
        match reservations::find_by_id(pool, reservation.id).await? {
            Some(current) => reservation = current,
            None => return Ok(None),
        }
    }

    match reservation.status() {
        Some(ReservationStatus::Confirmed) => {
            // Duplicate success: keep the newest contact details only.
            reservations::update_contact(pool, reservation.id, email, intent).await?;
        }
        Some(ReservationStatus::Cancelled) => {
            // Paid for a cancelled booking: refund is an operator call.
            reservations::mark_manual_review(pool, reservation.id, email, intent).await?;
        }
        Some(ReservationStatus::Expired) => {
            let lapsed_for = util::now_millis() - reservation.hold_expires_at;
            if lapsed_for > state.config.late_reopen_max_millis() {
                // Too stale to rebook automatically, whatever capacity says.
                reservations::mark_manual_review(pool, reservation.id, email, intent).await?;
                tracing::warn!(
                    reservation_id = reservation.id,
                    lapsed_ms = lapsed_for,
                    "Payment arrived past the reopen window, flagged for review"
                );
            } else {
                match reservations::confirm_expired(pool, &reservation, email, intent).await? {
                    ConfirmExpiredOutcome::Confirmed => {
                        tracing::info!(
                            reservation_id = reservation.id,
                            "Expired reservation reopened and confirmed"
                        );
                    }
                    ConfirmExpiredOutcome::NoCapacity => {
                        reservations::mark_manual_review(pool, reservation.id, email, intent)
                            .await?;
                        tracing::warn!(
                            reservation_id = reservation.id,
                            "Late payment but slot is full, flagged for review"
                        );
                    }
                    ConfirmExpiredOutcome::LostRace => {
                        reservations::update_contact(pool, reservation.id, email, intent).await?;
                    }
                }
            }
        }
        _ => {
            reservations::update_contact(pool, reservation.id, email, intent).await?;
        }
    }

    Ok(Some(reservation.id))
}

/// Payment failure or session expiry: release the hold if the reservation is
/// still pending, and keep the gateway-collected email for follow-up.
async fn handle_session_expired(
    state: &AppState,
    session: &CheckoutSession,
) -> RepoResult<Option<i64>> {
    let pool = &state.pool;
    let Some(reservation) =
        reservations::find_for_session(pool, &session.id, session.metadata_reservation_id).await?
    else {
        tracing::warn!(checkout_session_id = %session.id, "No reservation for expired session");
        return Ok(None);
    };

    if reservation.status() == Some(ReservationStatus::PendingPayment)
        && reservations::expire_pending(pool, &reservation).await?
    {
        tracing::info!(
            reservation_id = reservation.id,
            "Hold released after failed/expired payment session"
        );
    }

    // If the payment landed after all, Stripe also emits a completed event;
    // that handler decides next.
    if session.customer_email.is_some() {
        reservations::update_contact(
            pool,
            reservation.id,
            session.customer_email.as_deref(),
            None,
        )
        .await?;
    }

    Ok(Some(reservation.id))
}
