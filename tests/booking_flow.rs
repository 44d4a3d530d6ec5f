//! Booking engine properties: capacity invariant, expiry exactly-once,
//! reconciliation races and idempotency, exercised at the repository layer.

mod common;

use akai_booking::db::reservations::{
    self, ConfirmExpiredOutcome, NewReservation, ReservationStatus,
};
use akai_booking::db::{self, RepoError, idempotency, payment_events};
use akai_booking::jobs::expire_holds;
use akai_booking::state::AppState;
use akai_booking::util;

use common::{future_open_date, make_reservation, slot_of, test_config, test_state};

#[tokio::test]
async fn full_slot_rejects_further_bookings() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let hold = util::now_millis() + 15 * 60 * 1000;

    let first = make_reservation(&state, &date, "19:00", 8, hold)
        .await
        .expect("first booking fits");
    let slot = slot_of(&state, &first).await;
    assert_eq!(slot.capacity_held, 8);
    assert_eq!(slot.capacity_confirmed, 0);

    let err = make_reservation(&state, &date, "19:00", 1, hold)
        .await
        .expect_err("slot is full");
    assert!(matches!(err, RepoError::SoldOut));

    // Capacity untouched by the failed attempt
    let slot = slot_of(&state, &first).await;
    assert_eq!(slot.capacity_held, 8);
    assert!(slot.capacity_held + slot.capacity_confirmed <= slot.capacity_total);
}

#[tokio::test]
async fn concurrent_holds_never_oversell() {
    // File-backed pool so writers actually contend on separate connections.
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("booking.db");
    let pool = db::connect(db_path.to_str().unwrap())
        .await
        .expect("file pool");
    let state = AppState::with_pool(test_config(), pool);

    let date = future_open_date(&state.config);
    let hold = util::now_millis() + 15 * 60 * 1000;

    // 4 seats, 4 concurrent parties of 2: exactly two can fit.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool = state.pool.clone();
        let date = date.clone();
        handles.push(tokio::spawn(async move {
            reservations::create_with_hold(
                &pool,
                &NewReservation {
                    service_date: &date,
                    start_time: "20:00",
                    slot_label: "Prime Time",
                    slot_capacity_total: 4,
                    guests: 2,
                    notes: None,
                    currency: "usd",
                    price_per_person_amount: 18000,
                    deposit_bps: 5000,
                    deposit_amount: 18000,
                    total_amount: 36000,
                    hold_expires_at: hold,
                    idempotency_record_id: None,
                },
            )
            .await
        }));
    }

    let mut successes = Vec::new();
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.expect("task join") {
            Ok(reservation) => successes.push(reservation),
            Err(RepoError::SoldOut) => sold_out += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes.len(), 2, "exactly the parties that fit succeed");
    assert_eq!(sold_out, 2);

    let slot = slot_of(&state, &successes[0]).await;
    assert_eq!(slot.capacity_held, 4);
    assert_eq!(slot.capacity_confirmed, 0);
    assert!(slot.capacity_held + slot.capacity_confirmed <= slot.capacity_total);
}

#[tokio::test]
async fn sweeper_expires_lapsed_holds_exactly_once() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let lapsed = util::now_millis() - 1000;

    let reservation = make_reservation(&state, &date, "18:30", 2, lapsed)
        .await
        .expect("booking");
    assert_eq!(slot_of(&state, &reservation).await.capacity_held, 2);

    let now = util::now_millis();
    let stats = expire_holds::expire_holds_once(&state.pool, now)
        .await
        .expect("sweep");
    assert_eq!(stats.scanned, 1);
    assert_eq!(stats.expired, 1);

    let current = reservations::find_by_id(&state.pool, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status(), Some(ReservationStatus::Expired));
    assert_eq!(slot_of(&state, &reservation).await.capacity_held, 0);

    // Second sweep is a no-op: the row is no longer PENDING_PAYMENT.
    let stats = expire_holds::expire_holds_once(&state.pool, util::now_millis())
        .await
        .expect("second sweep");
    assert_eq!(stats.expired, 0);
    assert_eq!(slot_of(&state, &reservation).await.capacity_held, 0);
}

#[tokio::test]
async fn sweeper_skips_unexpired_holds() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let hold = util::now_millis() + 15 * 60 * 1000;

    make_reservation(&state, &date, "18:30", 2, hold)
        .await
        .expect("booking");

    let stats = expire_holds::expire_holds_once(&state.pool, util::now_millis())
        .await
        .expect("sweep");
    assert_eq!(stats.scanned, 0);
    assert_eq!(stats.expired, 0);
}

#[tokio::test]
async fn payment_success_converts_held_capacity() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let hold = util::now_millis() + 15 * 60 * 1000;

    let reservation = make_reservation(&state, &date, "19:00", 3, hold)
        .await
        .expect("booking");

    let confirmed =
        reservations::confirm_pending(&state.pool, &reservation, Some("guest@example.com"), Some("pi_1"))
            .await
            .expect("confirm");
    assert!(confirmed);

    let current = reservations::find_by_id(&state.pool, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status(), Some(ReservationStatus::Confirmed));
    assert_eq!(current.stripe_customer_email.as_deref(), Some("guest@example.com"));
    assert!(current.paid_at.is_some());
    assert!(current.confirmed_at.is_some());

    let slot = slot_of(&state, &reservation).await;
    assert_eq!(slot.capacity_held, 0);
    assert_eq!(slot.capacity_confirmed, 3);
}

#[tokio::test]
async fn confirm_loses_race_against_sweeper() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let lapsed = util::now_millis() - 1000;

    let reservation = make_reservation(&state, &date, "19:00", 2, lapsed)
        .await
        .expect("booking");
    expire_holds::expire_holds_once(&state.pool, util::now_millis())
        .await
        .expect("sweep");

    // The reconciler's conditional update reports the lost race instead of
    // blindly overwriting the EXPIRED status.
    let confirmed = reservations::confirm_pending(&state.pool, &reservation, None, None)
        .await
        .expect("confirm attempt");
    assert!(!confirmed);

    let slot = slot_of(&state, &reservation).await;
    assert_eq!(slot.capacity_held, 0);
    assert_eq!(slot.capacity_confirmed, 0);
}

#[tokio::test]
async fn late_payment_reopens_when_capacity_remains() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let lapsed = util::now_millis() - 1000;

    let reservation = make_reservation(&state, &date, "21:30", 2, lapsed)
        .await
        .expect("booking");
    expire_holds::expire_holds_once(&state.pool, util::now_millis())
        .await
        .expect("sweep");

    let outcome = reservations::confirm_expired(&state.pool, &reservation, None, Some("pi_late"))
        .await
        .expect("reopen");
    assert_eq!(outcome, ConfirmExpiredOutcome::Confirmed);

    let current = reservations::find_by_id(&state.pool, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status(), Some(ReservationStatus::Confirmed));

    let slot = slot_of(&state, &reservation).await;
    assert_eq!(slot.capacity_held, 0);
    assert_eq!(slot.capacity_confirmed, 2);
}

#[tokio::test]
async fn late_payment_flags_review_when_seats_are_gone() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let lapsed = util::now_millis() - 1000;
    let hold = util::now_millis() + 15 * 60 * 1000;

    // Party A holds 6, expires; party B books 6 of the 8 seats and pays.
    let expired_res = make_reservation(&state, &date, "20:00", 6, lapsed)
        .await
        .expect("booking A");
    expire_holds::expire_holds_once(&state.pool, util::now_millis())
        .await
        .expect("sweep");

    let paid_res = make_reservation(&state, &date, "20:00", 6, hold)
        .await
        .expect("booking B");
    assert!(
        reservations::confirm_pending(&state.pool, &paid_res, None, None)
            .await
            .expect("confirm B")
    );

    // A's late payment no longer fits (8 - 6 confirmed < 6 guests).
    let outcome = reservations::confirm_expired(&state.pool, &expired_res, None, None)
        .await
        .expect("reopen attempt");
    assert_eq!(outcome, ConfirmExpiredOutcome::NoCapacity);

    // Status and capacity are untouched; the caller routes to manual review.
    let current = reservations::find_by_id(&state.pool, expired_res.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status(), Some(ReservationStatus::Expired));

    let slot = slot_of(&state, &expired_res).await;
    assert_eq!(slot.capacity_confirmed, 6);
    assert_eq!(slot.capacity_held, 0);
}

#[tokio::test]
async fn failed_payment_releases_hold_once() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let hold = util::now_millis() + 15 * 60 * 1000;

    let reservation = make_reservation(&state, &date, "18:30", 4, hold)
        .await
        .expect("booking");

    assert!(
        reservations::expire_pending(&state.pool, &reservation)
            .await
            .expect("expire")
    );
    assert_eq!(slot_of(&state, &reservation).await.capacity_held, 0);

    // A redelivered failure event finds the row already EXPIRED.
    assert!(
        !reservations::expire_pending(&state.pool, &reservation)
            .await
            .expect("second expire")
    );
    assert_eq!(slot_of(&state, &reservation).await.capacity_held, 0);
}

#[tokio::test]
async fn idempotency_begin_resumes_and_replays() {
    let state = test_state().await;

    let first = idempotency::begin(&state.pool, "key-1", "checkout_session_create", "hash-a")
        .await
        .expect("begin");
    assert_eq!(first.status, idempotency::STATUS_IN_PROGRESS);

    // Same key loads the same record instead of inserting
    let second = idempotency::begin(&state.pool, "key-1", "checkout_session_create", "hash-a")
        .await
        .expect("begin again");
    assert_eq!(second.id, first.id);

    // The stored hash is what the handler compares against; a different
    // payload for the same key is a conflict at that layer.
    assert_eq!(second.request_hash, "hash-a");

    let body = serde_json::json!({"reservationId": 1});
    idempotency::complete(&state.pool, first.id, &body)
        .await
        .expect("complete");

    let replayed = idempotency::begin(&state.pool, "key-1", "checkout_session_create", "hash-a")
        .await
        .expect("replay");
    assert!(replayed.is_completed());
    assert_eq!(replayed.response_body.as_deref(), Some(body.to_string().as_str()));
}

#[tokio::test]
async fn idempotency_records_expire_after_retention() {
    let state = test_state().await;

    let record = idempotency::begin(&state.pool, "key-2", "checkout_session_create", "hash-b")
        .await
        .expect("begin");

    // Age the record past its window, then sweep.
    sqlx::query("UPDATE idempotency_key SET expires_at = ?1 WHERE id = ?2")
        .bind(util::now_millis() - 1)
        .bind(record.id)
        .execute(&state.pool)
        .await
        .expect("age record");

    let purged = idempotency::purge_expired(&state.pool, util::now_millis())
        .await
        .expect("purge");
    assert_eq!(purged, 1);

    let fresh = idempotency::begin(&state.pool, "key-2", "checkout_session_create", "hash-b")
        .await
        .expect("begin after purge");
    assert_ne!(fresh.id, record.id);
    assert_eq!(fresh.status, idempotency::STATUS_IN_PROGRESS);
}

#[tokio::test]
async fn payment_events_dedupe_by_event_id() {
    let state = test_state().await;
    let date = future_open_date(&state.config);
    let reservation = make_reservation(&state, &date, "19:00", 2, util::now_millis() + 60_000)
        .await
        .expect("booking");

    let event = payment_events::insert_or_load(
        &state.pool,
        "evt_1",
        "checkout.session.completed",
        false,
        "{}",
    )
    .await
    .expect("insert");
    assert!(event.processed_at.is_none());

    payment_events::mark_processed(&state.pool, event.id, Some(reservation.id))
        .await
        .expect("mark");

    let replay = payment_events::insert_or_load(
        &state.pool,
        "evt_1",
        "checkout.session.completed",
        false,
        "{}",
    )
    .await
    .expect("replay load");
    assert_eq!(replay.id, event.id);
    assert!(replay.processed_at.is_some());
    assert_eq!(replay.reservation_id, Some(reservation.id));
}
