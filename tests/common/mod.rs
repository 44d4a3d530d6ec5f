//! Shared test fixtures

#![allow(dead_code)]

use akai_booking::config::{Config, parse_service_times};
use akai_booking::db::reservations::{self, NewReservation, Reservation};
use akai_booking::db::slots::{self, ServiceSlot};
use akai_booking::db::{self, RepoResult};
use akai_booking::state::AppState;

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        http_port: 0,
        environment: "development".into(),
        database_path: ":memory:".into(),
        timezone: chrono_tz::UTC,
        stripe_secret_key: "sk_test_dev".into(),
        stripe_webhook_secret: "whsec_test".into(),
        frontend_origin: "http://localhost:3000".into(),
        hold_ttl_minutes: 15,
        capacity_total: 8,
        min_guests: 1,
        max_guests: 8,
        currency: "usd".into(),
        price_per_person_amount: 18000,
        deposit_bps: 5000,
        service_times: parse_service_times("18:30,19:00,20:00,21:30"),
        closed_weekdays: vec![0],
        limited_threshold: 2,
        availability_range_max_days: 93,
        sweep_interval_seconds: 30,
        late_reopen_max_minutes: 1440,
    }
}

pub async fn test_state() -> AppState {
    let pool = db::connect_in_memory().await.expect("in-memory pool");
    AppState::with_pool(test_config(), pool)
}

/// First bookable (non-closed) date at least 20 days out, in ISO form.
pub fn future_open_date(config: &Config) -> String {
    let mut date = akai_booking::dates::today_in_tz(config.timezone) + chrono::Duration::days(20);
    while config.is_closed_weekday(akai_booking::dates::weekday_number(date)) {
        date += chrono::Duration::days(1);
    }
    akai_booking::dates::iso_string(date)
}

/// Create a PENDING_PAYMENT reservation with a hold on (date, time).
pub async fn make_reservation(
    state: &AppState,
    date: &str,
    time: &str,
    guests: i64,
    hold_expires_at: i64,
) -> RepoResult<Reservation> {
    let config = &state.config;
    let total = guests * config.price_per_person_amount;
    reservations::create_with_hold(
        &state.pool,
        &NewReservation {
            service_date: date,
            start_time: time,
            slot_label: "Sunset",
            slot_capacity_total: config.capacity_total,
            guests,
            notes: None,
            currency: &config.currency,
            price_per_person_amount: config.price_per_person_amount,
            deposit_bps: config.deposit_bps,
            deposit_amount: (total * config.deposit_bps) / 10000,
            total_amount: total,
            hold_expires_at,
            idempotency_record_id: None,
        },
    )
    .await
}

pub async fn slot_of(state: &AppState, reservation: &Reservation) -> ServiceSlot {
    slots::find_by_id(&state.pool, reservation.slot_id)
        .await
        .expect("slot query")
        .expect("slot exists")
}
