//! Availability API
//!
//! Remaining capacity per slot, derived straight from the Capacity Ledger.
//! Slots that were never booked do not exist as rows yet and report the
//! configured default capacity.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::slots::{self, ServiceSlot};
use crate::error::{AppError, AppResult};
use crate::dates;
use crate::state::AppState;

/// 余位状态: available | limited | unavailable
fn slot_status(is_enabled: bool, remaining: i64, limited_threshold: i64) -> &'static str {
    if !is_enabled || remaining <= 0 {
        "unavailable"
    } else if remaining <= limited_threshold {
        "limited"
    } else {
        "available"
    }
}

#[derive(Deserialize)]
pub struct DayQuery {
    pub date: String,
}

#[derive(Serialize)]
pub struct SlotAvailability {
    pub time: String,
    pub label: String,
    pub capacity: i64,
    pub confirmed: i64,
    pub held: i64,
    pub remaining: i64,
    pub status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingInfo {
    pub currency: String,
    pub price_per_person: i64,
    pub deposit_bps: i64,
}

#[derive(Serialize)]
pub struct DayAvailability {
    pub date: String,
    pub timezone: String,
    pub slots: Vec<SlotAvailability>,
    pub pricing: PricingInfo,
}

/// GET /api/v1/availability?date=YYYY-MM-DD
pub async fn day(
    State(state): State<AppState>,
    Query(query): Query<DayQuery>,
) -> AppResult<Json<DayAvailability>> {
    let config = &state.config;
    let date = dates::parse_iso_date(&query.date)?;

    let today = dates::today_in_tz(config.timezone);
    let is_closed = config.is_closed_weekday(dates::weekday_number(date));
    let in_past = date < today;

    let times: Vec<String> = config.service_times.iter().map(|t| t.time.clone()).collect();
    let existing = slots::find_for_date(&state.pool, &query.date, &times).await?;
    let by_time: HashMap<&str, &ServiceSlot> = existing
        .iter()
        .map(|s| (s.start_time.as_str(), s))
        .collect();

    let slots = config
        .service_times
        .iter()
        .map(|service_time| {
            let row = by_time.get(service_time.time.as_str());
            let capacity = row.map_or(config.capacity_total, |s| s.capacity_total);
            let confirmed = row.map_or(0, |s| s.capacity_confirmed);
            let held = row.map_or(0, |s| s.capacity_held);
            let is_enabled = row.map_or(true, |s| s.is_enabled) && !is_closed && !in_past;
            let remaining = (capacity - confirmed - held).max(0);

            SlotAvailability {
                time: service_time.time.clone(),
                label: row.map_or(service_time.label.clone(), |s| s.label.clone()),
                capacity,
                confirmed,
                held,
                remaining,
                status: slot_status(is_enabled, remaining, config.limited_threshold),
            }
        })
        .collect();

    Ok(Json(DayAvailability {
        date: query.date,
        timezone: config.timezone.to_string(),
        slots,
        pricing: PricingInfo {
            currency: config.currency.clone(),
            price_per_person: config.price_per_person_amount,
            deposit_bps: config.deposit_bps,
        },
    }))
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub from: String,
    pub to: String,
}

#[derive(Serialize)]
pub struct DayStatus {
    pub date: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct RangeAvailability {
    pub from: String,
    pub to: String,
    pub timezone: String,
    pub dates: Vec<DayStatus>,
}

/// GET /api/v1/availability/range?from=..&to=..
///
/// Coarse per-day status over a bounded window. A day's status is the best
/// status among its enabled slots.
pub async fn range(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> AppResult<Json<RangeAvailability>> {
    let config = &state.config;
    let from = dates::parse_iso_date(&query.from)?;
    let to = dates::parse_iso_date(&query.to)?;
    if to < from {
        return Err(AppError::validation("`to` must be >= `from`"));
    }

    let all_dates = dates::list_dates_inclusive(from, to);
    if all_dates.len() as i64 > config.availability_range_max_days {
        return Err(AppError::RangeTooLarge(config.availability_range_max_days));
    }

    let existing = slots::find_in_range(&state.pool, &query.from, &query.to).await?;
    let mut grouped: HashMap<&str, HashMap<&str, &ServiceSlot>> = HashMap::new();
    for row in &existing {
        grouped
            .entry(row.service_date.as_str())
            .or_default()
            .insert(row.start_time.as_str(), row);
    }

    let today = dates::today_in_tz(config.timezone);
    let result = all_dates
        .into_iter()
        .map(|date| {
            let iso = dates::iso_string(date);
            if config.is_closed_weekday(dates::weekday_number(date)) || date < today {
                return DayStatus {
                    date: iso,
                    status: "unavailable",
                };
            }

            let day_rows = grouped.get(iso.as_str());
            let mut max_remaining = 0;
            let mut any_enabled = false;
            for service_time in &config.service_times {
                let row = day_rows.and_then(|m| m.get(service_time.time.as_str()));
                if !row.map_or(true, |s| s.is_enabled) {
                    continue;
                }
                any_enabled = true;
                let remaining = row.map_or(config.capacity_total, |s| s.remaining());
                max_remaining = max_remaining.max(remaining);
            }

            let status = if !any_enabled || max_remaining <= 0 {
                "unavailable"
            } else if max_remaining <= config.limited_threshold {
                "limited"
            } else {
                "available"
            };
            DayStatus { date: iso, status }
        })
        .collect();

    Ok(Json(RangeAvailability {
        from: query.from,
        to: query.to,
        timezone: config.timezone.to_string(),
        dates: result,
    }))
}
