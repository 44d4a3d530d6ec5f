//! Waitlist API

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::db::waitlist;
use crate::dates;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WaitlistRequest {
    pub date: String,
    pub email: String,
}

#[derive(Serialize)]
pub struct WaitlistResponse {
    pub status: &'static str,
}

/// POST /api/v1/waitlist
///
/// Duplicate submissions for the same (date, email) are idempotent successes.
pub async fn join(
    State(state): State<AppState>,
    Json(payload): Json<WaitlistRequest>,
) -> AppResult<(StatusCode, Json<WaitlistResponse>)> {
    dates::parse_iso_date(&payload.date)?;
    if payload.email.len() > 254 || !payload.email.contains('@') {
        return Err(AppError::validation("Invalid email"));
    }

    waitlist::add(&state.pool, &payload.date, &payload.email).await?;

    Ok((
        StatusCode::CREATED,
        Json(WaitlistResponse {
            status: "WAITLISTED",
        }),
    ))
}
