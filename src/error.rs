//! 统一错误处理
//!
//! [`AppError`] is the application error enum; every variant carries a
//! machine-readable code surfaced to the booking UI. Expected conflict
//! outcomes (sold out, idempotency reuse, lapsed hold) are plain variants
//! produced deep in the db layer and passed through unmodified; only
//! database and internal errors are logged and masked at the boundary.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::db::RepoError;

/// API 统一错误响应结构
///
/// ```json
/// { "code": "SLOT_SOLD_OUT", "message": "No availability." }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// 应用错误枚举
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== 请求校验错误 (400) ==========
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid time.")]
    InvalidTime,

    #[error("Invalid guests.")]
    InvalidGuests,

    #[error("Date is in the past.")]
    PastDate,

    #[error("Range too large (max {0} days).")]
    RangeTooLarge(i64),

    // ========== 业务冲突错误 (409) ==========
    #[error("No availability for this date.")]
    DateClosed,

    #[error("Slot unavailable.")]
    SlotDisabled,

    #[error("No availability.")]
    SoldOut,

    #[error("Reservation hold expired.")]
    HoldExpired,

    #[error("Idempotency-Key reuse with different payload.")]
    IdempotencyConflict,

    #[error("Reservation is not pending payment.")]
    ReservationNotPending,

    // ========== 资源不存在 (404) ==========
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ========== 限流 (429) ==========
    #[error("Too many requests.")]
    RateLimited,

    // ========== 系统错误 (500) ==========
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Machine-readable error code, stable API surface for the frontend.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidTime => "INVALID_TIME",
            Self::InvalidGuests => "INVALID_GUESTS",
            Self::PastDate => "PAST_DATE",
            Self::RangeTooLarge(_) => "RANGE_TOO_LARGE",
            Self::DateClosed => "DATE_CLOSED",
            Self::SlotDisabled => "SLOT_DISABLED",
            Self::SoldOut => "SLOT_SOLD_OUT",
            Self::HoldExpired => "HOLD_EXPIRED",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::ReservationNotPending => "RESERVATION_NOT_PENDING",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidTime
            | Self::InvalidGuests
            | Self::PastDate
            | Self::RangeTooLarge(_) => StatusCode::BAD_REQUEST,
            Self::DateClosed
            | Self::SlotDisabled
            | Self::SoldOut
            | Self::HoldExpired
            | Self::IdempotencyConflict
            | Self::ReservationNotPending => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // 5xx: log the detail, never expose internals to the caller
            AppError::Database(msg) => {
                error!(target: "database", error = %msg, "Database error occurred");
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                error!(target: "internal", error = %msg, "Internal error occurred");
                "Unexpected error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorBody {
            code: self.code(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(msg) => AppError::NotFound(msg),
            RepoError::Duplicate(msg) => AppError::Internal(format!("Duplicate: {msg}")),
            RepoError::SlotDisabled => AppError::SlotDisabled,
            RepoError::SoldOut => AppError::SoldOut,
            RepoError::Capacity(msg) => AppError::Database(format!("Capacity violation: {msg}")),
            RepoError::Database(msg) => AppError::Database(msg),
        }
    }
}

/// Application-level Result type
pub type AppResult<T> = Result<T, AppError>;
