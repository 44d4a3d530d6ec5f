//! 日期工具函数 (业务时区转换)
//!
//! Service dates are plain `YYYY-MM-DD` strings; "today" is always computed
//! in the restaurant's business timezone, never the server's.

use chrono::{Datelike, NaiveDate};
use chrono_tz::Tz;

use crate::error::{AppError, AppResult};

/// 解析日期字符串 (YYYY-MM-DD)
///
/// Strict format: chrono alone would also accept unpadded components, so the
/// shape is checked first.
pub fn parse_iso_date(value: &str) -> AppResult<NaiveDate> {
    let bytes = value.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !well_formed {
        return Err(AppError::validation(format!("Invalid ISO date: {value}")));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("Invalid ISO date: {value}")))
}

/// 当前业务时区的日期
pub fn today_in_tz(tz: Tz) -> NaiveDate {
    chrono::Utc::now().with_timezone(&tz).date_naive()
}

/// Weekday as 0 (Sunday) .. 6 (Saturday), matching the CLOSED_WEEKDAYS config.
pub fn weekday_number(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday()
}

pub fn iso_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Every date from `from` to `to` inclusive; empty when `to < from`.
pub fn list_dates_inclusive(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut result = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        result.push(cursor);
        match cursor.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    result
}

/// Unix millis, RFC 3339 formatted (UTC). Used for API-facing timestamps.
pub fn millis_to_rfc3339(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
