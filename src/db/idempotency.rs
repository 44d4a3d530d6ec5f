//! Idempotency Guard
//!
//! At-most-once request dedup keyed by a caller-supplied (key, scope) pair.
//! A record is immutable once observed: replaying the same key with a
//! different payload hash is a conflict the handler surfaces as 409, never a
//! silent overwrite. Records expire after [`RETENTION_MILLIS`] and are
//! purged by the sweeper.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::RepoResult;
use crate::util;

pub const STATUS_IN_PROGRESS: &str = "IN_PROGRESS";
pub const STATUS_COMPLETED: &str = "COMPLETED";

/// 保留窗口: 24 小时
pub const RETENTION_MILLIS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub id: i64,
    pub key: String,
    pub scope: String,
    pub request_hash: String,
    pub status: String,
    pub response_body: Option<String>,
    pub reservation_id: Option<i64>,
    pub expires_at: i64,
    pub created_at: i64,
}

impl IdempotencyRecord {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

const RECORD_SELECT: &str = "SELECT id, key, scope, request_hash, status, response_body, reservation_id, expires_at, created_at FROM idempotency_key";

/// Insert a fresh IN_PROGRESS record, or load the existing one on a
/// uniqueness conflict. The caller compares `request_hash` and decides
/// whether to conflict, replay, or resume.
pub async fn begin(
    pool: &SqlitePool,
    key: &str,
    scope: &str,
    request_hash: &str,
) -> RepoResult<IdempotencyRecord> {
    let now = util::now_millis();
    sqlx::query(
        "INSERT INTO idempotency_key (id, key, scope, request_hash, status, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (key, scope) DO NOTHING",
    )
    .bind(util::snowflake_id())
    .bind(key)
    .bind(scope)
    .bind(request_hash)
    .bind(STATUS_IN_PROGRESS)
    .bind(now + RETENTION_MILLIS)
    .bind(now)
    .execute(pool)
    .await?;

    let sql = format!("{RECORD_SELECT} WHERE key = ? AND scope = ?");
    let record = sqlx::query_as::<_, IdempotencyRecord>(&sql)
        .bind(key)
        .bind(scope)
        .fetch_one(pool)
        .await?;
    Ok(record)
}

/// Mark COMPLETED and cache the response body for future replay.
pub async fn complete(
    pool: &SqlitePool,
    record_id: i64,
    response_body: &serde_json::Value,
) -> RepoResult<()> {
    sqlx::query("UPDATE idempotency_key SET status = ?1, response_body = ?2 WHERE id = ?3")
        .bind(STATUS_COMPLETED)
        .bind(response_body.to_string())
        .bind(record_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete records past their retention window. Returns the purge count.
pub async fn purge_expired(pool: &SqlitePool, now: i64) -> RepoResult<u64> {
    let result = sqlx::query("DELETE FROM idempotency_key WHERE expires_at < ?1")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
