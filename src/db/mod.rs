//! Database Module
//!
//! SQLite connection pool, migrations and repository error types.
//! Repositories are free functions over `&SqlitePool` (or a
//! `&mut SqliteConnection` where several statements must share one
//! transaction). No in-process caches: the pool is the single source of
//! truth for slot and reservation state.

pub mod idempotency;
pub mod payment_events;
pub mod reservations;
pub mod slots;
pub mod waitlist;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// The slot exists but bookings are disabled for it
    #[error("Slot disabled")]
    SlotDisabled,

    /// Remaining capacity is smaller than the requested party
    #[error("Sold out")]
    SoldOut,

    /// A release/convert would have underflowed a counter
    #[error("Capacity violation: {0}")]
    Capacity(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        RepoError::Database(err.to_string())
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// 判断是否唯一约束冲突 (用于 reference code 重试和幂等插入)
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Open the SQLite pool (WAL mode) and apply embedded migrations.
pub async fn connect(db_path: &str) -> RepoResult<SqlitePool> {
    if let Some(parent) = std::path::Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| RepoError::Database(format!("Failed to create database dir: {e}")))?;
    }

    // Build connection options: WAL, foreign keys, normal sync.
    // busy_timeout is a per-connection pragma: 写冲突时等待 5s 而非立即失败
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
        .map_err(|e| RepoError::Database(format!("Invalid database path: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .pragma("foreign_keys", "ON")
        .pragma("busy_timeout", "5000");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| RepoError::Database(format!("Failed to open database: {e}")))?;

    tracing::info!("Database connection established (SQLite WAL, busy_timeout=5000ms)");

    run_migrations(&pool).await?;

    Ok(pool)
}

/// In-memory database on a single connection, used by tests.
pub async fn connect_in_memory() -> RepoResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| RepoError::Database(e.to_string()))?
        .pragma("foreign_keys", "ON");

    // Each sqlite::memory: connection is its own database, so the pool must
    // hold exactly one connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| RepoError::Database(format!("Failed to open in-memory database: {e}")))?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> RepoResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| RepoError::Database(format!("Failed to apply migrations: {e}")))?;
    tracing::debug!("Database migrations applied");
    Ok(())
}
