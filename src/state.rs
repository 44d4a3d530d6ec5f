//! Application state

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::rate_limit::RateLimiter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared application state
///
/// Holds the connection pool and immutable configuration. Cloning is cheap;
/// no slot or reservation state is ever cached here, the pool is the single
/// source of truth.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection pool
    pub pool: SqlitePool,
    /// 服务配置 (不可变)
    pub config: Arc<Config>,
    /// Rate limiter for public routes
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Create a new AppState: open the database and apply migrations.
    pub async fn new(config: Config) -> Result<Self, BoxError> {
        let pool = db::connect(&config.database_path).await?;
        Ok(Self::with_pool(config, pool))
    }

    /// Assemble state around an existing pool (tests use an in-memory pool).
    pub fn with_pool(config: Config, pool: SqlitePool) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            rate_limiter: RateLimiter::new(),
        }
    }
}
