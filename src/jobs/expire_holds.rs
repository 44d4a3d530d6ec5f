//! Hold Expiry Sweeper
//!
//! Reclaims capacity from PENDING_PAYMENT reservations whose payment hold
//! lapsed. Each candidate is processed in its own transaction so one failure
//! does not block the batch; a row that fails stays selectable and retries
//! on the next cycle. The conditional transition inside
//! [`reservations::expire_lapsed`] guards the race against a concurrent
//! payment success.

use sqlx::SqlitePool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::{RepoResult, idempotency, reservations};
use crate::util;

/// 单轮扫描上限
const SWEEP_BATCH_SIZE: i64 = 200;

/// One sweep's outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub expired: usize,
}

/// Run a single sweep over lapsed holds. Safe to call repeatedly: a row that
/// already transitioned is skipped by the conditional update, so re-running
/// never double-releases capacity.
pub async fn expire_holds_once(pool: &SqlitePool, now: i64) -> RepoResult<SweepStats> {
    let candidates = reservations::find_expiry_candidates(pool, now, SWEEP_BATCH_SIZE).await?;

    let mut stats = SweepStats {
        scanned: candidates.len(),
        expired: 0,
    };

    for candidate in candidates {
        match reservations::expire_lapsed(pool, candidate.id, candidate.slot_id, candidate.guests, now)
            .await
        {
            Ok(true) => stats.expired += 1,
            // Lost the race (payment landed between select and update)
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    reservation_id = candidate.id,
                    error = %e,
                    "Failed to expire hold, will retry next sweep"
                );
            }
        }
    }

    Ok(stats)
}

/// 主循环: 固定间隔扫描, shutdown 信号触发时退出
pub async fn run(pool: SqlitePool, interval: Duration, shutdown: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Hold expiry sweeper started");

    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; that startup sweep also catches holds
    // that lapsed while the process was down.
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let now = util::now_millis();

                match expire_holds_once(&pool, now).await {
                    Ok(stats) if stats.expired > 0 => {
                        tracing::info!(scanned = stats.scanned, expired = stats.expired, "Holds expired");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Hold expiry sweep failed");
                    }
                }

                // Second phase: drop idempotency records past retention.
                match idempotency::purge_expired(&pool, now).await {
                    Ok(0) => {}
                    Ok(purged) => {
                        tracing::info!(purged = purged, "Purged expired idempotency records");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Idempotency purge failed");
                    }
                }
            }
        }
    }

    tracing::info!("Hold expiry sweeper stopped");
}
