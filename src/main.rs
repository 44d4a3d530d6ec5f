//! akai-booking, the omakase reservation & deposit backend
//!
//! Long-running service that:
//! - Serves availability, checkout initiation and confirmation polling
//! - Reconciles Stripe payment events into reservation state
//! - Sweeps lapsed capacity holds on a fixed interval

use std::time::Duration;

use akai_booking::{AppState, BackgroundTasks, Config, TaskKind, api, jobs};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "akai_booking=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting akai-booking (env: {})", config.environment);

    let sweep_interval = Duration::from_secs(config.sweep_interval_seconds);

    // Initialize application state (opens the database, runs migrations)
    let state = AppState::new(config).await?;

    // Background tasks: expiry sweeper + rate limiter cleanup
    let mut tasks = BackgroundTasks::new();
    let shutdown = tasks.shutdown_token();

    tasks.spawn(
        "hold_expiry_sweeper",
        TaskKind::Periodic,
        jobs::expire_holds::run(state.pool.clone(), sweep_interval, shutdown.clone()),
    );

    let rate_limiter = state.rate_limiter.clone();
    let cleanup_shutdown = shutdown.clone();
    tasks.spawn("rate_limiter_cleanup", TaskKind::Worker, async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = cleanup_shutdown.cancelled() => break,
                _ = interval.tick() => rate_limiter.cleanup().await,
            }
        }
    });

    // HTTP server
    let addr = format!("{}:{}", state.config.host, state.config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("akai-booking HTTP listening on {addr}");

    let app = api::create_router(state);
    let signal_token = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
            }
            _ = signal_token.cancelled() => {}
        }
    })
    .await?;

    // Stop the sweeper and wait for in-flight work
    tasks.shutdown().await;

    Ok(())
}
