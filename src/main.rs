use std::net::SocketAddr;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cinder::api;
use cinder::config::ServerConfig;
use cinder::state::AppState;
use cinder::totals::TotalsSink;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const RATE_PURGE_INTERVAL: Duration = Duration::from_secs(300);
const RATE_BUCKET_MAX_IDLE: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cinder=debug")),
        )
        .init();

    info!("Starting cinder relay v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();

    let totals = TotalsSink::new(config.database_url.as_deref());
    if totals.is_enabled() {
        totals.ensure_schema().await;
        info!("Usage totals sink configured");
    } else {
        info!("Usage totals disabled (no DATABASE_URL)");
    }

    let state = AppState::new(totals);
    spawn_sweepers(&state);

    let app = api::build_router(state);
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Relay listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    })
    .await?;

    Ok(())
}

fn spawn_sweepers(state: &AppState) {
    // One tick for every TTL-bounded store; each store sweeps under its own
    // lock, so the critical sections stay short.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sweep_state.otm.sweep().await
                + sweep_state.files.sweep().await
                + sweep_state.invites.sweep().await
                + sweep_state.mailboxes.sweep().await;
            if removed > 0 {
                tracing::debug!(removed, "swept expired entries");
            }
        }
    });

    // Rate buckets idle past their window are dead weight in the map.
    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            limiter.purge_stale(RATE_BUCKET_MAX_IDLE).await;
        }
    });
}
