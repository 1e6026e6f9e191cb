//! site-server: pricing, checkout and page usage backend for hosted sites
//!
//! Long-running service that:
//! - Prices baskets and runs checkout against the configured payment gateways
//! - Resolves gateway callbacks into committed, failed or reconciled orders
//! - Keeps the page ↔ entity usage graph of every site

use std::net::SocketAddr;
use std::time::Duration;

use site_server::orders::spawn_abandonment_sweep;
use site_server::{AppState, Config, api, logger};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    logger::init_logger_with_file(&config.log_level, config.log_json, config.log_dir.as_deref())?;

    tracing::info!(
        "Starting site-server {} (env: {})",
        env!("CARGO_PKG_VERSION"),
        config.environment
    );

    let http_port = config.http_port;
    let state = AppState::new(config).await.inspect_err(|e| {
        tracing::error!("Startup failed: {e}");
    })?;

    let sweep = spawn_abandonment_sweep(state.orders.clone(), SWEEP_INTERVAL);
    let app = api::create_router(state);

    let http_addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!("site-server HTTP listening on {http_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweep.abort();
    tracing::info!("site-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
