use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tarmac_api::{app, AppState, SessionRegistry};
use tarmac_core::FlightService;
use tarmac_store::{Config, DbClient, PostgresFlightStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tarmac_api=debug,tarmac_core=info,tarmac_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Tarmac API on port {}", config.server.port);

    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    tracing::info!(
        "Transactions run at {:?} isolation",
        config.database.isolation_level
    );
    let store = PostgresFlightStore::new(db.pool.clone(), config.database.isolation_level);
    if config.server.enable_admin {
        tracing::warn!("Admin endpoints are enabled");
    }
    let state = AppState::new(FlightService::new(Arc::new(store)))
        .with_sessions(SessionRegistry::new(Duration::from_secs(config.server.session_idle_secs)))
        .with_admin(config.server.enable_admin);
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    db.pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
