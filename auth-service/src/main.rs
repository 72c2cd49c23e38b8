use auth_service::config::AuthConfig;
use auth_service::startup::{health_router, shutdown_signal};
use service_core::bus::{MessageBus, NatsBus};
use service_core::observability::init_tracing;
use service_core::outbox::{OutboxRelay, PgOutboxStore};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = AuthConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::io::Error::other(format!("Configuration error: {e}"))
    })?;
    init_tracing("auth-service", &config.log_level);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to Postgres");
            std::io::Error::other(format!("Database connection error: {e}"))
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to run migrations");
        std::io::Error::other(format!("Migration error: {e}"))
    })?;

    let bus = Arc::new(NatsBus::connect(&config.nats.url).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to NATS");
        std::io::Error::other(format!("Bus connection error: {e}"))
    })?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = OutboxRelay::new(
        Arc::new(PgOutboxStore::new(pool.clone())),
        bus.clone(),
        config.relay_config(),
    );
    let relay_handle = tokio::spawn(async move { relay.run(shutdown_rx).await });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to bind health listener to {}", addr);
        e
    })?;
    tracing::info!(port = config.port, "Auth service listening");

    if let Err(e) = axum::serve(listener, health_router(pool))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Health server error");
    }

    // Stop the relay after the current tick, then flush the bus.
    let _ = shutdown_tx.send(true);
    if let Err(e) = relay_handle.await {
        tracing::error!(error = %e, "Outbox relay task panicked");
    }
    if let Err(e) = bus.close().await {
        tracing::error!(error = %e, "Failed to flush bus on shutdown");
    }

    tracing::info!("Auth service stopped");
    Ok(())
}
