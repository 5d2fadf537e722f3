use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod events;
pub mod monitor;
pub mod repository;
pub mod service;
pub mod state;

use crate::config::Config;
use crate::monitor::dispatch::Dispatcher;
use crate::monitor::health::HealthMonitor;
use crate::monitor::sweep::TimeoutSweeper;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tms_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TMS Orchestrator...");

    // Load configuration from environment
    let config = Config::from_env();
    config.validate().expect("Invalid configuration");

    if config.webhook_token.is_none() {
        tracing::warn!(
            "TMS_WEBHOOK_TOKEN is not set, webhook endpoints accept unauthenticated callbacks"
        );
    }

    tracing::info!("Connecting to database...");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    tracing::info!("Database connection pool created");

    // Run migrations
    db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool, config);

    // Spawn background tasks with a shared shutdown signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(HealthMonitor::new(state.clone(), shutdown_rx.clone()).run());
    tokio::spawn(Dispatcher::new(state.clone(), shutdown_rx.clone()).run());
    tokio::spawn(TimeoutSweeper::new(state.clone(), shutdown_rx).run());

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    // Stop background tasks
    let _ = shutdown_tx.send(true);
    tracing::info!("TMS Orchestrator stopped");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
}
