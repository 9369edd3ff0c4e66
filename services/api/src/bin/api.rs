//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, PgRoster},
    config::Config,
    error::ApiError,
    web::{create_router, AppState},
};
use clicker_core::{EnginePorts, SystemClock};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_ATTEMPTS: u32 = 5;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = connect_with_retry(&config.database_url).await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Wire the Engine Ports ---
    let ports = EnginePorts {
        sessions: db_adapter.clone(),
        enrollment: Arc::new(PgRoster::new(db_pool)),
        progress: db_adapter.clone(),
        achievements: db_adapter,
        clock: Arc::new(SystemClock),
    };
    let app_state = Arc::new(AppState::new(ports, config.clone()));
    if config.admin_token.is_none() {
        warn!("ADMIN_TOKEN is not set; the admin API is disabled");
    }

    // --- 4. Create the Web Router ---
    let app = create_router(app_state);

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// The database may still be starting when the service boots.
async fn connect_with_retry(database_url: &str) -> Result<sqlx::PgPool, ApiError> {
    let mut attempt = 1;
    loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt < DB_CONNECT_ATTEMPTS => {
                warn!(attempt, "Database not reachable yet, retrying: {}", e);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
