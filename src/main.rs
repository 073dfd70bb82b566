use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use komunalka_api::config::Config;
use komunalka_api::db::Database;
use komunalka_api::db_storage::PeriodDataStorage;
use komunalka_api::handlers::AppState;
use komunalka_api::server::{build_app, serve, shutdown_signal};

/// Main entry point for the application.
///
/// Initializes tracing, loads configuration, opens the connection pool and
/// bootstraps the schema. Any failure up to that point aborts startup, so the
/// server never listens against an unknown schema. On Ctrl+C or SIGTERM the
/// server drains in-flight requests and the pool is closed before exit.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "komunalka_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let db = match Database::new(&config).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to ensure schema: {:#}", e);
            return Err(e);
        }
    };
    tracing::info!("Database connection pool established");

    let app_state = Arc::new(AppState {
        storage: PeriodDataStorage::new(db.pool.clone(), &config.db_schema)?,
    });

    let app = build_app(app_state, &config)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    serve(listener, app, &db, shutdown_signal()).await
}
