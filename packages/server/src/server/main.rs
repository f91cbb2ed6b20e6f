// Main entry point for the admin API server

use std::sync::Arc;

use admin_core::kernel::scraper::{HnApiEngine, PostgresRunStore, RunStore, ScrapeManager};
use admin_core::server::build_app;
use admin_core::{server::auth, Config};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,admin_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting HN Aggregator admin API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Bootstrap admin account when configured
    if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
        auth::ensure_admin(&pool, username, password)
            .await
            .context("Failed to bootstrap admin user")?;
    }

    // One scrape manager per process, constructed here and shared by clone
    let run_store: Arc<dyn RunStore> = Arc::new(PostgresRunStore::new(pool.clone()));
    let engine = Arc::new(
        HnApiEngine::new(pool.clone(), config.hn_api_base.clone())
            .context("Failed to create scrape engine")?,
    );
    let manager = ScrapeManager::new(run_store.clone(), engine);

    let app = build_app(pool, manager, run_store);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
