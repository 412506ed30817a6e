use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blog_aggregator::config::Config;
use blog_aggregator::db::Database;
use blog_aggregator::fetcher::HttpFetcher;
use blog_aggregator::poller::Poller;
use blog_aggregator::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blog_aggregator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = Config::load_or_default("aggregator.toml")?;
    config.apply_env_overrides()?;
    config.validate()?;
    info!(
        "Polling every {}s, {} feeds per cycle",
        config.poller.interval_secs, config.poller.batch_size
    );

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Start background poller
    let fetcher = Arc::new(HttpFetcher::from_config(&config.poller)?);
    let poller = Poller::from_config(db.clone(), fetcher, &config.poller);
    tokio::spawn(async move {
        poller.run_forever().await;
    });

    // Build router
    let state = Arc::new(AppState { db: db.clone() });
    let app = routes::router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server starting on http://localhost:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
