mod api;
mod config;
mod country_refresh;
mod db;
mod error;
mod fetcher;
mod reconcile;
mod summary;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::RefreshHealth;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::country_refresh::{RefreshOrchestrator, RefreshScheduler};
use crate::error::Result;
use crate::fetcher::HttpFetcher;
use crate::reconcile::RandomMultiplier;
use crate::summary::PngRenderer;

#[tokio::main]
async fn main() {
    // A missing .env is normal; real environment variables still apply.
    let _ = dotenvy::dotenv();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    let status = db::queries::status(&pool).await?;
    info!(
        countries = status.total_countries,
        last_refreshed_at = ?status.last_refreshed_at,
        "Database ready at {}",
        cfg.db_path,
    );

    // --- Refresh pipeline ---
    let health = Arc::new(RefreshHealth::new());
    let orchestrator = Arc::new(RefreshOrchestrator::new(
        pool.clone(),
        Arc::new(HttpFetcher::new(&cfg)?),
        Arc::new(RandomMultiplier),
        Arc::new(PngRenderer::new()),
        PathBuf::from(&cfg.summary_image_path),
        Arc::clone(&health),
    ));
    info!(
        countries_url = %cfg.countries_api_url,
        exchange_url = %cfg.exchange_api_url,
        timeout_secs = cfg.fetch_timeout_secs,
        "Sources configured",
    );

    if !cfg.refresh_on_startup && status.total_countries == 0 {
        warn!("Store is empty and REFRESH_ON_STARTUP=false; POST /countries/refresh to populate");
    }

    // Scheduled refresh (background; startup refresh runs here too)
    let scheduler = RefreshScheduler::new(
        Arc::clone(&orchestrator),
        cfg.refresh_interval_secs,
        cfg.refresh_on_startup,
    );
    tokio::spawn(async move { scheduler.run().await });

    // HTTP API server
    let api_state = ApiState {
        pool: pool.clone(),
        orchestrator,
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
