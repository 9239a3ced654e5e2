// =============================================================================
// Tipster Verification Engine — Main Entry Point
// =============================================================================
//
// Boots the engine: config, persisted signal store, price feed, the
// verification scheduler (price-observation + weekly-report loops), and the
// REST API. Shuts down gracefully on Ctrl+C, flushing the store and config.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod ingest;
mod outcome;
mod pricefeed;
mod report;
mod runtime_config;
mod scheduler;
mod signal_store;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::pricefeed::{CoinGeckoClient, PriceFeed};
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::VerificationScheduler;
use crate::signal_store::SignalStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Tipster Verification Engine — Starting Up        ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path = RuntimeConfig::resolve_path();
    let config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, path = %config_path, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    info!(
        channels = config.channels.len(),
        price_check_interval_secs = config.price_check_interval_secs,
        paused = config.paused,
        "Configuration loaded"
    );

    // ── 2. Load the persisted signal store ───────────────────────────────
    // A missing file starts fresh; a corrupt one is fatal rather than
    // silently dropping tracked signals.
    let store = Arc::new(
        SignalStore::load(&config.store_path)
            .with_context(|| format!("loading signal store from {}", config.store_path))?,
    );
    info!(
        total = store.len(),
        pending = store.pending_count(),
        "Signal store loaded"
    );

    // ── 3. Build shared state ────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let store_path = config.store_path.clone();
    let state = Arc::new(AppState::new(config, store.clone()));

    // ── 4. Price feed ────────────────────────────────────────────────────
    let api_key = std::env::var("COINGECKO_API_KEY").ok();
    let feed: Arc<dyn PriceFeed> = Arc::new(CoinGeckoClient::new(api_key));

    // ── 5. Verification scheduler ────────────────────────────────────────
    let mut scheduler = VerificationScheduler::start(state.clone(), feed);

    // ── 6. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr_clone = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    scheduler.stop();

    if let Err(e) = store.save(&store_path) {
        error!(error = %e, "Failed to save signal store on shutdown");
    }
    if let Err(e) = state.runtime_config.read().save(&config_path) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Tipster Verification Engine shut down complete.");
    Ok(())
}
