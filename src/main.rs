//! ==============================================================================
//! main.rs - hydro monitor host entry point
//! ==============================================================================
//!
//! purpose:
//! ```text
//!     pulls telemetry published by the hydroponic node to antares, decodes
//!     the packed sensor payload and serves the history to the dashboard.
//! ```
//!
//! responsibilities:
//! ```text
//!     - load configuration and set up logging
//!     - open the reading store (memory or sqlite), optionally seeding it
//!     - serve the json api
//!     - when enabled, backfill history and sync on a fixed interval
//! ```
//!
//! relationships:
//! ```text
//!     - uses: config.rs, telemetry.rs (startup)
//!     - uses: store/ (persistence), simulator.rs (demo seed)
//!     - uses: antares.rs + sync.rs (fetch, decode, store)
//!     - uses: server.rs (http api)
//! ```
//!
//! architecture:
//!
//! ```text
//!     ┌──────────────┐   http    ┌──────────────────────────────────────┐
//!     │   antares    │ <──────── │             rust host                │
//!     │  (oneM2M)    │           │  ┌────────────┐     ┌─────────────┐  │
//!     └──────────────┘           │  │ sync loop  │     │ web server  │  │
//!                                │  │ (interval) │     │ (port 5000) │  │
//!                                │  └─────┬──────┘     └──────┬──────┘  │
//!                                │        │ decoder.rs        │         │
//!                                │        └────────┬──────────┘         │
//!                                │            ┌────┴────┐               │
//!                                │            │  store  │               │
//!                                │            └─────────┘               │
//!                                └──────────────────────────────────────┘
//! ```
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use hydro_monitor::antares::AntaresClient;
use hydro_monitor::config::HostConfig;
use hydro_monitor::server::{self, AppState};
use hydro_monitor::sync::SyncService;
use hydro_monitor::{simulator, store, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Hydro Monitor - Antares Telemetry Host");
    println!("===========================================================");

    // step 1: load configuration and logging
    let (config, report) = HostConfig::load_or_default();
    telemetry::init(&config.logging.level)?;
    report.log();
    config.log_summary();

    // step 2: open storage
    let store = store::open(&config.storage)?;
    if config.storage.seed_demo_data {
        simulator::seed_if_empty(store.as_ref()).await?;
    }

    // step 3: antares client and sync orchestrator
    let client = AntaresClient::new(config.antares.clone())?;
    let sync = SyncService::new(Arc::new(client), store.clone(), config.logging.show_sensor_data);

    // step 4: web server
    let state = AppState {
        store,
        sync: sync.clone(),
        cron_secret: config.sync.cron_secret.clone(),
    };
    let server = server::run_server(&config.server.bind, state);

    if !config.sync.enabled {
        info!("periodic sync disabled, use POST /api/sync-antares or the cron route");
        return server.await;
    }

    // step 5: backfill once, then sync on an interval alongside the server
    let period = Duration::from_secs(config.sync.interval_seconds.max(1));
    let history_limit = config.sync.history_limit;
    let sync_loop = async move {
        if let Err(e) = sync.backfill(history_limit).await {
            warn!(error = %e, "history backfill failed, continuing with periodic sync");
        }
        sync.run_periodic(period).await;
    };

    tokio::select! {
        result = server => result,
        _ = sync_loop => Ok(()),
    }
}
