//! ==============================================================================
//! main.rs - rackwatch host entry point
//! ==============================================================================
//!
//! purpose:
//!     runs one dashboard view for the configured identity and serves its
//!     reconciled state as json for the rendering layer.
//!
//! responsibilities:
//!     - load configuration and start logging
//!     - select the acting identity (clears the previous managed-set cache)
//!     - open the dashboard view (snapshot, push feed, watchdog, write-back)
//!     - serve the json api in the background
//!     - report view status changes until ctrl-c, then close the view
//!
//! relationships:
//!     - uses: reconciler.rs (view lifecycle), api.rs (web server)
//!     - uses: remote.rs (HttpBackend), cache.rs (FileCache)
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────┐
//!     │                   rackwatch (this file)                  │
//!     │  ┌───────────────┐  ┌──────────────┐  ┌──────────────┐   │
//!     │  │ status report │  │ json api     │  │ ctrl-c       │   │
//!     │  │ (watch)       │  │ (port 3000)  │  │ teardown     │   │
//!     │  └───────┬───────┘  └──────┬───────┘  └──────┬───────┘   │
//!     │          └─────────────────┼─────────────────┘           │
//!     │                      ┌─────┴─────┐                       │
//!     │                      │ ViewHandle│ <- reconciler.rs      │
//!     │                      └─────┬─────┘                       │
//!     └────────────────────────────┼─────────────────────────────┘
//!                   ┌──────────────┼──────────────┐
//!                   ▼              ▼              ▼
//!             GET /data     GET /subscribe   /containers_managed
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use rackwatch::api::{self, ApiState};
use rackwatch::conditions::CalibrationEstimator;
use rackwatch::config::MonitorConfig;
use rackwatch::{ActorContext, FileCache, HttpBackend, Reconciler, ReconcilerSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  rackwatch - container & rack telemetry");
    println!("===========================================================");

    // step 1: load configuration
    let config = MonitorConfig::load_or_default();
    config.print_summary();

    // step 2: logging (RUST_LOG wins over the config file)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 3: acting identity
    let actor = config
        .actor
        .identity()
        .context("no [actor] email configured in rackwatch.toml")?;
    let cache = Arc::new(FileCache::new(&config.cache.path));
    let actors = ActorContext::new();
    actors.select(actor.clone(), &*cache);

    // step 4: open the dashboard
    let backend = HttpBackend::new(&config.remote.base_url, config.remote.request_timeout())
        .context("failed to build http client")?
        .with_feed_transport(config.remote.feed_transport);
    let reconciler = Reconciler::new(
        Arc::new(backend),
        cache,
        actors,
        ReconcilerSettings::from(&config),
    );
    let view = Arc::new(reconciler.open_dashboard()?);
    println!("[STARTUP] ✓ Dashboard open for {}", actor.email);

    // step 5: json api in background
    let state = ApiState {
        view: view.clone(),
        actor,
        actions: reconciler.actions().clone(),
        estimator: Arc::new(CalibrationEstimator::stock()),
    };
    let bind = config.server.bind.clone();
    let server = tokio::spawn(async move {
        println!("[STARTUP] ✓ API live at http://{}/api", bind);
        if let Err(e) = api::serve(&bind, state).await {
            eprintln!("[ERROR] Web server error: {:#}", e);
        }
    });

    // step 6: report status changes until ctrl-c
    let mut status = view.watch_status();
    println!("────────────────────────────────────────────────────────────");
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let s = status.borrow_and_update().clone();
                println!(
                    "[RUNTIME] {:?} | {:?}{}",
                    s.phase,
                    s.connection,
                    if s.no_new_data { " | no new data" } else { "" }
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n[SHUTDOWN] closing dashboard view");
                break;
            }
        }
    }

    view.close();
    server.abort();
    Ok(())
}
