//! Order Book Sync - Entry Point
//!
//! Keeps a live depth view for every configured instrument and serves
//! health/metrics. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate (path from argv[1] or `ORDERBOOK_SYNC_CONFIG`)
//! 2. Init tracing (JSON structured logging)
//! 3. Create Prometheus registry (implements the telemetry port)
//! 4. Build push/pull feed adapters per instrument class from venue profiles
//! 5. Mount one subscription per instrument through the SubscriptionManager
//! 6. Spawn top-of-book and status loggers
//! 7. Spawn health server (/live, /ready, /status, /metrics)
//! 8. Wait for SIGINT → destroy every subscription → exit
//!
//! Order submission (`RestOrderExecutor` + `submit_and_refresh`) is a
//! library API for the embedding trading view; the daemon only syncs.

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use orderbook_sync::adapters::api::{RestClient, RestClientConfig};
use orderbook_sync::adapters::feeds::{PullFeed, PushFeed, VenueProfile};
use orderbook_sync::adapters::metrics::{HealthServer, HealthState, SyncMetrics};
use orderbook_sync::config::{self, AppConfig, StaticCatalog};
use orderbook_sync::ports::instruments::{InstrumentCatalog, InstrumentClass, InstrumentSpec};
use orderbook_sync::ports::telemetry::SyncTelemetry;
use orderbook_sync::usecases::book_store::BookReader;
use orderbook_sync::usecases::subscription::{FeedPair, SubscriptionManager, SyncSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ORDERBOOK_SYNC_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".to_string());
    let config = config::loader::load_config(&path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.app.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.app.name,
        version = env!("CARGO_PKG_VERSION"),
        instruments = config.instruments.len(),
        "Starting order book sync"
    );

    // ── 3. Shutdown channel + metrics ───────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let metrics = Arc::new(SyncMetrics::new().context("Failed to register metrics")?);

    // ── 4. Feed adapters per instrument class ───────────────
    let pull_client = Arc::new(
        RestClient::new(RestClientConfig {
            timeout: Duration::from_millis(config.api.timeout_ms),
            max_retries: 0,
            ..RestClientConfig::default()
        })
        .context("Failed to create pull client")?,
    );

    let catalog = Arc::new(StaticCatalog::new(config.instruments.clone()));
    let settings = SyncSettings {
        supervisor: config.supervisor.clone(),
        throttle: config.throttle.min_interval(),
    };
    let telemetry: Arc<dyn SyncTelemetry> = Arc::clone(&metrics) as Arc<dyn SyncTelemetry>;
    let mut manager = SubscriptionManager::new(
        Arc::clone(&catalog) as Arc<dyn InstrumentCatalog>,
        settings,
        telemetry,
    );
    for class in [InstrumentClass::Spot, InstrumentClass::Futures] {
        manager = manager.with_feeds(class, feed_pair(&config, class, &pull_client));
    }

    // ── 5. One subscription per instrument ──────────────────
    let mut loggers = Vec::new();
    for spec in catalog.instruments() {
        let view = format!("view:{}", spec.id);
        match manager.mount(&view, &spec.id).await {
            Ok(subscription) => {
                loggers.push(tokio::spawn(log_book(
                    spec.clone(),
                    subscription.book(),
                    shutdown_tx.subscribe(),
                )));
                loggers.push(tokio::spawn(log_status(subscription.status(), shutdown_tx.subscribe())));
            }
            Err(e) => error!(instrument = %spec.id, error = %e, "Failed to mount subscription"),
        }
    }

    // ── 6. Health / status / metrics server ─────────────────
    let health_handle = if config.metrics.enabled {
        let state = HealthState::new(Arc::new(manager.board()), Arc::clone(&metrics));
        let server = HealthServer::new(state, config.metrics.bind_address.clone());
        let shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }))
    } else {
        None
    };

    info!("All subscriptions mounted, syncing");

    // ── 7. Wait for SIGINT ──────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for SIGINT, shutting down");
    }
    info!("SIGINT received, initiating graceful shutdown");

    // ── Graceful shutdown ──
    let reports = manager.shutdown().await;
    let leaked = reports
        .iter()
        .filter(|r| r.pending_timers > 0 || r.open_sessions > 0)
        .count();
    if leaked > 0 {
        warn!(leaked, "Some subscriptions left resources behind");
    }

    let _ = shutdown_tx.send(());
    for handle in loggers {
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
    if let Some(handle) = health_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Build the push/pull adapters for one instrument class.
fn feed_pair(config: &AppConfig, class: InstrumentClass, pull_client: &Arc<RestClient>) -> FeedPair {
    let profile = Arc::new(VenueProfile::from_config(
        class.to_string(),
        config.venues.for_class(class),
    ));
    FeedPair {
        push: Arc::new(PushFeed::new(Arc::clone(&profile))),
        pull: Arc::new(PullFeed::new(profile, Arc::clone(pull_client))),
    }
}

/// Log top-of-book whenever the book store changes.
async fn log_book(
    spec: InstrumentSpec,
    mut book: BookReader,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            view = book.changed() => {
                let Some(view) = view else { return };
                let Some(snapshot) = view.snapshot else { continue };
                let (price_dp, size_dp) = (spec.price_precision, spec.size_precision);
                info!(
                    instrument = %spec.id,
                    best_bid = ?snapshot.best_bid().map(|l| l.display_price(price_dp)),
                    bid_size = ?snapshot.best_bid().map(|l| l.display_size(size_dp)),
                    best_ask = ?snapshot.best_ask().map(|l| l.display_price(price_dp)),
                    ask_size = ?snapshot.best_ask().map(|l| l.display_size(size_dp)),
                    spread = ?snapshot.spread(),
                    sequence = snapshot.sequence_id,
                    limited = view.limited,
                    "Book updated"
                );
            }
        }
    }
}

/// Log every subscription status change.
async fn log_status(
    mut status: tokio::sync::watch::Receiver<orderbook_sync::domain::SubscriptionStatus>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
                let current = status.borrow_and_update().clone();
                info!(
                    instrument = %current.instrument_id,
                    state = %current.state,
                    health = ?current.health(),
                    attempt = current.attempt,
                    connection_error = current.connection_error,
                    "Subscription status"
                );
            }
        }
    }
}
