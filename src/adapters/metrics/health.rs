//! Health Check Server - Liveness, Readiness and Status
//!
//! Exposes via axum 0.7:
//! - `/live`: process is up
//! - `/ready`: no subscription is `Failed` (Degraded still serves data)
//! - `/status`: JSON status of every subscription
//! - `/metrics`: Prometheus text exposition

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use super::prometheus::SyncMetrics;
use crate::domain::connection::{ConnectionState, FeedHealth, SubscriptionStatus};
use crate::ports::telemetry::StatusSource;

/// State shared by every handler.
#[derive(Clone)]
pub struct HealthState {
    statuses: Arc<dyn StatusSource>,
    metrics: Arc<SyncMetrics>,
}

impl HealthState {
    pub fn new(statuses: Arc<dyn StatusSource>, metrics: Arc<SyncMetrics>) -> Self {
        Self { statuses, metrics }
    }

    /// Ready unless a subscription has no data path at all.
    pub fn is_ready(&self) -> bool {
        self.statuses
            .statuses()
            .iter()
            .all(|s| s.state != ConnectionState::Failed)
    }
}

#[derive(Debug, serde::Serialize)]
struct StatusEntry {
    #[serde(flatten)]
    status: SubscriptionStatus,
    health: FeedHealth,
    retry_in_ms: Option<u64>,
}

/// Axum-based health and status HTTP server.
pub struct HealthServer {
    state: HealthState,
    bind_address: String,
}

impl HealthServer {
    pub fn new(state: HealthState, bind_address: impl Into<String>) -> Self {
        Self {
            state,
            bind_address: bind_address.into(),
        }
    }

    /// Routes, without binding. Used by `run` and by tests.
    pub fn router(state: HealthState) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/status", get(Self::status))
            .route("/metrics", get(Self::metrics))
            .with_state(state)
    }

    /// Serve until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx), fields(address = %self.bind_address))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Self::router(self.state);
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!("Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn status(State(state): State<HealthState>) -> impl IntoResponse {
        let entries: Vec<StatusEntry> = state
            .statuses
            .statuses()
            .into_iter()
            .map(|status| StatusEntry {
                health: status.health(),
                retry_in_ms: status
                    .retry_in
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                status,
            })
            .collect();
        Json(entries)
    }

    async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
        match state.metrics.render() {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, String::new())
            }
        }
    }
}
