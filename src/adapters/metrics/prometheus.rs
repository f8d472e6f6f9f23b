//! Prometheus Metrics Registry - Sync Observability
//!
//! Implements the `SyncTelemetry` port. Covers connection state,
//! reconnects, fallbacks, throttling and payload quality, all labelled
//! by instrument.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::domain::connection::ConnectionState;
use crate::ports::telemetry::SyncTelemetry;

/// Centralized Prometheus metrics for book synchronization.
///
/// All metrics follow the naming convention `orderbook_sync_*`.
pub struct SyncMetrics {
    /// Prometheus registry.
    registry: Registry,
    /// Current connection state code (see `ConnectionState::code`).
    pub connection_state: IntGaugeVec,
    /// State transitions by target state.
    pub transitions: IntCounterVec,
    /// Push sessions lost, by reason.
    pub push_losses: IntCounterVec,
    /// Pull fallbacks engaged.
    pub fallbacks: IntCounterVec,
    /// Snapshots written to the book store.
    pub snapshots_published: IntCounterVec,
    /// Snapshots superseded inside the throttle window.
    pub snapshots_coalesced: IntCounterVec,
    /// Malformed price levels skipped.
    pub levels_dropped: IntCounterVec,
    /// Messages from closed sessions or inactive transports.
    pub messages_discarded: IntCounterVec,
    /// Failed pull fetches.
    pub pull_failures: IntCounterVec,
}

impl SyncMetrics {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let connection_state = IntGaugeVec::new(
            Opts::new(
                "orderbook_sync_connection_state",
                "Connection state (0=idle 1=connecting 2=live 3=reconnecting 4=degraded 5=failed)",
            ),
            &["instrument"],
        )?;

        let transitions = IntCounterVec::new(
            Opts::new("orderbook_sync_transitions_total", "Connection state transitions"),
            &["instrument", "state"],
        )?;

        let push_losses = IntCounterVec::new(
            Opts::new("orderbook_sync_push_losses_total", "Push sessions lost"),
            &["instrument", "reason"],
        )?;

        let fallbacks = IntCounterVec::new(
            Opts::new("orderbook_sync_fallbacks_total", "Pull fallbacks engaged"),
            &["instrument"],
        )?;

        let snapshots_published = IntCounterVec::new(
            Opts::new(
                "orderbook_sync_snapshots_published_total",
                "Snapshots written to the book store",
            ),
            &["instrument"],
        )?;

        let snapshots_coalesced = IntCounterVec::new(
            Opts::new(
                "orderbook_sync_snapshots_coalesced_total",
                "Snapshots superseded before emission",
            ),
            &["instrument"],
        )?;

        let levels_dropped = IntCounterVec::new(
            Opts::new("orderbook_sync_levels_dropped_total", "Malformed price levels dropped"),
            &["instrument"],
        )?;

        let messages_discarded = IntCounterVec::new(
            Opts::new(
                "orderbook_sync_messages_discarded_total",
                "Messages from closed sessions or inactive transports",
            ),
            &["instrument"],
        )?;

        let pull_failures = IntCounterVec::new(
            Opts::new("orderbook_sync_pull_failures_total", "Failed pull fetches"),
            &["instrument"],
        )?;

        // Register all metrics
        registry.register(Box::new(connection_state.clone()))?;
        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(push_losses.clone()))?;
        registry.register(Box::new(fallbacks.clone()))?;
        registry.register(Box::new(snapshots_published.clone()))?;
        registry.register(Box::new(snapshots_coalesced.clone()))?;
        registry.register(Box::new(levels_dropped.clone()))?;
        registry.register(Box::new(messages_discarded.clone()))?;
        registry.register(Box::new(pull_failures.clone()))?;

        Ok(Self {
            registry,
            connection_state,
            transitions,
            push_losses,
            fallbacks,
            snapshots_published,
            snapshots_coalesced,
            levels_dropped,
            messages_discarded,
            pull_failures,
        })
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl SyncTelemetry for SyncMetrics {
    fn state_changed(&self, instrument: &str, state: ConnectionState) {
        self.connection_state
            .with_label_values(&[instrument])
            .set(state.code());
        self.transitions
            .with_label_values(&[instrument, state.as_str()])
            .inc();
    }

    fn push_lost(&self, instrument: &str, reason: &str) {
        self.push_losses.with_label_values(&[instrument, reason]).inc();
    }

    fn fallback_engaged(&self, instrument: &str) {
        self.fallbacks.with_label_values(&[instrument]).inc();
    }

    fn snapshot_published(&self, instrument: &str) {
        self.snapshots_published.with_label_values(&[instrument]).inc();
    }

    fn snapshot_coalesced(&self, instrument: &str) {
        self.snapshots_coalesced.with_label_values(&[instrument]).inc();
    }

    fn levels_dropped(&self, instrument: &str, count: usize) {
        self.levels_dropped
            .with_label_values(&[instrument])
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    fn message_discarded(&self, instrument: &str) {
        self.messages_discarded.with_label_values(&[instrument]).inc();
    }

    fn pull_failed(&self, instrument: &str) {
        self.pull_failures.with_label_values(&[instrument]).inc();
    }
}
