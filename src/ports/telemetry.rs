//! Telemetry Port - Sync Loop Observation Hooks
//!
//! The subscription loop reports what it does through `SyncTelemetry`; the
//! Prometheus adapter implements it. Every method defaults to a no-op so
//! tests and embedders can pass `NoopTelemetry`.
//!
//! `StatusSource` goes the other way: the health server reads subscription
//! statuses through it without knowing who owns them.

use crate::domain::connection::{ConnectionState, SubscriptionStatus};

/// Observer of subscription activity. Implementations must be cheap and
/// non-blocking: they are called from inside the sync loop.
pub trait SyncTelemetry: Send + Sync {
  /// Supervisor moved to `state`.
  fn state_changed(&self, _instrument: &str, _state: ConnectionState) {}

  /// Push session lost, labelled with `FeedError::reason()`.
  fn push_lost(&self, _instrument: &str, _reason: &str) {}

  /// Pull fallback engaged.
  fn fallback_engaged(&self, _instrument: &str) {}

  /// Snapshot reached the book store.
  fn snapshot_published(&self, _instrument: &str) {}

  /// Snapshot superseded inside the throttle window.
  fn snapshot_coalesced(&self, _instrument: &str) {}

  /// Malformed levels skipped during normalization.
  fn levels_dropped(&self, _instrument: &str, _count: usize) {}

  /// Message arrived from a closed session or an inactive transport.
  fn message_discarded(&self, _instrument: &str) {}

  /// One pull fetch failed.
  fn pull_failed(&self, _instrument: &str) {}
}

/// Telemetry sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl SyncTelemetry for NoopTelemetry {}

/// Read side of every live subscription's status.
pub trait StatusSource: Send + Sync {
  fn statuses(&self) -> Vec<SubscriptionStatus>;
}
