//! Configuration Module - TOML-based Sync Configuration
//!
//! Loads and validates configuration from `config.toml`.
//! Venue endpoints, timing constants and the instrument list are
//! externalized here - nothing is hardcoded in the domain layer.
//!
//! One set of supervisor constants serves both instrument classes;
//! only the venue profile differs between spot and futures.

pub mod catalog;
pub mod loader;

use std::time::Duration;

use serde::Deserialize;

use crate::domain::backoff::Backoff;
use crate::domain::normalizer::PayloadShape;
use crate::ports::instruments::{InstrumentClass, InstrumentSpec};

pub use catalog::StaticCatalog;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Process identity and logging.
  pub app: AppSection,
  /// Connection supervisor timing.
  #[serde(default)]
  pub supervisor: SupervisorConfig,
  /// Update throttling.
  #[serde(default)]
  pub throttle: ThrottleConfig,
  /// Venue profiles per instrument class.
  pub venues: VenuesConfig,
  /// Instruments to synchronize.
  pub instruments: Vec<InstrumentSpec>,
  /// Order service endpoint. Optional: the daemon only synchronizes books.
  #[serde(default)]
  pub api: ApiConfig,
  /// Metrics and health endpoints.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Process identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
  /// Human-readable name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Connection supervisor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
  /// First reconnect delay (milliseconds).
  #[serde(default = "default_backoff_base")]
  pub backoff_base_ms: u64,
  /// Reconnect delay cap (milliseconds).
  #[serde(default = "default_backoff_max")]
  pub backoff_max_ms: u64,
  /// Consecutive push failures tolerated before falling back to pull.
  #[serde(default = "default_retry_ceiling")]
  pub retry_ceiling: u32,
  /// Staleness watchdog period (milliseconds).
  #[serde(default = "default_watchdog_interval")]
  pub watchdog_interval_ms: u64,
  /// Silence while Live that counts as a stalled connection (milliseconds).
  #[serde(default = "default_stale_after")]
  pub stale_after_ms: u64,
  /// Opportunistic push retry period while degraded; 0 disables.
  #[serde(default = "default_push_probe_interval")]
  pub push_probe_interval_ms: u64,
  /// Consecutive pull failures before the connection-error indicator.
  #[serde(default = "default_pull_error_threshold")]
  pub pull_error_threshold: u32,
}

impl SupervisorConfig {
  /// Reconnect backoff policy.
  pub fn backoff(&self) -> Backoff {
    Backoff::new(
      Duration::from_millis(self.backoff_base_ms),
      Duration::from_millis(self.backoff_max_ms),
    )
  }

  pub fn watchdog_interval(&self) -> Duration {
    Duration::from_millis(self.watchdog_interval_ms)
  }

  pub fn stale_after(&self) -> Duration {
    Duration::from_millis(self.stale_after_ms)
  }

  pub fn push_probe_interval(&self) -> Option<Duration> {
    (self.push_probe_interval_ms > 0).then(|| Duration::from_millis(self.push_probe_interval_ms))
  }
}

impl Default for SupervisorConfig {
  fn default() -> Self {
    Self {
      backoff_base_ms: default_backoff_base(),
      backoff_max_ms: default_backoff_max(),
      retry_ceiling: default_retry_ceiling(),
      watchdog_interval_ms: default_watchdog_interval(),
      stale_after_ms: default_stale_after(),
      push_probe_interval_ms: default_push_probe_interval(),
      pull_error_threshold: default_pull_error_threshold(),
    }
  }
}

/// Update throttler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
  /// Minimum spacing between snapshots reaching the book store (ms).
  #[serde(default = "default_min_interval")]
  pub min_interval_ms: u64,
}

impl ThrottleConfig {
  pub fn min_interval(&self) -> Duration {
    Duration::from_millis(self.min_interval_ms)
  }
}

impl Default for ThrottleConfig {
  fn default() -> Self {
    Self {
      min_interval_ms: default_min_interval(),
    }
  }
}

/// Venue profiles keyed by instrument class.
#[derive(Debug, Clone, Deserialize)]
pub struct VenuesConfig {
  pub spot: VenueConfig,
  pub futures: VenueConfig,
}

impl VenuesConfig {
  /// Profile serving an instrument class.
  pub fn for_class(&self, class: InstrumentClass) -> &VenueConfig {
    match class {
      InstrumentClass::Spot => &self.spot,
      InstrumentClass::Futures => &self.futures,
    }
  }
}

/// Endpoints and payload layout of one venue.
///
/// Templates accept `{symbol}`, `{symbol_lower}` and `{depth}`.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
  /// WebSocket endpoint.
  pub push_url: String,
  /// Subscription message sent after connecting; empty sends nothing.
  #[serde(default)]
  pub subscribe_template: String,
  /// REST depth snapshot URL.
  pub pull_url: String,
  /// Pull fallback period (milliseconds).
  #[serde(default = "default_pull_interval")]
  pub pull_interval_ms: u64,
  /// WebSocket handshake timeout (milliseconds).
  #[serde(default = "default_handshake_timeout")]
  pub handshake_timeout_ms: u64,
  /// Client keep-alive ping period (milliseconds); 0 disables.
  #[serde(default = "default_ping_interval")]
  pub ping_interval_ms: u64,
  /// Optional wrapper key around depth payloads.
  #[serde(default)]
  pub envelope: Option<String>,
  /// Ask array field name.
  #[serde(default = "default_asks_field")]
  pub asks_field: String,
  /// Bid array field name.
  #[serde(default = "default_bids_field")]
  pub bids_field: String,
}

impl VenueConfig {
  /// Where depth arrays live in this venue's messages.
  pub fn payload_shape(&self) -> PayloadShape {
    PayloadShape {
      envelope: self.envelope.clone(),
      asks_field: self.asks_field.clone(),
      bids_field: self.bids_field.clone(),
    }
  }
}

/// Order service endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// REST base URL of the trading backend. Empty when orders are not used.
  #[serde(default)]
  pub base_url: String,
  /// Request timeout in milliseconds.
  #[serde(default = "default_timeout")]
  pub timeout_ms: u64,
  /// Maximum order submissions per minute.
  #[serde(default = "default_max_orders")]
  pub max_orders_per_minute: u32,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Serve /live, /ready, /status and /metrics.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Bind address of the HTTP server.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      timeout_ms: default_timeout(),
      max_orders_per_minute: default_max_orders(),
    }
  }
}

impl ApiConfig {
  /// An order backend is configured.
  pub fn has_backend(&self) -> bool {
    !self.base_url.is_empty()
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: default_true(),
      bind_address: default_metrics_addr(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_backoff_base() -> u64 {
  1_000
}

fn default_backoff_max() -> u64 {
  16_000
}

fn default_retry_ceiling() -> u32 {
  5
}

fn default_watchdog_interval() -> u64 {
  5_000
}

fn default_stale_after() -> u64 {
  15_000
}

fn default_push_probe_interval() -> u64 {
  60_000
}

fn default_pull_error_threshold() -> u32 {
  3
}

fn default_min_interval() -> u64 {
  200
}

fn default_pull_interval() -> u64 {
  5_000
}

fn default_handshake_timeout() -> u64 {
  10_000
}

fn default_ping_interval() -> u64 {
  20_000
}

fn default_asks_field() -> String {
  "asks".to_string()
}

fn default_bids_field() -> String {
  "bids".to_string()
}

fn default_timeout() -> u64 {
  10_000
}

fn default_max_orders() -> u32 {
  60
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}
