//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, VenueConfig};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    instruments = config.instruments.len(),
    retry_ceiling = config.supervisor.retry_ceiling,
    throttle_ms = config.throttle.min_interval_ms,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Non-empty, uniquely named instruments with a usable depth
/// - Sensible supervisor timing (watchdog faster than staleness)
/// - Non-empty venue endpoints
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    !config.instruments.is_empty(),
    "At least one instrument must be configured"
  );

  for (i, spec) in config.instruments.iter().enumerate() {
    anyhow::ensure!(!spec.id.is_empty(), "Instrument {} has empty id", i);
    anyhow::ensure!(
      !spec.symbol.is_empty(),
      "Instrument {} ({}) has empty symbol",
      i,
      spec.id
    );
    anyhow::ensure!(
      (1..=50).contains(&spec.depth),
      "Instrument {} depth must be in [1, 50], got {}",
      spec.id,
      spec.depth
    );
    anyhow::ensure!(
      config.instruments[..i].iter().all(|other| other.id != spec.id),
      "Instrument {} is configured twice",
      spec.id
    );
  }

  let sup = &config.supervisor;
  anyhow::ensure!(sup.backoff_base_ms > 0, "backoff_base_ms must be positive");
  anyhow::ensure!(
    sup.backoff_max_ms >= sup.backoff_base_ms,
    "backoff_max_ms ({}) must be >= backoff_base_ms ({})",
    sup.backoff_max_ms,
    sup.backoff_base_ms
  );
  anyhow::ensure!(sup.watchdog_interval_ms > 0, "watchdog_interval_ms must be positive");
  anyhow::ensure!(
    sup.stale_after_ms > sup.watchdog_interval_ms,
    "stale_after_ms ({}) must exceed watchdog_interval_ms ({})",
    sup.stale_after_ms,
    sup.watchdog_interval_ms
  );
  anyhow::ensure!(sup.pull_error_threshold > 0, "pull_error_threshold must be positive");

  anyhow::ensure!(
    config.throttle.min_interval_ms > 0,
    "throttle.min_interval_ms must be positive"
  );

  validate_venue("spot", &config.venues.spot)?;
  validate_venue("futures", &config.venues.futures)?;

  anyhow::ensure!(config.api.timeout_ms > 0, "api.timeout_ms must be positive");
  if config.api.has_backend() {
    anyhow::ensure!(
      config.api.max_orders_per_minute > 0,
      "max_orders_per_minute must be positive"
    );
  }

  Ok(())
}

fn validate_venue(name: &str, venue: &VenueConfig) -> Result<()> {
  anyhow::ensure!(!venue.push_url.is_empty(), "Venue {name} push_url must not be empty");
  anyhow::ensure!(!venue.pull_url.is_empty(), "Venue {name} pull_url must not be empty");
  anyhow::ensure!(
    venue.pull_interval_ms >= 1_000,
    "Venue {name} pull_interval_ms must be at least 1000, got {}",
    venue.pull_interval_ms
  );
  anyhow::ensure!(
    venue.handshake_timeout_ms > 0,
    "Venue {name} handshake_timeout_ms must be positive"
  );
  Ok(())
}
