//! Instrument Catalog Port - Read-only Instrument Metadata
//!
//! Supplied by the admin configuration service; the synchronization core
//! reads it once when a subscription is created.

use serde::Deserialize;

/// Instrument class; each class maps to one venue profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
  Spot,
  Futures,
}

impl std::fmt::Display for InstrumentClass {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Spot => write!(f, "spot"),
      Self::Futures => write!(f, "futures"),
    }
  }
}

/// Static metadata for one tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstrumentSpec {
  /// Internal identifier used by trading views.
  pub id: String,
  /// Venue symbol.
  pub symbol: String,
  /// Spot or futures.
  pub class: InstrumentClass,
  /// Rows per book side.
  #[serde(default = "default_depth")]
  pub depth: usize,
  /// Decimal places for price display.
  #[serde(default = "default_price_precision")]
  pub price_precision: u32,
  /// Decimal places for size display.
  #[serde(default = "default_size_precision")]
  pub size_precision: u32,
}

/// Lookup of instrument metadata.
pub trait InstrumentCatalog: Send + Sync {
  /// Metadata for one instrument, if configured.
  fn instrument(&self, id: &str) -> Option<InstrumentSpec>;

  /// Every configured instrument.
  fn instruments(&self) -> Vec<InstrumentSpec>;
}

fn default_depth() -> usize {
  10
}

fn default_price_precision() -> u32 {
  2
}

fn default_size_precision() -> u32 {
  4
}
