//! Depth Normalizer - Venue Payloads to Canonical Snapshots
//!
//! Converts raw ask/bid arrays in whatever shape a venue sends them
//! (`[price, size, ...]` tuples, `{price, size}` objects, string or number
//! encodings, any ordering) into an `OrderBookSnapshot`:
//!
//! 1. Parse each level; drop the ones that fail instead of the whole update
//! 2. Merge equal prices, sort asks ascending and bids descending
//! 3. Keep the `depth` levels nearest the mid
//! 4. Running cumulative size from best to worst price
//! 5. Log-scaled depth weight, clamped to [1, 95] for real levels
//! 6. Stamp ingestion time and a monotonic sequence id
//!
//! Short sides are padded with flagged placeholder rows so the UI always
//! renders exactly `depth` rows per side.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde_json::Value;

use super::book::{LevelKind, OrderBookSnapshot, PriceLevel};

/// Lower clamp for the depth weight of a real level.
pub const MIN_DEPTH_WEIGHT: f64 = 1.0;
/// Upper clamp for the depth weight of a real level.
pub const MAX_DEPTH_WEIGHT: f64 = 95.0;

const PRICE_KEYS: [&str; 2] = ["price", "p"];
const SIZE_KEYS: [&str; 6] = ["size", "qty", "quantity", "amount", "q", "s"];

/// Where a venue puts its depth arrays inside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadShape {
    /// Optional wrapper key (e.g. `data` for combined streams).
    pub envelope: Option<String>,
    /// Field holding the ask array.
    pub asks_field: String,
    /// Field holding the bid array.
    pub bids_field: String,
}

impl Default for PayloadShape {
    fn default() -> Self {
        Self {
            envelope: None,
            asks_field: "asks".to_string(),
            bids_field: "bids".to_string(),
        }
    }
}

/// Raw, unparsed ask/bid levels as delivered by a feed adapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDepth {
    pub asks: Vec<Value>,
    pub bids: Vec<Value>,
}

impl RawDepth {
    /// Pull the depth arrays out of a decoded message.
    ///
    /// Returns `None` when the message carries neither side (acks,
    /// heartbeats, unrelated channels). A missing single side is empty.
    pub fn from_message(message: &Value, shape: &PayloadShape) -> Option<Self> {
        let body = shape
            .envelope
            .as_deref()
            .and_then(|key| message.get(key))
            .filter(|inner| inner.is_object())
            .unwrap_or(message);

        let side = |field: &str, fallback: &str| {
            body.get(field)
                .or_else(|| body.get(fallback))
                .and_then(Value::as_array)
        };
        // REST snapshots often use the long names even when the stream
        // abbreviates them.
        let asks = side(&shape.asks_field, "asks");
        let bids = side(&shape.bids_field, "bids");

        if asks.is_none() && bids.is_none() {
            return None;
        }

        Some(Self {
            asks: asks.cloned().unwrap_or_default(),
            bids: bids.cloned().unwrap_or_default(),
        })
    }

    /// Decode a text frame and extract depth; `None` if it is not JSON
    /// or not a depth message.
    pub fn from_text(text: &str, shape: &PayloadShape) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        Self::from_message(&value, shape)
    }
}

/// Result of one normalization pass.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// The canonical snapshot.
    pub snapshot: OrderBookSnapshot,
    /// Raw levels rejected as unparseable or empty.
    pub dropped_levels: usize,
}

/// Stateful normalizer for one subscription.
///
/// Holds the configured depth and the last issued sequence id so ids stay
/// strictly increasing even if the wall clock stalls.
#[derive(Debug, Clone)]
pub struct DepthNormalizer {
    instrument_id: String,
    depth: usize,
    last_sequence: u64,
}

impl DepthNormalizer {
    /// Create a normalizer that emits exactly `depth` rows per side.
    pub fn new(instrument_id: impl Into<String>, depth: usize) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            depth,
            last_sequence: 0,
        }
    }

    /// Rows per side in every emitted snapshot.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Normalize one raw update. Never fails: bad levels are dropped and
    /// an empty input yields an empty, fully padded snapshot.
    pub fn normalize(&mut self, raw: &RawDepth, captured_at: DateTime<Utc>) -> Normalized {
        let mut dropped_levels = 0;

        let asks = aggregate(&raw.asks, &mut dropped_levels);
        let bids = aggregate(&raw.bids, &mut dropped_levels);

        let asks = accumulate(asks.into_iter().take(self.depth));
        let bids = accumulate(bids.into_iter().rev().take(self.depth));

        let max_cumulative = asks
            .last()
            .map(|l| l.2)
            .into_iter()
            .chain(bids.last().map(|l| l.2))
            .max()
            .unwrap_or(Decimal::ZERO);

        let asks = self.finish_side(asks, max_cumulative);
        let bids = self.finish_side(bids, max_cumulative);

        let sequence_id = self.next_sequence(captured_at);

        Normalized {
            snapshot: OrderBookSnapshot {
                instrument_id: self.instrument_id.clone(),
                asks,
                bids,
                sequence_id,
                captured_at,
            },
            dropped_levels,
        }
    }

    fn finish_side(
        &self,
        levels: Vec<(Decimal, Decimal, Decimal)>,
        max_cumulative: Decimal,
    ) -> Vec<PriceLevel> {
        let last_cumulative = levels.last().map_or(Decimal::ZERO, |l| l.2);

        let mut out: Vec<PriceLevel> = levels
            .into_iter()
            .map(|(price, size, cumulative_size)| PriceLevel {
                price,
                size,
                cumulative_size,
                depth_weight: depth_weight(cumulative_size, max_cumulative),
                kind: LevelKind::Real,
            })
            .collect();

        out.resize_with(self.depth, || PriceLevel::placeholder(last_cumulative));
        out
    }

    fn next_sequence(&mut self, captured_at: DateTime<Utc>) -> u64 {
        let micros = u64::try_from(captured_at.timestamp_micros()).unwrap_or(0);
        self.last_sequence = micros.max(self.last_sequence + 1);
        self.last_sequence
    }
}

/// Parse and merge one side into a price-ordered map.
fn aggregate(raw: &[Value], dropped: &mut usize) -> BTreeMap<Decimal, Decimal> {
    let mut levels = BTreeMap::new();
    for entry in raw {
        match parse_level(entry) {
            Some((price, size)) => {
                let slot = levels.entry(price).or_insert(Decimal::ZERO);
                *slot = slot.saturating_add(size);
            }
            None => *dropped += 1,
        }
    }
    levels
}

fn accumulate(
    levels: impl Iterator<Item = (Decimal, Decimal)>,
) -> Vec<(Decimal, Decimal, Decimal)> {
    let mut running = Decimal::ZERO;
    levels
        .map(|(price, size)| {
            running = running.saturating_add(size);
            (price, size, running)
        })
        .collect()
}

/// Parse a single `[price, size, ...]` tuple or `{price, size}` object.
///
/// Non-positive prices and sizes are treated as invalid.
pub fn parse_level(raw: &Value) -> Option<(Decimal, Decimal)> {
    let (price, size) = match raw {
        Value::Array(fields) => (fields.first()?, fields.get(1)?),
        Value::Object(map) => (
            PRICE_KEYS.iter().find_map(|k| map.get(*k))?,
            SIZE_KEYS.iter().find_map(|k| map.get(*k))?,
        ),
        _ => return None,
    };

    let price = parse_decimal(price)?;
    let size = parse_decimal(size)?;

    (price > Decimal::ZERO && size > Decimal::ZERO).then_some((price, size))
}

fn parse_decimal(raw: &Value) -> Option<Decimal> {
    match raw {
        Value::String(s) => {
            let s = s.trim();
            match Decimal::from_str(s) {
                Ok(d) => Some(d),
                Err(_) if s.contains(['e', 'E']) => Decimal::from_scientific(s).ok(),
                Err(_) => None,
            }
        }
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_u64().map(Decimal::from))
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        _ => None,
    }
}

/// Sub-linear visual weight of a cumulative size relative to the deepest
/// cumulative size on either side.
pub fn depth_weight(cumulative: Decimal, max_cumulative: Decimal) -> f64 {
    if max_cumulative <= Decimal::ZERO || cumulative <= Decimal::ZERO {
        return MIN_DEPTH_WEIGHT;
    }
    let ratio = (cumulative / max_cumulative)
        .to_f64()
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);
    let weight = 100.0 * 9.0f64.mul_add(ratio, 1.0).ln() / 10f64.ln();
    weight.clamp(MIN_DEPTH_WEIGHT, MAX_DEPTH_WEIGHT)
}
