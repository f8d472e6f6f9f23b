//! Order Book Domain Types - Canonical Depth-of-Market Snapshot
//!
//! `OrderBookSnapshot` is the single shape every feed is normalized into,
//! whatever the venue or transport. Snapshots and their levels are never
//! mutated after construction: a fresh normalization pass builds new ones.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Side of the book a level belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    /// Sell orders, best (lowest) price first.
    Ask,
    /// Buy orders, best (highest) price first.
    Bid,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ask => write!(f, "ask"),
            Self::Bid => write!(f, "bid"),
        }
    }
}

/// Whether a level carries real liquidity or only pads the row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LevelKind {
    /// Parsed from upstream data.
    Real,
    /// Synthetic zero-size row. Render dimmed, never treat as liquidity.
    Placeholder,
}

/// One price level of one side of the book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: Decimal,
    /// Size resting at this price.
    pub size: Decimal,
    /// Running size from the best price down to this level.
    pub cumulative_size: Decimal,
    /// Visual depth bar weight, 0–100.
    pub depth_weight: f64,
    /// Real or placeholder.
    pub kind: LevelKind,
}

impl PriceLevel {
    /// Synthetic padding row that continues the cumulative total.
    pub fn placeholder(cumulative_size: Decimal) -> Self {
        Self {
            price: Decimal::ZERO,
            size: Decimal::ZERO,
            cumulative_size,
            depth_weight: 0.0,
            kind: LevelKind::Placeholder,
        }
    }

    /// True for synthetic padding rows.
    pub fn is_placeholder(&self) -> bool {
        self.kind == LevelKind::Placeholder
    }

    /// Price rounded for display at the instrument's precision.
    pub fn display_price(&self, precision: u32) -> String {
        if self.is_placeholder() {
            return "-".to_string();
        }
        format!("{:.*}", precision as usize, self.price.round_dp(precision))
    }

    /// Size rounded for display at the instrument's precision.
    pub fn display_size(&self, precision: u32) -> String {
        if self.is_placeholder() {
            return "-".to_string();
        }
        format!("{:.*}", precision as usize, self.size.round_dp(precision))
    }
}

/// A normalized, depth-limited view of both sides of the book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBookSnapshot {
    /// Instrument the snapshot belongs to.
    pub instrument_id: String,
    /// Asks, ascending price; placeholders trail.
    pub asks: Vec<PriceLevel>,
    /// Bids, descending price; placeholders trail.
    pub bids: Vec<PriceLevel>,
    /// Monotonic ingestion sequence (capture time in µs, bumped if needed).
    pub sequence_id: u64,
    /// Wall-clock ingestion time.
    pub captured_at: DateTime<Utc>,
}

impl OrderBookSnapshot {
    /// Lowest real ask.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first().filter(|l| !l.is_placeholder())
    }

    /// Highest real bid.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first().filter(|l| !l.is_placeholder())
    }

    /// Mid price when both sides have liquidity.
    pub fn mid_price(&self) -> Option<Decimal> {
        let ask = self.best_ask()?.price;
        let bid = self.best_bid()?.price;
        Some((ask + bid) / Decimal::TWO)
    }

    /// Best ask minus best bid.
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Upstream data briefly crossed (best ask at or below best bid).
    pub fn is_crossed(&self) -> bool {
        matches!(
            (self.best_ask(), self.best_bid()),
            (Some(a), Some(b)) if a.price <= b.price
        )
    }

    /// True when neither side holds a real level.
    pub fn is_empty(&self) -> bool {
        self.best_ask().is_none() && self.best_bid().is_none()
    }

    /// Real levels of one side, best first.
    pub fn real_levels(&self, side: Side) -> impl Iterator<Item = &PriceLevel> {
        let levels = match side {
            Side::Ask => &self.asks,
            Side::Bid => &self.bids,
        };
        levels.iter().filter(|l| !l.is_placeholder())
    }
}
