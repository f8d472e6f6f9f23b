//! Domain layer - Order book model and pure synchronization logic.
//!
//! Nothing here touches the network or the clock on its own: callers pass
//! timestamps in, which keeps every rule testable in isolation.

pub mod backoff;
pub mod book;
pub mod connection;
pub mod normalizer;

// Re-export core types for convenience
pub use backoff::Backoff;
pub use book::{LevelKind, OrderBookSnapshot, PriceLevel, Side};
pub use connection::{ConnectionState, FeedHealth, SubscriptionStatus, Transport};
pub use normalizer::{DepthNormalizer, Normalized, PayloadShape, RawDepth};
