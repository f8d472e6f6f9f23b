//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the synchronization core
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `FeedAdapter`: Push or pull source of raw depth updates
//! - `OrderExecution`: External order submission service
//! - `InstrumentCatalog`: Read-only instrument metadata
//! - `SyncTelemetry`: Observation hooks for the sync loop

pub mod execution;
pub mod feed;
pub mod instruments;
pub mod telemetry;
