//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (WebSockets, HTTP clients, Prometheus).
//!
//! Adapter categories:
//! - `api`: Order service REST client
//! - `feeds`: Push (WebSocket) and pull (REST) depth feeds
//! - `metrics`: Prometheus metrics export and health checks

pub mod api;
pub mod feeds;
pub mod metrics;
