//! Metrics and Monitoring Adapters
//!
//! Prometheus metrics for the sync loop and the health/status HTTP
//! server (/live, /ready, /status, /metrics) via axum 0.7.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::SyncMetrics;
