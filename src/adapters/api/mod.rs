//! Order Service API Adapter
//!
//! HTTP plumbing for the external trading backend.
//!
//! Sub-modules:
//! - `client`: JSON client with bounded concurrency and retries
//! - `orders`: `OrderExecution` implementation

pub mod client;
pub mod orders;

pub use client::{RestClient, RestClientConfig};
pub use orders::RestOrderExecutor;
