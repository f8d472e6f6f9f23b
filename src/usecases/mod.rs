//! Use Cases Layer - Book Synchronization Workflows
//!
//! Orchestrates domain logic with port interfaces. Nothing here opens a
//! socket itself; adapters are injected through `FeedPair`.
//!
//! Use cases:
//! - `UpdateThrottler`: Coalescing rate limit for book writes
//! - `ConnectionSupervisor`: Push/pull lifecycle state machine
//! - `BookStore`: Single-writer latest snapshot
//! - `Subscription` / `SubscriptionManager`: Per-view sync tasks
//! - `submit_and_refresh`: Order submission with book refresh

pub mod book_store;
pub mod order_flow;
pub mod subscription;
pub mod supervisor;
pub mod throttler;
