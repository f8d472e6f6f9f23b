//! Depth Feed Adapters - Push and Pull Sources
//!
//! Both implement `FeedAdapter`; one pair is built per instrument class
//! from its venue profile:
//! - `push`: WebSocket stream with keep-alive handling
//! - `pull`: Interval REST snapshot fetcher
//! - `venue`: URL and payload templates per class

pub mod pull;
pub mod push;
pub mod venue;

pub use pull::PullFeed;
pub use push::PushFeed;
pub use venue::VenueProfile;
