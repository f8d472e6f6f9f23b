//! Venue profile: the per-instrument-class endpoints and payload layout.
//!
//! Spot and futures differ only here; both run the same adapters and the
//! same supervisor.

use std::time::Duration;

use crate::config::VenueConfig;
use crate::domain::normalizer::PayloadShape;
use crate::ports::feed::FeedRequest;

/// Resolved venue settings.
#[derive(Debug, Clone)]
pub struct VenueProfile {
    /// Label for logs (`spot`, `futures`).
    pub name: String,
    push_url: String,
    subscribe_template: String,
    pull_url: String,
    pub pull_interval: Duration,
    pub handshake_timeout: Duration,
    /// Client ping period; `None` disables client pings.
    pub ping_interval: Option<Duration>,
    pub shape: PayloadShape,
}

impl VenueProfile {
    pub fn from_config(name: impl Into<String>, config: &VenueConfig) -> Self {
        Self {
            name: name.into(),
            push_url: config.push_url.clone(),
            subscribe_template: config.subscribe_template.clone(),
            pull_url: config.pull_url.clone(),
            pull_interval: Duration::from_millis(config.pull_interval_ms),
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            ping_interval: (config.ping_interval_ms > 0)
                .then(|| Duration::from_millis(config.ping_interval_ms)),
            shape: config.payload_shape(),
        }
    }

    /// WebSocket URL for `request`.
    pub fn push_url(&self, request: &FeedRequest) -> String {
        render(&self.push_url, request)
    }

    /// Subscription message, or `None` when the URL alone subscribes.
    pub fn subscribe_message(&self, request: &FeedRequest) -> Option<String> {
        (!self.subscribe_template.trim().is_empty()).then(|| render(&self.subscribe_template, request))
    }

    /// REST snapshot URL for `request`.
    pub fn pull_url(&self, request: &FeedRequest) -> String {
        render(&self.pull_url, request)
    }
}

/// Substitute `{symbol}`, `{symbol_lower}` and `{depth}`.
pub fn render(template: &str, request: &FeedRequest) -> String {
    template
        .replace("{symbol_lower}", &request.symbol.to_lowercase())
        .replace("{symbol}", &request.symbol)
        .replace("{depth}", &request.depth.to_string())
}
