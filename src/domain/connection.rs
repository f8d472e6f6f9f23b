//! Connection lifecycle types shared by the supervisor, the book store
//! and the presentation layer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which kind of upstream source delivers data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Transport {
    /// Persistent server-initiated channel (WebSocket).
    Push,
    /// Periodic client-initiated snapshot fetch (REST).
    Pull,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// Lifecycle state of one instrument subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Created, nothing opened yet (also the state after teardown).
    Idle,
    /// Push adapter opening, waiting for handshake confirmation.
    Connecting,
    /// Push adapter confirmed and delivering.
    Live,
    /// Waiting out a backoff delay before the next push attempt.
    Reconnecting,
    /// Push given up; data keeps flowing through the named fallback.
    Degraded(Transport),
    /// No data path could be constructed at all.
    Failed,
}

impl ConnectionState {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Degraded(_) => "degraded",
            Self::Failed => "failed",
        }
    }

    /// Numeric code for the Prometheus state gauge.
    pub fn code(&self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Live => 2,
            Self::Reconnecting => 3,
            Self::Degraded(_) => 4,
            Self::Failed => 5,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Degraded(t) => write!(f, "degraded({t})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// What the UI needs to render a status indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    /// Instrument this status describes.
    pub instrument_id: String,
    /// Current supervisor state.
    pub state: ConnectionState,
    /// Consecutive failed push attempts.
    pub attempt: u32,
    /// Data currently arrives at reduced freshness (pull fallback).
    pub limited: bool,
    /// Three or more consecutive pull fetches failed.
    pub connection_error: bool,
    /// Last time accepted data arrived.
    pub last_data_at: Option<DateTime<Utc>>,
    /// Delay before the next scheduled push retry, if any.
    #[serde(skip)]
    pub retry_in: Option<Duration>,
}

impl SubscriptionStatus {
    /// Fresh status for a just-created subscription.
    pub fn idle(instrument_id: impl Into<String>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            state: ConnectionState::Idle,
            attempt: 0,
            limited: false,
            connection_error: false,
            last_data_at: None,
            retry_in: None,
        }
    }

    /// Three-way classification the UI must always be able to make.
    pub fn health(&self) -> FeedHealth {
        match self.state {
            ConnectionState::Failed => FeedHealth::Failed,
            ConnectionState::Degraded(_) => FeedHealth::Limited,
            _ if self.limited => FeedHealth::Limited,
            _ => FeedHealth::Live,
        }
    }
}

/// Coarse status bucket shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedHealth {
    Live,
    Limited,
    Failed,
}
