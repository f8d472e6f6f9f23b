//! Update Throttler - Coalescing Rate Limiter for Book Snapshots
//!
//! Bounds how often snapshots reach the book store:
//! - The first submission after a quiet period of `min_interval` is
//!   released immediately
//! - Submissions inside the interval are coalesced: only the newest is
//!   kept and released when the interval since the last emission ends
//! - At most one pending deadline exists; a newer submission replaces the
//!   pending item but keeps the deadline, so bursts cannot starve output
//!
//! The throttler owns no timer itself. The subscription loop sleeps until
//! `next_deadline()` and calls `poll_due()`, which keeps this type a plain
//! state machine with a single authoritative deadline.

use std::time::Duration;

use tokio::time::Instant;

/// Coalescing throttler over any item type.
#[derive(Debug)]
pub struct UpdateThrottler<T> {
  /// Minimum spacing between emissions.
  min_interval: Duration,
  /// When the last item was released.
  last_emit: Option<Instant>,
  /// Newest item waiting for the interval to end.
  pending: Option<T>,
  /// When `pending` is due.
  deadline: Option<Instant>,
  /// Items discarded because a newer one superseded them.
  coalesced: u64,
}

impl<T> UpdateThrottler<T> {
  /// Create a throttler releasing at most one item per `min_interval`.
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last_emit: None,
      pending: None,
      deadline: None,
      coalesced: 0,
    }
  }

  /// Offer an item. Returns it back when it may be emitted right now;
  /// otherwise it becomes the pending item.
  pub fn submit(&mut self, item: T, now: Instant) -> Option<T> {
    match self.last_emit {
      Some(last) if now < last + self.min_interval => {
        if self.pending.replace(item).is_some() {
          self.coalesced += 1;
        }
        self.deadline = Some(last + self.min_interval);
        None
      }
      _ => {
        if self.pending.take().is_some() {
          self.coalesced += 1;
        }
        self.deadline = None;
        self.last_emit = Some(now);
        Some(item)
      }
    }
  }

  /// Release the pending item if its deadline has passed.
  pub fn poll_due(&mut self, now: Instant) -> Option<T> {
    match self.deadline {
      Some(deadline) if deadline <= now => {
        self.deadline = None;
        let item = self.pending.take()?;
        self.last_emit = Some(now);
        Some(item)
      }
      _ => None,
    }
  }

  /// The single pending deadline, if any.
  pub fn next_deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// Drop any pending item and its deadline.
  pub fn cancel(&mut self) {
    self.pending = None;
    self.deadline = None;
  }

  /// Number of superseded items discarded so far.
  pub fn coalesced(&self) -> u64 {
    self.coalesced
  }

  /// Configured spacing.
  pub fn min_interval(&self) -> Duration {
    self.min_interval
  }
}
