//! Connection Supervisor - Push/Pull Lifecycle State Machine
//!
//! Owns the `ConnectionState` of one subscription and decides which feed
//! adapter should be open:
//!
//! ```text
//! Idle ──start──▶ Connecting ──opened──▶ Live
//!                  ▲    │                  │ error / close / stale
//!          backoff │    │ error            ▼
//!                  └─ Reconnecting ◀───────┘
//!                         │ failures > ceiling
//!                         ▼
//!                  Degraded(Pull) ──retry / probe──▶ Connecting (pull kept)
//! any ──construction error──▶ Failed ──retry──▶ Connecting
//! ```
//!
//! The supervisor is a plain state machine: every input takes `now` and
//! returns the adapter `Command`s to execute, and timers are deadlines
//! read through `next_deadline()`. The subscription loop does the I/O.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::domain::backoff::Backoff;
use crate::domain::connection::{ConnectionState, Transport};
use crate::ports::feed::FeedError;

/// Adapter action requested by the supervisor.
///
/// Commands are returned in execution order; a close always precedes the
/// open that replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  OpenPush,
  ClosePush,
  OpenPull,
  ClosePull,
}

/// State machine for one subscription's connection lifecycle.
#[derive(Debug)]
pub struct ConnectionSupervisor {
  /// Instrument, for log context.
  instrument_id: String,
  /// Reconnect delay policy.
  backoff: Backoff,
  /// Consecutive push failures tolerated before falling back.
  retry_ceiling: u32,
  /// Staleness check period.
  watchdog_interval: Duration,
  /// Silence while Live treated as a stalled connection.
  stale_after: Duration,
  /// Opportunistic push retry period while degraded.
  push_probe_interval: Option<Duration>,
  /// Consecutive pull failures before the connection-error flag.
  pull_error_threshold: u32,

  state: ConnectionState,
  /// Consecutive failed push attempts.
  attempt: u32,
  push_open: bool,
  pull_open: bool,
  pull_failures: u32,
  last_data_at: Option<Instant>,
  reconnect_at: Option<Instant>,
  watchdog_at: Option<Instant>,
  probe_at: Option<Instant>,
}

impl ConnectionSupervisor {
  /// Create an idle supervisor from config.
  pub fn new(instrument_id: impl Into<String>, config: &SupervisorConfig) -> Self {
    Self {
      instrument_id: instrument_id.into(),
      backoff: config.backoff(),
      retry_ceiling: config.retry_ceiling,
      watchdog_interval: config.watchdog_interval(),
      stale_after: config.stale_after(),
      push_probe_interval: config.push_probe_interval(),
      pull_error_threshold: config.pull_error_threshold,
      state: ConnectionState::Idle,
      attempt: 0,
      push_open: false,
      pull_open: false,
      pull_failures: 0,
      last_data_at: None,
      reconnect_at: None,
      watchdog_at: None,
      probe_at: None,
    }
  }

  // ── Inputs ──────────────────────────────────────────────

  /// Subscription created: open the push adapter.
  pub fn start(&mut self, _now: Instant) -> Vec<Command> {
    if self.state != ConnectionState::Idle {
      return Vec::new();
    }
    self.connect_push()
  }

  /// Push adapter confirmed its handshake.
  pub fn on_push_opened(&mut self, now: Instant) -> Vec<Command> {
    if self.state != ConnectionState::Connecting || !self.push_open {
      debug!(instrument = %self.instrument_id, state = %self.state, "Ignoring late push handshake");
      return Vec::new();
    }

    self.transition(ConnectionState::Live);
    self.attempt = 0;
    self.reconnect_at = None;
    self.probe_at = None;
    self.last_data_at = Some(now);
    self.watchdog_at = Some(now + self.watchdog_interval);

    if self.pull_open {
      self.pull_open = false;
      self.pull_failures = 0;
      info!(instrument = %self.instrument_id, "Push restored, stopping pull fallback");
      return vec![Command::ClosePull];
    }
    Vec::new()
  }

  /// Push adapter failed: handshake error, drop, or unexpected close.
  pub fn on_push_failed(&mut self, now: Instant, error: &FeedError) -> Vec<Command> {
    if !self.push_open
      || !matches!(self.state, ConnectionState::Connecting | ConnectionState::Live)
    {
      return Vec::new();
    }

    let was_live = self.state == ConnectionState::Live;
    warn!(
      instrument = %self.instrument_id,
      state = %self.state,
      error = %error,
      handshake = error.is_handshake(),
      "Push feed failed"
    );

    // A drop after a confirmed session starts a fresh failure count;
    // handshake failures keep climbing the ladder.
    if was_live {
      self.attempt = 0;
    }

    let mut commands = self.close_push();
    commands.extend(self.after_push_loss(now));
    commands
  }

  /// Data arrived from `transport`. Returns whether it may be applied.
  pub fn on_data(&mut self, now: Instant, transport: Transport) -> bool {
    let accepted = match transport {
      Transport::Push => self.push_open && self.state == ConnectionState::Live,
      Transport::Pull => self.pull_open,
    };
    if accepted {
      self.last_data_at = Some(now);
      if transport == Transport::Pull {
        self.pull_failures = 0;
      }
    }
    accepted
  }

  /// One pull fetch failed; the pull loop keeps running.
  pub fn on_pull_failed(&mut self, _now: Instant, error: &FeedError) {
    if !self.pull_open {
      return;
    }
    self.pull_failures = self.pull_failures.saturating_add(1);
    if self.pull_failures == self.pull_error_threshold {
      warn!(
        instrument = %self.instrument_id,
        failures = self.pull_failures,
        error = %error,
        "Pull fallback failing repeatedly"
      );
    } else {
      debug!(instrument = %self.instrument_id, failures = self.pull_failures, error = %error, "Pull fetch failed");
    }
  }

  /// An adapter could not be constructed at all.
  ///
  /// A push failure while pull is serving keeps the fallback and re-arms
  /// the probe; anything else ends in `Failed`.
  pub fn on_construction_failed(
    &mut self,
    now: Instant,
    transport: Transport,
    error: &FeedError,
  ) -> Vec<Command> {
    tracing::error!(
      instrument = %self.instrument_id,
      transport = %transport,
      error = %error,
      "Feed adapter construction failed"
    );

    match transport {
      Transport::Push => {
        self.push_open = false;
        if self.pull_open {
          self.transition(ConnectionState::Degraded(Transport::Pull));
          self.schedule_probe(now);
          return Vec::new();
        }
      }
      Transport::Pull => self.pull_open = false,
    }

    let commands = self.close_all();
    self.clear_timers();
    self.transition(ConnectionState::Failed);
    commands
  }

  /// Explicit user retry. Valid from Degraded, Failed and Reconnecting.
  /// From Degraded the pull adapter keeps serving until push is Live.
  pub fn retry(&mut self, _now: Instant) -> Vec<Command> {
    match self.state {
      ConnectionState::Degraded(_) | ConnectionState::Failed | ConnectionState::Reconnecting => {
        info!(instrument = %self.instrument_id, from = %self.state, "Manual push retry");
        self.attempt = 0;
        self.reconnect_at = None;
        self.probe_at = None;
        self.connect_push()
      }
      _ => Vec::new(),
    }
  }

  /// Fire every timer whose deadline has passed.
  pub fn on_timer(&mut self, now: Instant) -> Vec<Command> {
    let mut commands = Vec::new();

    if due(self.reconnect_at, now) {
      self.reconnect_at = None;
      if self.state == ConnectionState::Reconnecting {
        commands.extend(self.connect_push());
      }
    }

    if due(self.watchdog_at, now) {
      self.watchdog_at = None;
      if self.state == ConnectionState::Live {
        commands.extend(self.check_staleness(now));
      }
    }

    if due(self.probe_at, now) {
      self.probe_at = None;
      if matches!(self.state, ConnectionState::Degraded(_)) {
        debug!(instrument = %self.instrument_id, "Opportunistic push probe");
        self.attempt = 0;
        commands.extend(self.connect_push());
      }
    }

    commands
  }

  /// Subscription destroyed: close everything and cancel every timer.
  pub fn teardown(&mut self) -> Vec<Command> {
    let commands = self.close_all();
    self.clear_timers();
    self.pull_failures = 0;
    self.transition(ConnectionState::Idle);
    commands
  }

  // ── Queries ─────────────────────────────────────────────

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  pub fn attempt(&self) -> u32 {
    self.attempt
  }

  /// Data arrives through the pull fallback.
  pub fn limited(&self) -> bool {
    self.pull_open
  }

  /// Enough consecutive pull failures to show a connection error.
  pub fn connection_error(&self) -> bool {
    self.pull_open && self.pull_failures >= self.pull_error_threshold
  }

  /// Earliest pending deadline.
  pub fn next_deadline(&self) -> Option<Instant> {
    [self.reconnect_at, self.watchdog_at, self.probe_at]
      .into_iter()
      .flatten()
      .min()
  }

  /// Number of armed timers.
  pub fn pending_timers(&self) -> usize {
    [self.reconnect_at, self.watchdog_at, self.probe_at]
      .iter()
      .filter(|t| t.is_some())
      .count()
  }

  /// Number of adapters the supervisor considers open.
  pub fn open_adapters(&self) -> usize {
    usize::from(self.push_open) + usize::from(self.pull_open)
  }

  /// Time left before the scheduled reconnect.
  pub fn retry_in(&self, now: Instant) -> Option<Duration> {
    self.reconnect_at.map(|at| at.saturating_duration_since(now))
  }

  // ── Internals ───────────────────────────────────────────

  fn connect_push(&mut self) -> Vec<Command> {
    self.transition(ConnectionState::Connecting);
    self.push_open = true;
    vec![Command::OpenPush]
  }

  fn close_push(&mut self) -> Vec<Command> {
    self.watchdog_at = None;
    if std::mem::take(&mut self.push_open) {
      vec![Command::ClosePush]
    } else {
      Vec::new()
    }
  }

  fn close_all(&mut self) -> Vec<Command> {
    let mut commands = self.close_push();
    if std::mem::take(&mut self.pull_open) {
      commands.push(Command::ClosePull);
    }
    commands
  }

  fn clear_timers(&mut self) {
    self.reconnect_at = None;
    self.watchdog_at = None;
    self.probe_at = None;
  }

  /// Decide where to go once the push session is gone.
  fn after_push_loss(&mut self, now: Instant) -> Vec<Command> {
    if self.pull_open {
      self.transition(ConnectionState::Degraded(Transport::Pull));
      self.schedule_probe(now);
      return Vec::new();
    }

    self.attempt = self.attempt.saturating_add(1);

    if self.attempt > self.retry_ceiling {
      warn!(
        instrument = %self.instrument_id,
        attempts = self.attempt,
        ceiling = self.retry_ceiling,
        "Push retry ceiling exceeded, falling back to pull"
      );
      self.transition(ConnectionState::Degraded(Transport::Pull));
      self.pull_open = true;
      self.pull_failures = 0;
      self.schedule_probe(now);
      return vec![Command::OpenPull];
    }

    let delay = self.backoff.delay(self.attempt);
    info!(
      instrument = %self.instrument_id,
      attempt = self.attempt,
      delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
      "Scheduling push reconnect"
    );
    self.transition(ConnectionState::Reconnecting);
    self.reconnect_at = Some(now + delay);
    Vec::new()
  }

  fn check_staleness(&mut self, now: Instant) -> Vec<Command> {
    let silent_for = self
      .last_data_at
      .map_or(Duration::MAX, |at| now.saturating_duration_since(at));

    if silent_for <= self.stale_after {
      self.watchdog_at = Some(now + self.watchdog_interval);
      return Vec::new();
    }

    warn!(
      instrument = %self.instrument_id,
      silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX),
      "Push feed stale, forcing reconnect"
    );
    self.attempt = 0;
    let mut commands = self.close_push();
    commands.extend(self.after_push_loss(now));
    commands
  }

  fn schedule_probe(&mut self, now: Instant) {
    self.probe_at = self.push_probe_interval.map(|every| now + every);
  }

  fn transition(&mut self, next: ConnectionState) {
    if self.state != next {
      info!(instrument = %self.instrument_id, from = %self.state, to = %next, "Connection state change");
      self.state = next;
    }
  }
}

fn due(deadline: Option<Instant>, now: Instant) -> bool {
  deadline.is_some_and(|at| at <= now)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> SupervisorConfig {
    SupervisorConfig {
      backoff_base_ms: 1_000,
      backoff_max_ms: 16_000,
      retry_ceiling: 5,
      watchdog_interval_ms: 5_000,
      stale_after_ms: 15_000,
      push_probe_interval_ms: 0,
      pull_error_threshold: 3,
    }
  }

  fn dropped() -> FeedError {
    FeedError::Dropped("eof".to_string())
  }

  fn handshake() -> FeedError {
    FeedError::Handshake("refused".to_string())
  }

  fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
  }

  /// Fail the current push attempt and advance to the reconnect deadline.
  fn fail_and_wait(sup: &mut ConnectionSupervisor, now: &mut Instant) -> Option<Duration> {
    sup.on_push_failed(*now, &handshake());
    let delay = sup.retry_in(*now);
    if let Some(d) = delay {
      *now += d;
      sup.on_timer(*now);
    }
    delay
  }

  #[test]
  fn test_start_opens_push() {
    let now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    assert_eq!(sup.start(now), vec![Command::OpenPush]);
    assert_eq!(sup.state(), ConnectionState::Connecting);
    assert!(sup.start(now).is_empty());
  }

  #[test]
  fn test_handshake_goes_live_and_arms_watchdog() {
    let now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    sup.start(now);
    assert!(sup.on_push_opened(now).is_empty());
    assert_eq!(sup.state(), ConnectionState::Live);
    assert_eq!(sup.next_deadline(), Some(now + secs(5)));
  }

  #[test]
  fn test_backoff_doubles_and_resets_after_live() {
    let mut now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    sup.start(now);

    let delays: Vec<_> = (0..3).map(|_| fail_and_wait(&mut sup, &mut now).unwrap()).collect();
    assert_eq!(delays, vec![secs(1), secs(2), secs(4)]);

    assert_eq!(sup.state(), ConnectionState::Connecting);
    sup.on_push_opened(now);
    assert_eq!(sup.attempt(), 0);

    assert_eq!(sup.on_push_failed(now, &dropped()), vec![Command::ClosePush]);
    assert_eq!(sup.state(), ConnectionState::Reconnecting);
    assert_eq!(sup.retry_in(now), Some(secs(1)));
  }

  #[test]
  fn test_ceiling_falls_back_to_pull() {
    let mut now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    sup.start(now);

    for _ in 0..5 {
      fail_and_wait(&mut sup, &mut now);
    }
    let commands = sup.on_push_failed(now, &handshake());
    assert_eq!(commands, vec![Command::ClosePush, Command::OpenPull]);
    assert_eq!(sup.state(), ConnectionState::Degraded(Transport::Pull));
    assert!(sup.limited());
    assert_eq!(sup.pending_timers(), 0);
    assert!(sup.on_data(now, Transport::Pull));
    assert!(!sup.on_data(now, Transport::Push));
  }

  #[test]
  fn test_retry_from_degraded_keeps_pull_until_live() {
    let mut now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    sup.start(now);
    for _ in 0..6 {
      fail_and_wait(&mut sup, &mut now);
    }
    assert_eq!(sup.state(), ConnectionState::Degraded(Transport::Pull));

    assert_eq!(sup.retry(now), vec![Command::OpenPush]);
    assert_eq!(sup.state(), ConnectionState::Connecting);
    assert_eq!(sup.open_adapters(), 2);
    assert!(sup.on_data(now, Transport::Pull));

    // A failed retry drops straight back to the running fallback.
    assert_eq!(sup.on_push_failed(now, &handshake()), vec![Command::ClosePush]);
    assert_eq!(sup.state(), ConnectionState::Degraded(Transport::Pull));

    sup.retry(now);
    assert_eq!(sup.on_push_opened(now), vec![Command::ClosePull]);
    assert_eq!(sup.state(), ConnectionState::Live);
    assert!(!sup.limited());
  }

  #[test]
  fn test_watchdog_forces_reconnect_on_silence() {
    let mut now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    sup.start(now);
    sup.on_push_opened(now);

    // Data keeps it alive.
    now += secs(5);
    assert!(sup.on_data(now, Transport::Push));
    assert!(sup.on_timer(now).is_empty());
    assert_eq!(sup.state(), ConnectionState::Live);

    // Silence beyond the threshold.
    for _ in 0..4 {
      now += secs(5);
      let commands = sup.on_timer(now);
      if !commands.is_empty() {
        assert_eq!(commands, vec![Command::ClosePush]);
      }
    }
    assert_eq!(sup.state(), ConnectionState::Reconnecting);
    assert_eq!(sup.attempt(), 1);
  }

  #[test]
  fn test_pull_failures_raise_connection_error() {
    let mut now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    sup.start(now);
    for _ in 0..6 {
      fail_and_wait(&mut sup, &mut now);
    }
    let err = FeedError::Fetch("503".to_string());
    sup.on_pull_failed(now, &err);
    sup.on_pull_failed(now, &err);
    assert!(!sup.connection_error());
    sup.on_pull_failed(now, &err);
    assert!(sup.connection_error());
    assert_eq!(sup.state(), ConnectionState::Degraded(Transport::Pull));

    sup.on_data(now, Transport::Pull);
    assert!(!sup.connection_error());
  }

  #[test]
  fn test_construction_failure_is_failed_then_retryable() {
    let now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    sup.start(now);
    let err = FeedError::Construction("bad url".to_string());
    assert!(sup.on_construction_failed(now, Transport::Push, &err).is_empty());
    assert_eq!(sup.state(), ConnectionState::Failed);
    assert_eq!(sup.pending_timers(), 0);

    assert_eq!(sup.retry(now), vec![Command::OpenPush]);
    assert_eq!(sup.state(), ConnectionState::Connecting);
  }

  #[test]
  fn test_probe_retries_push_while_degraded() {
    let mut now = Instant::now();
    let mut cfg = config();
    cfg.push_probe_interval_ms = 60_000;
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &cfg);
    sup.start(now);
    for _ in 0..6 {
      fail_and_wait(&mut sup, &mut now);
    }
    assert_eq!(sup.next_deadline(), Some(now + secs(60)));
    now += secs(60);
    assert_eq!(sup.on_timer(now), vec![Command::OpenPush]);
    assert!(sup.limited());
  }

  #[test]
  fn test_push_construction_failure_while_degraded_rearms_retry() {
    let mut now = Instant::now();
    let mut cfg = config();
    cfg.push_probe_interval_ms = 60_000;
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &cfg);
    sup.start(now);
    for _ in 0..6 {
      fail_and_wait(&mut sup, &mut now);
    }

    now += secs(60);
    assert_eq!(sup.on_timer(now), vec![Command::OpenPush]);
    let err = FeedError::Construction("bad url".to_string());
    assert!(sup.on_construction_failed(now, Transport::Push, &err).is_empty());

    assert_eq!(sup.state(), ConnectionState::Degraded(Transport::Pull));
    assert!(sup.limited());
    assert_eq!(sup.next_deadline(), Some(now + secs(60)));

    // The next push attempt still fires.
    now += secs(60);
    assert_eq!(sup.on_timer(now), vec![Command::OpenPush]);
  }

  #[test]
  fn test_teardown_from_every_state_leaves_nothing() {
    let mut now = Instant::now();
    let mut cfg = config();
    cfg.push_probe_interval_ms = 60_000;

    // Live
    let mut sup = ConnectionSupervisor::new("A", &cfg);
    sup.start(now);
    sup.on_push_opened(now);
    assert_eq!(sup.teardown(), vec![Command::ClosePush]);
    assert_eq!((sup.pending_timers(), sup.open_adapters()), (0, 0));

    // Reconnecting
    let mut sup = ConnectionSupervisor::new("B", &cfg);
    sup.start(now);
    sup.on_push_failed(now, &dropped());
    assert!(sup.teardown().is_empty());
    assert_eq!((sup.pending_timers(), sup.open_adapters()), (0, 0));

    // Degraded with a push probe in flight
    let mut sup = ConnectionSupervisor::new("C", &cfg);
    sup.start(now);
    for _ in 0..6 {
      fail_and_wait(&mut sup, &mut now);
    }
    sup.retry(now);
    assert_eq!(sup.teardown(), vec![Command::ClosePush, Command::ClosePull]);
    assert_eq!((sup.pending_timers(), sup.open_adapters()), (0, 0));
    assert_eq!(sup.state(), ConnectionState::Idle);
  }

  #[test]
  fn test_late_events_are_ignored() {
    let now = Instant::now();
    let mut sup = ConnectionSupervisor::new("BTC-USDT", &config());
    assert!(sup.on_push_opened(now).is_empty());
    assert!(sup.on_push_failed(now, &dropped()).is_empty());
    assert!(!sup.on_data(now, Transport::Push));
    assert_eq!(sup.state(), ConnectionState::Idle);
  }
}
