//! Subscription - Per-Instrument Sync Task
//!
//! One `Subscription` exists per mounted trading view. It spawns a task
//! that owns everything for that instrument:
//! - `ConnectionSupervisor` deciding which adapter is open
//! - the push and pull `FeedAdapter` sessions
//! - `DepthNormalizer` and `UpdateThrottler`
//! - the writer half of the `BookStore`
//!
//! The task is event driven: a biased `tokio::select!` over control
//! messages, adapter events and the earliest supervisor/throttler
//! deadline. Nothing is shared across subscriptions.
//!
//! Destroying the subscription closes every session and cancels every
//! timer before the task returns its `TeardownReport`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::SupervisorConfig;
use crate::domain::book::OrderBookSnapshot;
use crate::domain::connection::{ConnectionState, SubscriptionStatus, Transport};
use crate::domain::normalizer::{DepthNormalizer, RawDepth};
use crate::ports::feed::{FeedAdapter, FeedError, FeedEvent, FeedEventKind, FeedHandle, FeedRequest, FeedSink, SessionId};
use crate::ports::instruments::{InstrumentCatalog, InstrumentClass};
use crate::ports::telemetry::{StatusSource, SyncTelemetry};

use super::book_store::{BookReader, BookStore};
use super::supervisor::{Command, ConnectionSupervisor};
use super::throttler::UpdateThrottler;

/// Push and pull adapters serving one instrument class.
#[derive(Clone)]
pub struct FeedPair {
  pub push: Arc<dyn FeedAdapter>,
  pub pull: Arc<dyn FeedAdapter>,
}

/// Timing shared by every subscription.
#[derive(Debug, Clone)]
pub struct SyncSettings {
  pub supervisor: SupervisorConfig,
  /// Minimum spacing between book store writes.
  pub throttle: Duration,
}

/// What was still alive after teardown. Both counts are zero on a clean
/// destroy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
  pub pending_timers: usize,
  pub open_sessions: usize,
}

#[derive(Debug)]
enum Control {
  Retry,
  Refresh,
  Shutdown,
}

/// Handle to a running subscription.
///
/// Dropping it stops the task; `destroy()` additionally waits for teardown
/// and reports what was left.
#[derive(Debug)]
pub struct Subscription {
  instrument_id: String,
  control: mpsc::UnboundedSender<Control>,
  book: BookReader,
  status: watch::Receiver<SubscriptionStatus>,
  task: Option<JoinHandle<TeardownReport>>,
}

impl Subscription {
  /// Start synchronizing `request` through `feeds`.
  ///
  /// Must be called inside a tokio runtime.
  pub fn spawn(
    request: FeedRequest,
    feeds: FeedPair,
    settings: &SyncSettings,
    telemetry: Arc<dyn SyncTelemetry>,
  ) -> Self {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (store, book) = BookStore::new();
    let (status_tx, status) = watch::channel(SubscriptionStatus::idle(&request.instrument_id));

    let instrument_id = request.instrument_id.clone();
    let task = SyncTask {
      supervisor: ConnectionSupervisor::new(&request.instrument_id, &settings.supervisor),
      normalizer: DepthNormalizer::new(&request.instrument_id, request.depth),
      throttler: UpdateThrottler::new(settings.throttle),
      request,
      feeds,
      store,
      status_tx,
      telemetry,
      events_tx,
      next_session: 0,
      push: None,
      pull: None,
      refresh: None,
      last_data_at: None,
      reported_state: ConnectionState::Idle,
    };

    let task = tokio::spawn(task.run(control_rx, events_rx));

    Self {
      instrument_id,
      control: control_tx,
      book,
      status,
      task: Some(task),
    }
  }

  pub fn instrument_id(&self) -> &str {
    &self.instrument_id
  }

  /// Reader over this subscription's book.
  pub fn book(&self) -> BookReader {
    self.book.clone()
  }

  /// Status change notifications.
  pub fn status(&self) -> watch::Receiver<SubscriptionStatus> {
    self.status.clone()
  }

  /// Latest published status.
  pub fn current_status(&self) -> SubscriptionStatus {
    self.status.borrow().clone()
  }

  /// Ask the supervisor to retry push (from Reconnecting, Degraded or Failed).
  pub fn retry(&self) {
    let _ = self.control.send(Control::Retry);
  }

  /// Force a one-shot snapshot fetch, e.g. after an order fill.
  pub fn refresh(&self) {
    let _ = self.control.send(Control::Refresh);
  }

  /// Stop synchronizing and wait for teardown.
  pub async fn destroy(mut self) -> TeardownReport {
    let _ = self.control.send(Control::Shutdown);
    let Some(task) = self.task.take() else {
      return TeardownReport::default();
    };
    match task.await {
      Ok(report) => report,
      Err(e) => {
        warn!(instrument = %self.instrument_id, error = %e, "Subscription task ended abnormally");
        TeardownReport::default()
      }
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    // The task tears itself down once it sees the shutdown or the closed
    // control channel.
    if self.task.is_some() {
      let _ = self.control.send(Control::Shutdown);
    }
  }
}

// ── Sync task ───────────────────────────────────────────

struct SyncTask {
  request: FeedRequest,
  feeds: FeedPair,
  supervisor: ConnectionSupervisor,
  normalizer: DepthNormalizer,
  throttler: UpdateThrottler<OrderBookSnapshot>,
  store: BookStore,
  status_tx: watch::Sender<SubscriptionStatus>,
  telemetry: Arc<dyn SyncTelemetry>,
  events_tx: mpsc::UnboundedSender<FeedEvent>,
  next_session: u64,
  push: Option<FeedHandle>,
  pull: Option<FeedHandle>,
  refresh: Option<FeedHandle>,
  last_data_at: Option<DateTime<Utc>>,
  reported_state: ConnectionState,
}

impl SyncTask {
  #[instrument(skip_all, fields(instrument = %self.request.instrument_id))]
  async fn run(
    mut self,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    mut events_rx: mpsc::UnboundedReceiver<FeedEvent>,
  ) -> TeardownReport {
    let commands = self.supervisor.start(Instant::now());
    self.execute(commands);
    self.publish_status();

    loop {
      let deadline = self.next_deadline();

      tokio::select! {
        biased;

        control = control_rx.recv() => match control {
          Some(Control::Retry) => {
            let commands = self.supervisor.retry(Instant::now());
            self.execute(commands);
          }
          Some(Control::Refresh) => self.start_refresh(),
          Some(Control::Shutdown) | None => break,
        },

        Some(event) = events_rx.recv() => self.handle_event(event),

        () = sleep_until(deadline) => self.on_deadline(),
      }

      self.publish_status();
    }

    self.teardown()
  }

  fn next_deadline(&self) -> Option<Instant> {
    match (self.supervisor.next_deadline(), self.throttler.next_deadline()) {
      (Some(a), Some(b)) => Some(a.min(b)),
      (a, b) => a.or(b),
    }
  }

  fn on_deadline(&mut self) {
    let now = Instant::now();
    let commands = self.supervisor.on_timer(now);
    self.execute(commands);
    if let Some(snapshot) = self.throttler.poll_due(now) {
      self.write(snapshot);
    }
  }

  // ── Adapter sessions ──

  fn execute(&mut self, commands: Vec<Command>) {
    let mut queue = std::collections::VecDeque::from(commands);
    while let Some(command) = queue.pop_front() {
      match command {
        Command::OpenPush => {
          // Close before open: never two push sessions at once.
          self.push = None;
          match self.open(Transport::Push) {
            Ok(handle) => self.push = Some(handle),
            Err(e) => {
              let commands = self.supervisor.on_construction_failed(Instant::now(), Transport::Push, &e);
              queue.extend(commands);
            }
          }
        }
        Command::OpenPull => {
          self.pull = None;
          match self.open(Transport::Pull) {
            Ok(handle) => {
              self.telemetry.fallback_engaged(&self.request.instrument_id);
              self.pull = Some(handle);
            }
            Err(e) => {
              let commands = self.supervisor.on_construction_failed(Instant::now(), Transport::Pull, &e);
              queue.extend(commands);
            }
          }
        }
        Command::ClosePush => {
          if let Some(handle) = self.push.take() {
            debug!(session = handle.session().0, "Closing push session");
            handle.close();
          }
        }
        Command::ClosePull => {
          if let Some(handle) = self.pull.take() {
            debug!(session = handle.session().0, "Closing pull session");
            handle.close();
          }
        }
      }
    }
  }

  fn open(&mut self, transport: Transport) -> Result<FeedHandle, FeedError> {
    let sink = self.sink(transport);
    match transport {
      Transport::Push => self.feeds.push.open(&self.request, sink),
      Transport::Pull => self.feeds.pull.open(&self.request, sink),
    }
  }

  fn sink(&mut self, transport: Transport) -> FeedSink {
    self.next_session += 1;
    FeedSink::new(SessionId(self.next_session), transport, self.events_tx.clone())
  }

  fn start_refresh(&mut self) {
    if self.refresh.is_some() {
      debug!("Refresh already in flight");
      return;
    }
    let sink = self.sink(Transport::Pull);
    match self.feeds.pull.fetch_once(&self.request, sink) {
      Ok(handle) => self.refresh = Some(handle),
      Err(e) => debug!(error = %e, "Forced refresh unavailable"),
    }
  }

  // ── Events ──

  fn handle_event(&mut self, event: FeedEvent) {
    let now = Instant::now();
    let session = Some(event.session);

    if session == self.refresh.as_ref().map(FeedHandle::session) {
      self.handle_refresh(event.kind, now);
      return;
    }

    let current = match event.transport {
      Transport::Push => self.push.as_ref().map(FeedHandle::session),
      Transport::Pull => self.pull.as_ref().map(FeedHandle::session),
    };
    if session != current {
      debug!(session = event.session.0, transport = %event.transport, "Discarding event from closed session");
      self.telemetry.message_discarded(&self.request.instrument_id);
      return;
    }

    match (event.transport, event.kind) {
      (Transport::Push, FeedEventKind::Opened) => {
        let commands = self.supervisor.on_push_opened(now);
        self.execute(commands);
      }
      (Transport::Pull, FeedEventKind::Opened) => {
        info!("Pull fallback running");
      }
      (transport, FeedEventKind::Data(raw)) => {
        if self.supervisor.on_data(now, transport) {
          self.ingest(&raw, now);
        } else {
          self.telemetry.message_discarded(&self.request.instrument_id);
        }
      }
      (Transport::Push, FeedEventKind::Failed(error)) => {
        self.telemetry.push_lost(&self.request.instrument_id, error.reason());
        let commands = self.supervisor.on_push_failed(now, &error);
        self.execute(commands);
      }
      (Transport::Pull, FeedEventKind::Failed(error)) => {
        self.telemetry.pull_failed(&self.request.instrument_id);
        self.supervisor.on_pull_failed(now, &error);
      }
    }
  }

  fn handle_refresh(&mut self, kind: FeedEventKind, now: Instant) {
    match kind {
      FeedEventKind::Opened => {}
      FeedEventKind::Data(raw) => {
        self.refresh = None;
        self.ingest(&raw, now);
      }
      FeedEventKind::Failed(error) => {
        self.refresh = None;
        warn!(error = %error, "Forced refresh failed");
      }
    }
  }

  /// Normalize → throttle → store.
  fn ingest(&mut self, raw: &RawDepth, now: Instant) {
    let captured_at = Utc::now();
    let normalized = self.normalizer.normalize(raw, captured_at);
    self.last_data_at = Some(captured_at);

    if normalized.dropped_levels > 0 {
      debug!(dropped = normalized.dropped_levels, "Dropped malformed levels");
      self
        .telemetry
        .levels_dropped(&self.request.instrument_id, normalized.dropped_levels);
    }
    if normalized.snapshot.is_crossed() {
      debug!(sequence = normalized.snapshot.sequence_id, "Crossed book received");
    }

    let coalesced_before = self.throttler.coalesced();
    let released = self.throttler.submit(normalized.snapshot, now);
    if self.throttler.coalesced() > coalesced_before {
      self.telemetry.snapshot_coalesced(&self.request.instrument_id);
    }
    if let Some(snapshot) = released {
      self.write(snapshot);
    }
  }

  fn write(&self, snapshot: OrderBookSnapshot) {
    self.store.publish(snapshot);
    self.telemetry.snapshot_published(&self.request.instrument_id);
  }

  // ── Status ──

  fn publish_status(&mut self) {
    let state = self.supervisor.state();
    if state != self.reported_state {
      self.reported_state = state;
      self.telemetry.state_changed(&self.request.instrument_id, state);
    }

    self.store.set_limited(self.supervisor.limited());

    let next = SubscriptionStatus {
      instrument_id: self.request.instrument_id.clone(),
      state,
      attempt: self.supervisor.attempt(),
      limited: self.supervisor.limited(),
      connection_error: self.supervisor.connection_error(),
      last_data_at: self.last_data_at,
      retry_in: self.supervisor.retry_in(Instant::now()),
    };
    self.status_tx.send_if_modified(|current| {
      let retry_changed = current.retry_in.is_some() != next.retry_in.is_some();
      let changed = retry_changed
        || current.state != next.state
        || current.attempt != next.attempt
        || current.limited != next.limited
        || current.connection_error != next.connection_error
        || current.last_data_at != next.last_data_at;
      *current = next;
      changed
    });
  }

  fn teardown(mut self) -> TeardownReport {
    let commands = self.supervisor.teardown();
    self.execute(commands);
    if let Some(handle) = self.refresh.take() {
      handle.close();
    }
    self.throttler.cancel();
    self.publish_status();

    let report = TeardownReport {
      pending_timers: self.supervisor.pending_timers()
        + usize::from(self.throttler.next_deadline().is_some()),
      open_sessions: [&self.push, &self.pull, &self.refresh]
        .iter()
        .filter(|h| h.is_some())
        .count(),
    };
    info!(
      pending_timers = report.pending_timers,
      open_sessions = report.open_sessions,
      "Subscription torn down"
    );
    report
  }
}

async fn sleep_until(deadline: Option<Instant>) {
  match deadline {
    Some(at) => tokio::time::sleep_until(at).await,
    None => std::future::pending().await,
  }
}

// ── Manager ─────────────────────────────────────────────

/// Read-only view over every live subscription's status, shared with the
/// health server.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
  inner: Arc<RwLock<HashMap<String, watch::Receiver<SubscriptionStatus>>>>,
}

impl StatusBoard {
  /// Status of every registered view, sorted by view id.
  pub fn snapshot(&self) -> Vec<SubscriptionStatus> {
    let Ok(map) = self.inner.read() else {
      return Vec::new();
    };
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter().map(|(_, rx)| rx.borrow().clone()).collect()
  }

  fn insert(&self, view: &str, rx: watch::Receiver<SubscriptionStatus>) {
    if let Ok(mut map) = self.inner.write() {
      map.insert(view.to_string(), rx);
    }
  }

  fn remove(&self, view: &str) {
    if let Ok(mut map) = self.inner.write() {
      map.remove(view);
    }
  }
}

impl StatusSource for StatusBoard {
  fn statuses(&self) -> Vec<SubscriptionStatus> {
    self.snapshot()
  }
}

/// Creates, replaces and destroys subscriptions for trading views.
///
/// Each view owns at most one subscription. Mounting a view on another
/// instrument destroys the old subscription before the new one starts.
pub struct SubscriptionManager {
  catalog: Arc<dyn InstrumentCatalog>,
  feeds: HashMap<InstrumentClass, FeedPair>,
  settings: SyncSettings,
  telemetry: Arc<dyn SyncTelemetry>,
  views: HashMap<String, Subscription>,
  board: StatusBoard,
}

impl SubscriptionManager {
  pub fn new(
    catalog: Arc<dyn InstrumentCatalog>,
    settings: SyncSettings,
    telemetry: Arc<dyn SyncTelemetry>,
  ) -> Self {
    Self {
      catalog,
      feeds: HashMap::new(),
      settings,
      telemetry,
      views: HashMap::new(),
      board: StatusBoard::default(),
    }
  }

  /// Register the adapters serving an instrument class.
  #[must_use]
  pub fn with_feeds(mut self, class: InstrumentClass, feeds: FeedPair) -> Self {
    self.feeds.insert(class, feeds);
    self
  }

  /// Shared status view for health endpoints.
  pub fn board(&self) -> StatusBoard {
    self.board.clone()
  }

  /// Bind `view` to `instrument_id`, creating or replacing its subscription.
  ///
  /// # Errors
  /// Unknown instrument, or no adapters registered for its class.
  pub async fn mount(&mut self, view: &str, instrument_id: &str) -> Result<&Subscription> {
    if self
      .views
      .get(view)
      .is_some_and(|s| s.instrument_id() != instrument_id)
    {
      info!(view, instrument = instrument_id, "Instrument changed, replacing subscription");
      self.unmount(view).await;
    }

    if !self.views.contains_key(view) {
      let spec = self
        .catalog
        .instrument(instrument_id)
        .with_context(|| format!("Unknown instrument: {instrument_id}"))?;
      let feeds = self
        .feeds
        .get(&spec.class)
        .cloned()
        .with_context(|| format!("No feed adapters registered for {} instruments", spec.class))?;

      let request = FeedRequest {
        instrument_id: spec.id.clone(),
        symbol: spec.symbol.clone(),
        depth: spec.depth,
      };
      let subscription = Subscription::spawn(request, feeds, &self.settings, Arc::clone(&self.telemetry));
      self.board.insert(view, subscription.status());
      info!(view, instrument = %spec.id, class = %spec.class, depth = spec.depth, "Subscription created");
      self.views.insert(view.to_string(), subscription);
    }

    self
      .views
      .get(view)
      .with_context(|| format!("View {view} has no subscription"))
  }

  /// Destroy the subscription of `view`, if any.
  pub async fn unmount(&mut self, view: &str) -> Option<TeardownReport> {
    let subscription = self.views.remove(view)?;
    self.board.remove(view);
    let report = subscription.destroy().await;
    if report != TeardownReport::default() {
      warn!(view, ?report, "Subscription left resources behind");
    }
    Some(report)
  }

  /// Subscription currently bound to `view`.
  pub fn get(&self, view: &str) -> Option<&Subscription> {
    self.views.get(view)
  }

  /// Status of every subscription.
  pub fn statuses(&self) -> Vec<SubscriptionStatus> {
    self.board.snapshot()
  }

  /// Destroy every subscription.
  pub async fn shutdown(&mut self) -> Vec<TeardownReport> {
    let views: Vec<String> = self.views.keys().cloned().collect();
    let mut reports = Vec::with_capacity(views.len());
    for view in views {
      if let Some(report) = self.unmount(&view).await {
        reports.push(report);
      }
    }
    info!(count = reports.len(), "All subscriptions destroyed");
    reports
  }
}
