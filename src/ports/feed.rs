//! Feed Port - Uniform Raw Depth Source Interface
//!
//! A `FeedAdapter` wraps one upstream transport (push socket or pull
//! endpoint) and reports everything through a `FeedSink`: handshake
//! confirmation, raw depth updates and failures. Adapters never throw into
//! the caller's loop; they run on their own task and are stopped by closing
//! (or dropping) the returned `FeedHandle`.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::connection::Transport;
use crate::domain::normalizer::RawDepth;

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
  /// Internal instrument identifier.
  pub instrument_id: String,
  /// Venue symbol (e.g. `BTCUSDT`).
  pub symbol: String,
  /// Levels per side the venue should send.
  pub depth: usize,
}

/// Identifies one opened adapter session, so late events from a session
/// that has since been closed can be told apart and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Feed boundary errors.
///
/// Handshake failures and mid-session drops are separate variants so the
/// supervisor can apply a different retry policy to each.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
  #[error("handshake failed: {0}")]
  Handshake(String),

  #[error("handshake timed out after {0:?}")]
  HandshakeTimeout(Duration),

  #[error("connection dropped: {0}")]
  Dropped(String),

  #[error("snapshot fetch failed: {0}")]
  Fetch(String),

  #[error("adapter construction failed: {0}")]
  Construction(String),

  #[error("{0} is not supported by this adapter")]
  Unsupported(&'static str),
}

impl FeedError {
  /// The session never got established.
  pub fn is_handshake(&self) -> bool {
    matches!(self, Self::Handshake(_) | Self::HandshakeTimeout(_))
  }

  /// Stable label for the reconnect-reason metric.
  pub fn reason(&self) -> &'static str {
    match self {
      Self::Handshake(_) => "handshake",
      Self::HandshakeTimeout(_) => "handshake_timeout",
      Self::Dropped(_) => "dropped",
      Self::Fetch(_) => "fetch",
      Self::Construction(_) => "construction",
      Self::Unsupported(_) => "unsupported",
    }
  }
}

/// Event emitted by an adapter session.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEventKind {
  /// Handshake confirmed (push) or fetch loop started (pull).
  Opened,
  /// One raw depth update.
  Data(RawDepth),
  /// Session failure; for pull adapters the loop keeps running.
  Failed(FeedError),
}

/// Event tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEvent {
  pub session: SessionId,
  pub transport: Transport,
  pub kind: FeedEventKind,
}

/// Callback side of an adapter session.
#[derive(Debug, Clone)]
pub struct FeedSink {
  session: SessionId,
  transport: Transport,
  tx: mpsc::UnboundedSender<FeedEvent>,
}

impl FeedSink {
  /// Bind a sink to one session.
  pub fn new(
    session: SessionId,
    transport: Transport,
    tx: mpsc::UnboundedSender<FeedEvent>,
  ) -> Self {
    Self { session, transport, tx }
  }

  /// Session this sink reports for.
  pub fn session(&self) -> SessionId {
    self.session
  }

  /// Report handshake confirmation. Returns false once nobody listens.
  pub fn opened(&self) -> bool {
    self.emit(FeedEventKind::Opened)
  }

  /// Report a raw depth update.
  pub fn data(&self, depth: RawDepth) -> bool {
    self.emit(FeedEventKind::Data(depth))
  }

  /// Report a failure.
  pub fn failed(&self, error: FeedError) -> bool {
    self.emit(FeedEventKind::Failed(error))
  }

  /// True once the subscription side has gone away.
  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  fn emit(&self, kind: FeedEventKind) -> bool {
    self.tx
      .send(FeedEvent {
        session: self.session,
        transport: self.transport,
        kind,
      })
      .is_ok()
  }
}

/// Owner of a running adapter session. Closing or dropping it stops the
/// session's task.
pub struct FeedHandle {
  session: SessionId,
  task: Option<JoinHandle<()>>,
  on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedHandle {
  /// Wrap the task driving a session.
  pub fn new(session: SessionId, task: JoinHandle<()>) -> Self {
    Self {
      session,
      task: Some(task),
      on_close: None,
    }
  }

  /// Run `hook` exactly once when the handle is closed or dropped.
  #[must_use]
  pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
    self.on_close = Some(Box::new(hook));
    self
  }

  /// Session this handle owns.
  pub fn session(&self) -> SessionId {
    self.session
  }

  /// Stop the session now.
  pub fn close(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
    if let Some(hook) = self.on_close.take() {
      hook();
    }
  }
}

impl Drop for FeedHandle {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl std::fmt::Debug for FeedHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FeedHandle")
      .field("session", &self.session)
      .field("running", &self.task.is_some())
      .finish()
  }
}

/// One upstream transport for raw depth.
///
/// `open` must be called from within a tokio runtime: implementations spawn
/// the session task and return immediately. An `Err` means the adapter
/// could not be constructed at all; asynchronous failures arrive through
/// the sink instead.
pub trait FeedAdapter: Send + Sync + 'static {
  /// Push or pull.
  fn transport(&self) -> Transport;

  /// Start a session for `request`, reporting through `sink`.
  fn open(&self, request: &FeedRequest, sink: FeedSink) -> Result<FeedHandle, FeedError>;

  /// Fetch a single snapshot outside the regular session (forced refresh).
  fn fetch_once(&self, _request: &FeedRequest, _sink: FeedSink) -> Result<FeedHandle, FeedError> {
    Err(FeedError::Unsupported("one-shot fetch"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn test_close_hook_runs_once() {
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closed);
    let handle = FeedHandle::new(SessionId(1), tokio::spawn(async {}))
      .on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
      });
    handle.close();
    assert_eq!(closed.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_sink_reports_closed_receiver() {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = FeedSink::new(SessionId(7), Transport::Push, tx);
    assert!(sink.opened());
    drop(rx);
    assert!(sink.is_closed());
    assert!(!sink.data(RawDepth::default()));
  }

  #[test]
  fn test_error_classification() {
    assert!(FeedError::HandshakeTimeout(Duration::from_secs(10)).is_handshake());
    assert!(!FeedError::Dropped("eof".into()).is_handshake());
    assert_eq!(FeedError::Fetch("503".into()).reason(), "fetch");
  }
}
