//! Book Store - Single-Writer Latest Snapshot Holder
//!
//! Holds the most recent snapshot of one subscription plus the
//! reduced-freshness flag. Exactly one `BookStore` writes; any number of
//! `BookReader`s observe it through a `watch` channel, so readers always
//! see the newest value and never queue stale ones.
//!
//! The last good snapshot survives fallback: entering pull mode only flips
//! `limited`, it never clears the book.

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::book::OrderBookSnapshot;

/// What readers see: the newest snapshot and whether it comes from the
/// pull fallback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookView {
  pub snapshot: Option<Arc<OrderBookSnapshot>>,
  pub limited: bool,
}

/// Writer half.
#[derive(Debug)]
pub struct BookStore {
  tx: watch::Sender<BookView>,
}

/// Reader half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BookReader {
  rx: watch::Receiver<BookView>,
}

impl BookStore {
  /// Create an empty store and its first reader.
  pub fn new() -> (Self, BookReader) {
    let (tx, rx) = watch::channel(BookView::default());
    (Self { tx }, BookReader { rx })
  }

  /// Replace the current snapshot.
  pub fn publish(&self, snapshot: OrderBookSnapshot) {
    let snapshot = Arc::new(snapshot);
    self.tx.send_modify(|view| view.snapshot = Some(snapshot));
  }

  /// Update the reduced-freshness flag; readers are only woken on change.
  pub fn set_limited(&self, limited: bool) {
    self.tx.send_if_modified(|view| {
      let changed = view.limited != limited;
      view.limited = limited;
      changed
    });
  }

  /// Another reader over the same store.
  pub fn reader(&self) -> BookReader {
    BookReader {
      rx: self.tx.subscribe(),
    }
  }
}

impl BookReader {
  /// Newest snapshot, if one has been published.
  pub fn latest(&self) -> Option<Arc<OrderBookSnapshot>> {
    self.rx.borrow().snapshot.clone()
  }

  /// Snapshot and flag together.
  pub fn view(&self) -> BookView {
    self.rx.borrow().clone()
  }

  /// Whether data currently arrives through the pull fallback.
  pub fn is_limited(&self) -> bool {
    self.rx.borrow().limited
  }

  /// Wait for the next change and return it. `None` once the writer is gone.
  pub async fn changed(&mut self) -> Option<BookView> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().clone())
  }
}
