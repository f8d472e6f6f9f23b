//! Integration Tests - Subscription Lifecycle End to End
//!
//! Drives real `Subscription` tasks through scripted fake feed adapters on
//! a paused tokio clock, so backoff, staleness and throttle timing are
//! deterministic. Uses mockall for the order execution port.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use orderbook_sync::config::{StaticCatalog, SupervisorConfig};
use orderbook_sync::domain::book::Side;
use orderbook_sync::domain::connection::{ConnectionState, FeedHealth, Transport};
use orderbook_sync::domain::normalizer::RawDepth;
use orderbook_sync::ports::execution::{OrderOutcome, OrderRequest, OrderSide, OrderType};
use orderbook_sync::ports::feed::{FeedAdapter, FeedError, FeedHandle, FeedRequest, FeedSink};
use orderbook_sync::ports::instruments::{InstrumentClass, InstrumentSpec};
use orderbook_sync::ports::telemetry::{NoopTelemetry, SyncTelemetry};
use orderbook_sync::usecases::order_flow::submit_and_refresh;
use orderbook_sync::usecases::subscription::{
    FeedPair, Subscription, SubscriptionManager, SyncSettings, TeardownReport,
};

// ---- Mock Definitions ----

mock! {
    pub OrderExec {}

    #[async_trait::async_trait]
    impl orderbook_sync::ports::execution::OrderExecution for OrderExec {
        async fn submit_order(&self, request: &OrderRequest) -> anyhow::Result<OrderOutcome>;
    }
}

/// Scripted adapter: records every session and lets the test speak for it.
struct FakeFeed {
    transport: Transport,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    sinks: Mutex<Vec<FeedSink>>,
    refuse: AtomicBool,
    refreshes: AtomicUsize,
    refresh_payload: Mutex<Option<RawDepth>>,
}

impl FakeFeed {
    fn new(transport: Transport) -> Arc<Self> {
        Arc::new(Self {
            transport,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            sinks: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            refresh_payload: Mutex::new(None),
        })
    }

    fn last_sink(&self) -> FeedSink {
        self.sinks.lock().unwrap().last().cloned().expect("no session opened")
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn open_sessions(&self) -> usize {
        self.opens() - self.closes.load(Ordering::SeqCst)
    }
}

impl FeedAdapter for FakeFeed {
    fn transport(&self) -> Transport {
        self.transport
    }

    fn open(&self, _request: &FeedRequest, sink: FeedSink) -> Result<FeedHandle, FeedError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FeedError::Construction("refused by test".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let id = sink.session();
        self.sinks.lock().unwrap().push(sink);
        let closes = Arc::clone(&self.closes);
        Ok(FeedHandle::new(id, tokio::spawn(std::future::pending::<()>())).on_close(move || {
            closes.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn fetch_once(&self, _request: &FeedRequest, sink: FeedSink) -> Result<FeedHandle, FeedError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let payload = self.refresh_payload.lock().unwrap().clone();
        let id = sink.session();
        Ok(FeedHandle::new(
            id,
            tokio::spawn(async move {
                if let Some(payload) = payload {
                    sink.data(payload);
                }
            }),
        ))
    }
}

struct Harness {
    push: Arc<FakeFeed>,
    pull: Arc<FakeFeed>,
    sub: Subscription,
}

fn supervisor_config() -> SupervisorConfig {
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

fn settings() -> SyncSettings {
    SyncSettings {
        supervisor: supervisor_config(),
        throttle: Duration::from_millis(200),
    }
}

fn pair(push: &Arc<FakeFeed>, pull: &Arc<FakeFeed>) -> FeedPair {
    FeedPair {
        push: Arc::clone(push) as Arc<dyn FeedAdapter>,
        pull: Arc::clone(pull) as Arc<dyn FeedAdapter>,
    }
}

fn harness(depth: usize) -> Harness {
    let push = FakeFeed::new(Transport::Push);
    let pull = FakeFeed::new(Transport::Pull);
    let request = FeedRequest {
        instrument_id: "BTC-USDT".into(),
        symbol: "BTCUSDT".into(),
        depth,
    };
    let sub = Subscription::spawn(request, pair(&push, &pull), &settings(), Arc::new(NoopTelemetry));
    Harness { push, pull, sub }
}

/// Let the subscription task drain its queues.
async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// `n` asks from 100 upwards and `n` bids from 99 downwards, shuffled.
fn book(n: usize, base: u32) -> RawDepth {
    let mut asks: Vec<_> = (0..n)
        .map(|i| json!([format!("{}", base + i as u32), "1.5", "ignored"]))
        .collect();
    asks.reverse();
    let bids = (0..n)
        .map(|i| json!([format!("{}", base - 1 - i as u32), "2"]))
        .collect();
    RawDepth { asks, bids }
}

async fn go_live(h: &Harness) {
    settle().await;
    assert!(h.push.last_sink().opened());
    settle().await;
    assert_eq!(h.sub.current_status().state, ConnectionState::Live);
}

/// Fail push until the subscription falls back; returns failures used.
async fn fail_until_degraded(h: &Harness) -> usize {
    let mut failures = 0;
    while h.sub.current_status().state != ConnectionState::Degraded(Transport::Pull) {
        assert!(failures < 10, "never degraded");
        h.push
            .last_sink()
            .failed(FeedError::Handshake("connection refused".into()));
        failures += 1;
        settle().await;
        if let Some(wait) = h.sub.current_status().retry_in {
            tokio::time::sleep(wait).await;
            settle().await;
        }
    }
    failures
}

// ---- Scenarios ----

#[tokio::test(start_paused = true)]
async fn test_live_snapshot_is_truncated_and_weighted() {
    let h = harness(8);
    go_live(&h).await;

    h.push.last_sink().data(book(20, 100));
    settle().await;

    let snapshot = h.sub.book().latest().expect("book populated");
    assert_eq!(snapshot.asks.len(), 8);
    assert_eq!(snapshot.real_levels(Side::Ask).count(), 8);
    assert_eq!(snapshot.best_ask().unwrap().price, dec!(100));
    assert_eq!(snapshot.best_bid().unwrap().price, dec!(99));

    let mut previous = Decimal::ZERO;
    for level in snapshot.asks.iter().chain(snapshot.bids.iter()) {
        assert!((1.0..=95.0).contains(&level.depth_weight));
    }
    for level in &snapshot.asks {
        assert!(level.cumulative_size >= previous);
        previous = level.cumulative_size;
    }
    assert_eq!(h.sub.current_status().health(), FeedHealth::Live);
}

#[tokio::test(start_paused = true)]
async fn test_six_failures_degrade_to_pull_and_retry_keeps_book() {
    let h = harness(8);
    go_live(&h).await;
    h.push.last_sink().data(book(10, 100));
    settle().await;
    let before = h.sub.book().latest().unwrap();

    let failures = fail_until_degraded(&h).await;
    assert_eq!(failures, 6);
    assert_eq!(h.pull.opens(), 1);
    assert_eq!(h.push.open_sessions(), 0);

    // Last known good book survives, tagged limited.
    let view = h.sub.book().view();
    assert!(view.limited);
    assert_eq!(view.snapshot.unwrap().sequence_id, before.sequence_id);
    assert_eq!(h.sub.current_status().health(), FeedHealth::Limited);

    // Pull keeps the book moving.
    h.pull.last_sink().data(book(10, 200));
    settle().await;
    assert_eq!(h.sub.book().latest().unwrap().best_ask().unwrap().price, dec!(200));

    // Manual retry goes back to Connecting without clearing anything.
    h.sub.retry();
    settle().await;
    assert_eq!(h.sub.current_status().state, ConnectionState::Connecting);
    assert_eq!(h.pull.open_sessions(), 1);
    assert_eq!(h.sub.book().latest().unwrap().best_ask().unwrap().price, dec!(200));

    // Push confirmed: pull is closed and the limited flag clears.
    h.push.last_sink().opened();
    settle().await;
    assert_eq!(h.sub.current_status().state, ConnectionState::Live);
    assert_eq!(h.pull.open_sessions(), 0);
    assert!(!h.sub.book().is_limited());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_reset_after_live() {
    let h = harness(5);
    settle().await;

    let mut delays = Vec::new();
    for _ in 0..3 {
        h.push.last_sink().failed(FeedError::HandshakeTimeout(Duration::from_secs(10)));
        settle().await;
        let wait = h.sub.current_status().retry_in.unwrap();
        delays.push(wait.as_secs_f64().round() as u64);
        tokio::time::sleep(wait).await;
        settle().await;
    }
    assert_eq!(delays, vec![1, 2, 4]);

    h.push.last_sink().opened();
    settle().await;
    h.push.last_sink().failed(FeedError::Dropped("reset by peer".into()));
    settle().await;
    let status = h.sub.current_status();
    assert_eq!(status.state, ConnectionState::Reconnecting);
    assert_eq!(status.retry_in.map(|d| d.as_secs_f64().round() as u64), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_silent_live_connection_is_reconnected() {
    let h = harness(5);
    go_live(&h).await;
    h.push.last_sink().data(book(5, 100));
    settle().await;

    // Watchdog fires every 5s; the fourth check sees 20s of silence.
    tokio::time::sleep(Duration::from_millis(20_500)).await;
    settle().await;

    let status = h.sub.current_status();
    assert_eq!(status.state, ConnectionState::Reconnecting);
    assert_eq!(h.push.open_sessions(), 0);
    assert!(h.sub.book().latest().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_late_events_from_closed_session_are_ignored() {
    let h = harness(5);
    go_live(&h).await;
    let stale_sink = h.push.last_sink();
    stale_sink.failed(FeedError::Dropped("eof".into()));
    settle().await;

    stale_sink.data(book(5, 500));
    settle().await;
    assert!(h.sub.book().latest().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_coalesced_to_latest() {
    let h = harness(3);
    go_live(&h).await;
    let mut book_rx = h.sub.book();

    for base in [100, 110, 120, 130] {
        h.push.last_sink().data(book(3, base));
    }
    settle().await;
    assert_eq!(h.sub.book().latest().unwrap().best_ask().unwrap().price, dec!(100));

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    let view = book_rx.changed().await.unwrap();
    assert_eq!(view.snapshot.unwrap().best_ask().unwrap().price, dec!(130));
}

#[tokio::test(start_paused = true)]
async fn test_pull_failures_surface_connection_error() {
    let h = harness(5);
    settle().await;
    fail_until_degraded(&h).await;

    for _ in 0..3 {
        h.pull.last_sink().failed(FeedError::Fetch("503".into()));
        settle().await;
    }
    let status = h.sub.current_status();
    assert!(status.connection_error);
    assert_eq!(status.state, ConnectionState::Degraded(Transport::Pull));

    h.pull.last_sink().data(book(5, 100));
    settle().await;
    assert!(!h.sub.current_status().connection_error);
}

#[tokio::test(start_paused = true)]
async fn test_construction_failure_is_failed_and_retryable() {
    let push = FakeFeed::new(Transport::Push);
    let pull = FakeFeed::new(Transport::Pull);
    push.refuse.store(true, Ordering::SeqCst);
    let request = FeedRequest {
        instrument_id: "ETH-USDT".into(),
        symbol: "ETHUSDT".into(),
        depth: 5,
    };
    let sub = Subscription::spawn(request, pair(&push, &pull), &settings(), Arc::new(NoopTelemetry));
    settle().await;

    let status = sub.current_status();
    assert_eq!(status.state, ConnectionState::Failed);
    assert_eq!(status.health(), FeedHealth::Failed);

    push.refuse.store(false, Ordering::SeqCst);
    sub.retry();
    settle().await;
    assert_eq!(sub.current_status().state, ConnectionState::Connecting);
    assert_eq!(push.opens(), 1);

    assert_eq!(sub.destroy().await, TeardownReport::default());
}

/// Counts fallback notifications only.
#[derive(Default)]
struct FallbackCounter {
    engaged: AtomicUsize,
}

impl SyncTelemetry for FallbackCounter {
    fn fallback_engaged(&self, _instrument: &str) {
        self.engaged.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fail push until the supervisor settles on pull or gives up.
async fn exhaust_push(push: &FakeFeed, sub: &Subscription) {
    for _ in 0..10 {
        let state = sub.current_status().state;
        if matches!(state, ConnectionState::Degraded(_) | ConnectionState::Failed) {
            return;
        }
        push.last_sink()
            .failed(FeedError::Handshake("connection refused".into()));
        settle().await;
        if let Some(wait) = sub.current_status().retry_in {
            tokio::time::sleep(wait).await;
            settle().await;
        }
    }
    panic!("push never exhausted");
}

#[tokio::test(start_paused = true)]
async fn test_fallback_reported_only_when_pull_opens() {
    let request = FeedRequest {
        instrument_id: "SOL-USDT".into(),
        symbol: "SOLUSDT".into(),
        depth: 5,
    };

    // Pull adapter refuses: no fallback was ever in effect.
    let push = FakeFeed::new(Transport::Push);
    let pull = FakeFeed::new(Transport::Pull);
    pull.refuse.store(true, Ordering::SeqCst);
    let telemetry = Arc::new(FallbackCounter::default());
    let sub = Subscription::spawn(
        request.clone(),
        pair(&push, &pull),
        &settings(),
        Arc::clone(&telemetry) as Arc<dyn SyncTelemetry>,
    );
    settle().await;
    exhaust_push(&push, &sub).await;
    assert_eq!(sub.current_status().state, ConnectionState::Failed);
    assert_eq!(pull.opens(), 0);
    assert_eq!(telemetry.engaged.load(Ordering::SeqCst), 0);
    assert_eq!(sub.destroy().await, TeardownReport::default());

    // Pull adapter opens: reported exactly once.
    let push = FakeFeed::new(Transport::Push);
    let pull = FakeFeed::new(Transport::Pull);
    let telemetry = Arc::new(FallbackCounter::default());
    let sub = Subscription::spawn(
        request,
        pair(&push, &pull),
        &settings(),
        Arc::clone(&telemetry) as Arc<dyn SyncTelemetry>,
    );
    settle().await;
    exhaust_push(&push, &sub).await;
    assert_eq!(sub.current_status().state, ConnectionState::Degraded(Transport::Pull));
    assert_eq!(pull.opens(), 1);
    assert_eq!(telemetry.engaged.load(Ordering::SeqCst), 1);
    assert_eq!(sub.destroy().await, TeardownReport::default());
}

#[tokio::test(start_paused = true)]
async fn test_destroy_leaves_nothing_in_any_state() {
    // Live
    let h = harness(5);
    go_live(&h).await;
    assert_eq!(h.sub.destroy().await, TeardownReport::default());
    assert_eq!(h.push.open_sessions(), 0);

    // Reconnecting, with a pending backoff timer
    let h = harness(5);
    settle().await;
    h.push.last_sink().failed(FeedError::Handshake("refused".into()));
    settle().await;
    assert_eq!(h.sub.current_status().state, ConnectionState::Reconnecting);
    assert_eq!(h.sub.destroy().await, TeardownReport::default());

    // Degraded with a push retry in flight and a throttled snapshot pending
    let h = harness(5);
    settle().await;
    fail_until_degraded(&h).await;
    h.pull.last_sink().data(book(5, 100));
    h.pull.last_sink().data(book(5, 101));
    h.sub.retry();
    settle().await;
    let push = Arc::clone(&h.push);
    let pull = Arc::clone(&h.pull);
    assert_eq!(h.sub.destroy().await, TeardownReport::default());
    assert_eq!(push.open_sessions(), 0);
    assert_eq!(pull.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_accepted_order_forces_refresh() {
    let h = harness(5);
    go_live(&h).await;
    *h.pull.refresh_payload.lock().unwrap() = Some(book(5, 300));

    let mut exec = MockOrderExec::new();
    exec.expect_submit_order()
        .times(1)
        .returning(|_| Ok(OrderOutcome::Accepted { order_id: "ord-1".into() }));

    let request = OrderRequest {
        instrument_id: "BTC-USDT".into(),
        side: OrderSide::Buy,
        price: Some(dec!(300)),
        size: dec!(0.5),
        order_type: OrderType::Limit,
        client_order_id: "c-1".into(),
    };
    let outcome = submit_and_refresh(&exec, &h.sub, &request).await.unwrap();
    assert!(outcome.is_success());
    settle().await;

    assert_eq!(h.pull.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(h.sub.book().latest().unwrap().best_ask().unwrap().price, dec!(300));
    // The one-shot fetch never counts as a pull fallback.
    assert!(!h.sub.book().is_limited());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_order_does_not_refresh() {
    let h = harness(5);
    go_live(&h).await;

    let mut exec = MockOrderExec::new();
    exec.expect_submit_order()
        .returning(|_| Ok(OrderOutcome::Rejected { error: "insufficient balance".into() }));

    let request = OrderRequest {
        instrument_id: "BTC-USDT".into(),
        side: OrderSide::Sell,
        price: None,
        size: dec!(1),
        order_type: OrderType::Market,
        client_order_id: "c-2".into(),
    };
    let outcome = submit_and_refresh(&exec, &h.sub, &request).await.unwrap();
    assert!(!outcome.is_success());
    settle().await;
    assert_eq!(h.pull.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_manager_replaces_subscription_on_instrument_change() {
    let spot_push = FakeFeed::new(Transport::Push);
    let spot_pull = FakeFeed::new(Transport::Pull);
    let catalog = StaticCatalog::new(vec![
        InstrumentSpec {
            id: "BTC-USDT".into(),
            symbol: "BTCUSDT".into(),
            class: InstrumentClass::Spot,
            depth: 8,
            price_precision: 2,
            size_precision: 4,
        },
        InstrumentSpec {
            id: "ETH-USDT".into(),
            symbol: "ETHUSDT".into(),
            class: InstrumentClass::Spot,
            depth: 8,
            price_precision: 2,
            size_precision: 4,
        },
        InstrumentSpec {
            id: "BTC-PERP".into(),
            symbol: "BTCUSDT".into(),
            class: InstrumentClass::Futures,
            depth: 8,
            price_precision: 1,
            size_precision: 3,
        },
    ]);

    let mut manager = SubscriptionManager::new(Arc::new(catalog), settings(), Arc::new(NoopTelemetry))
        .with_feeds(InstrumentClass::Spot, pair(&spot_push, &spot_pull));

    manager.mount("pane-1", "BTC-USDT").await.unwrap();
    settle().await;
    assert_eq!(spot_push.open_sessions(), 1);

    // Same instrument again is a no-op.
    manager.mount("pane-1", "BTC-USDT").await.unwrap();
    assert_eq!(spot_push.opens(), 1);

    // Instrument change tears the old subscription down first.
    let sub = manager.mount("pane-1", "ETH-USDT").await.unwrap();
    assert_eq!(sub.instrument_id(), "ETH-USDT");
    settle().await;
    assert_eq!(spot_push.opens(), 2);
    assert_eq!(spot_push.open_sessions(), 1);
    assert_eq!(manager.statuses().len(), 1);

    assert!(manager.mount("pane-2", "DOGE-USDT").await.is_err());
    assert!(manager.mount("pane-2", "BTC-PERP").await.is_err());

    let reports = manager.shutdown().await;
    assert_eq!(reports, vec![TeardownReport::default()]);
    assert_eq!(spot_push.open_sessions(), 0);
    assert!(manager.get("pane-1").is_none());
}
