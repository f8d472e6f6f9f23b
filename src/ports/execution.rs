//! Order Execution Port - External Order Service Interface
//!
//! Order submission is owned by the remote trading backend. The book
//! synchronization core only needs to know whether an order went through,
//! so it can force a refresh of the affected book afterwards.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
  Buy,
  Sell,
}

/// Order type accepted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
  /// Rests on the book at `price`.
  Limit,
  /// Executes immediately against the book; `price` is ignored.
  Market,
}

/// Order submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
  /// Instrument to trade.
  pub instrument_id: String,
  /// Buy or Sell.
  pub side: OrderSide,
  /// Limit price; `None` for market orders.
  pub price: Option<Decimal>,
  /// Order size.
  pub size: Decimal,
  /// Limit or Market.
  pub order_type: OrderType,
  /// Idempotency key generated client-side.
  pub client_order_id: String,
}

/// Backend verdict on a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
  /// Order accepted under the backend's id.
  Accepted { order_id: String },
  /// Order refused with the backend's reason.
  Rejected { error: String },
}

impl OrderOutcome {
  /// True when the backend accepted the order.
  pub fn is_success(&self) -> bool {
    matches!(self, Self::Accepted { .. })
  }
}

/// Trait for order submission providers.
///
/// Transport errors come back as `Err`; business rejections as
/// `Ok(OrderOutcome::Rejected)`.
#[async_trait]
pub trait OrderExecution: Send + Sync + 'static {
  /// Submit a single order.
  async fn submit_order(&self, request: &OrderRequest) -> anyhow::Result<OrderOutcome>;
}
