//! REST Order Executor - Adapter for the External Order Service
//!
//! Implements the `OrderExecution` port on top of the shared
//! `RestClient`. Submissions are rate limited client-side with a
//! `governor` quota so a misbehaving view cannot flood the backend.

use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::client::RestClient;
use crate::ports::execution::{OrderExecution, OrderOutcome, OrderRequest};

/// Order executor backed by the shared REST client.
pub struct RestOrderExecutor {
  client: Arc<RestClient>,
  limiter: DefaultDirectRateLimiter,
}

impl RestOrderExecutor {
  /// Create an executor allowing `max_orders_per_minute` submissions.
  pub fn new(client: Arc<RestClient>, max_orders_per_minute: u32) -> Self {
    let per_minute = NonZeroU32::new(max_orders_per_minute).unwrap_or(NonZeroU32::MIN);
    Self {
      client,
      limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
    }
  }

  /// Fresh idempotency key for a new order.
  pub fn client_order_id() -> String {
    uuid::Uuid::new_v4().to_string()
  }
}

/// Read the backend verdict. Unknown fields are ignored.
fn parse_outcome(response: &Value) -> OrderOutcome {
  let order_id = response
    .get("orderId")
    .or_else(|| response.get("order_id"))
    .and_then(|v| match v {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    });

  let success = response
    .get("success")
    .and_then(Value::as_bool)
    .unwrap_or(order_id.is_some());

  match (success, order_id) {
    (true, Some(order_id)) => OrderOutcome::Accepted { order_id },
    _ => OrderOutcome::Rejected {
      error: response
        .get("error")
        .or_else(|| response.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("order rejected without reason")
        .to_string(),
    },
  }
}

#[async_trait]
impl OrderExecution for RestOrderExecutor {
  #[instrument(skip(self, request), fields(instrument = %request.instrument_id, side = ?request.side, size = %request.size))]
  async fn submit_order(&self, request: &OrderRequest) -> Result<OrderOutcome> {
    if self.limiter.check().is_err() {
      warn!("Client-side order rate limit reached");
      return Ok(OrderOutcome::Rejected {
        error: "rate limit: too many orders this minute".to_string(),
      });
    }

    let response = self
      .client
      .post_json("/orders", request)
      .await
      .context("Failed to submit order")?;

    let outcome = parse_outcome(&response);
    match &outcome {
      OrderOutcome::Accepted { order_id } => info!(order_id = %order_id, "Order submitted"),
      OrderOutcome::Rejected { error } => warn!(reason = %error, "Order rejected by backend"),
    }
    Ok(outcome)
  }
}
