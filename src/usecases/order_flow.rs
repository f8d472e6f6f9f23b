//! Order Flow - Submit Then Refresh
//!
//! Orders go to the external execution service; the only coupling to the
//! book is cache invalidation: an accepted order forces a one-shot pull
//! fetch so the view does not wait for the next push delta or pull tick.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::ports::execution::{OrderExecution, OrderOutcome, OrderRequest};

use super::subscription::Subscription;

/// Submit `request` and, if accepted, refresh `subscription`'s book.
///
/// Transport errors propagate; rejections are returned as outcomes and do
/// not trigger a refresh.
#[instrument(skip_all, fields(instrument = %request.instrument_id, client_order_id = %request.client_order_id))]
pub async fn submit_and_refresh<E>(
  execution: &E,
  subscription: &Subscription,
  request: &OrderRequest,
) -> Result<OrderOutcome>
where
  E: OrderExecution + ?Sized,
{
  if request.instrument_id != subscription.instrument_id() {
    warn!(
      book = subscription.instrument_id(),
      "Order instrument differs from the refreshed book"
    );
  }

  let outcome = execution.submit_order(request).await?;

  match &outcome {
    OrderOutcome::Accepted { order_id } => {
      info!(order_id = %order_id, "Order accepted, refreshing book");
      subscription.refresh();
    }
    OrderOutcome::Rejected { error } => {
      warn!(reason = %error, "Order rejected");
    }
  }

  Ok(outcome)
}
