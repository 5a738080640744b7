//! Order status transitions.

use common::OrderStatus;
use store::OrderStore;

use crate::error::OrderError;

/// Applies validated status changes to the order store.
///
/// Used in-process and as the handler behind the payment service's
/// `UpdateStatus` call. The write is conditional on the status that was
/// validated, so a concurrent change can never be overwritten.
#[derive(Clone)]
pub struct StatusRelay<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> StatusRelay<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Moves the order to `new`.
    ///
    /// Returns `Ok(true)` if this call changed the row and `Ok(false)` if the
    /// order already had the requested status.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, order_no: &str, new: OrderStatus) -> Result<bool, OrderError> {
        self.apply(order_no, new).await.inspect_err(|e| {
            if !e.is_business() {
                tracing::error!(code = e.code(), error = %e, "status update failed");
            }
        })
    }

    async fn apply(&self, order_no: &str, new: OrderStatus) -> Result<bool, OrderError> {
        let current = self.current_status(order_no).await?;
        if current == new {
            tracing::debug!(%current, "status unchanged");
            return Ok(false);
        }
        if !current.can_transition_to(new) {
            tracing::warn!(from = %current, to = %new, "illegal status transition rejected");
            return Err(OrderError::IllegalStatusTransition { from: current, to: new });
        }

        if self.store.update_status_if(order_no, current, new).await? {
            metrics::counter!("order_status_updates_total", "status" => new.as_str()).increment(1);
            tracing::info!(from = %current, to = %new, "order status updated");
            return Ok(true);
        }

        // Lost a race with another writer; report against what it left behind.
        let observed = self.current_status(order_no).await?;
        if observed == new {
            Ok(false)
        } else {
            tracing::warn!(from = %observed, to = %new, "status changed concurrently");
            Err(OrderError::IllegalStatusTransition {
                from: observed,
                to: new,
            })
        }
    }

    /// Parses `status` case-insensitively and applies it.
    pub async fn update_status_str(&self, order_no: &str, status: &str) -> Result<bool, OrderError> {
        let new = status
            .parse::<OrderStatus>()
            .map_err(|e| OrderError::InvalidParams(e.to_string()))?;
        self.update_status(order_no, new).await
    }

    async fn current_status(&self, order_no: &str) -> Result<OrderStatus, OrderError> {
        self.store
            .find_order(order_no)
            .await?
            .map(|order| order.status)
            .ok_or_else(|| OrderError::OrderNotFound(order_no.to_string()))
    }
}
