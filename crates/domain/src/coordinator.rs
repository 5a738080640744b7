//! Order transaction coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{OrderStatus, ProductId, UserId};
use serde::{Deserialize, Serialize};
use store::{NewOrder, Order, OrderStore, StoreTransaction};

use crate::cart::CartReconcilerHandle;
use crate::error::OrderError;
use crate::order_number::OrderNumberSource;
use crate::reservation::reserve;

/// One requested line of a create-order call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Limits applied to every create-order call.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for the whole transaction, lock waits included.
    pub request_timeout: Duration,
    /// Maximum number of lines in one request.
    pub max_lines: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            max_lines: 100,
        }
    }
}

/// Creates orders atomically and hands the cart off for cleanup.
///
/// Reservation, pricing, numbering and the order insert share one store
/// transaction; any failure drops it, which rolls everything back.
pub struct OrderCoordinator<S: OrderStore> {
    store: S,
    order_numbers: Arc<dyn OrderNumberSource>,
    cart: CartReconcilerHandle,
    config: CoordinatorConfig,
}

impl<S> OrderCoordinator<S>
where
    S: OrderStore + Clone,
{
    pub fn new(
        store: S,
        order_numbers: Arc<dyn OrderNumberSource>,
        cart: CartReconcilerHandle,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            order_numbers,
            cart,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates an `unpaid` order for `user_id`.
    ///
    /// On success the user's cart is queued for clearing; that step never
    /// affects the returned order.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn create_order(
        &self,
        user_id: UserId,
        items: &[OrderLine],
    ) -> Result<Order, OrderError> {
        let started = Instant::now();
        let result = match self.validate(items) {
            Ok(lines) => {
                match tokio::time::timeout(
                    self.config.request_timeout,
                    self.run_transaction(user_id, &lines),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(OrderError::SystemBusy),
                }
            }
            Err(e) => Err(e),
        };
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(order) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(
                    order_no = %order.order_no,
                    amount = %order.amount,
                    "order created"
                );
                self.cart.submit(user_id);
                Ok(order)
            }
            Err(e) => {
                metrics::counter!("orders_failed_total", "code" => e.code()).increment(1);
                if e.is_business() {
                    tracing::info!(code = e.code(), error = %e, "order rejected");
                } else if matches!(e, OrderError::SystemBusy) {
                    tracing::warn!(?items, code = e.code(), "order aborted: system busy");
                } else {
                    tracing::error!(?items, code = e.code(), error = %e, "order creation failed");
                }
                Err(e)
            }
        }
    }

    /// Loads an order by its order number.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_no: &str) -> Result<Order, OrderError> {
        self.store
            .find_order(order_no)
            .await
            .map_err(OrderError::from)
            .inspect_err(|e| tracing::error!(code = e.code(), error = %e, "order lookup failed"))?
            .ok_or_else(|| OrderError::OrderNotFound(order_no.to_string()))
    }

    fn validate(&self, items: &[OrderLine]) -> Result<Vec<(ProductId, u32)>, OrderError> {
        if items.is_empty() {
            return Err(OrderError::InvalidParams("items must not be empty".into()));
        }
        if items.len() > self.config.max_lines {
            return Err(OrderError::InvalidParams(format!(
                "at most {} lines per order",
                self.config.max_lines
            )));
        }
        items
            .iter()
            .map(|line| {
                u32::try_from(line.quantity)
                    .ok()
                    .filter(|q| *q > 0 && i32::try_from(*q).is_ok())
                    .map(|q| (line.product_id, q))
                    .ok_or_else(|| {
                        OrderError::InvalidParams(format!(
                            "quantity for product {} must be positive, got {}",
                            line.product_id, line.quantity
                        ))
                    })
            })
            .collect()
    }

    async fn run_transaction(
        &self,
        user_id: UserId,
        lines: &[(ProductId, u32)],
    ) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;

        let reservation = reserve(&mut tx, lines).await?;
        let amount = reservation
            .total()
            .ok_or_else(|| OrderError::InvalidParams("order amount overflows".into()))?;
        let order_no = self.order_numbers.generate()?;

        let order = tx
            .insert_order(NewOrder {
                order_no: order_no.into_string(),
                user_id,
                amount,
                items: reservation.lines,
                status: OrderStatus::Unpaid,
            })
            .await?;
        tx.commit().await?;

        Ok(order)
    }
}
