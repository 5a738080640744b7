//! Stock reservation inside the caller's transaction.

use std::collections::BTreeMap;

use common::{LineItem, Money, ProductId};
use store::{StoreError, StoreTransaction};

use crate::error::OrderError;

/// Lines reserved by [`reserve`], priced from the locked rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub lines: Vec<LineItem>,
}

impl Reservation {
    /// Returns Σ(unit price × quantity), or `None` on overflow.
    pub fn total(&self) -> Option<Money> {
        self.lines.iter().try_fold(Money::zero(), |acc, line| {
            acc.checked_add(line.total_price()?)
        })
    }

    /// Returns the total number of units reserved.
    pub fn units(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

/// Merges repeated products and orders lines by ascending product id, the
/// lock order every caller shares.
pub fn lock_order(items: &[(ProductId, u32)]) -> Result<Vec<(ProductId, u32)>, OrderError> {
    let mut merged: BTreeMap<ProductId, u64> = BTreeMap::new();
    for &(product_id, quantity) in items {
        *merged.entry(product_id).or_default() += u64::from(quantity);
    }
    merged
        .into_iter()
        .map(|(product_id, quantity)| {
            u32::try_from(quantity)
                .ok()
                .filter(|q| i32::try_from(*q).is_ok())
                .map(|q| (product_id, q))
                .ok_or_else(|| {
                    OrderError::InvalidParams(format!(
                        "quantity for product {product_id} exceeds the allowed maximum"
                    ))
                })
        })
        .collect()
}

/// Locks each referenced product row, verifies stock and decrements it.
///
/// Rows are locked in ascending product id order so that two orders touching
/// overlapping products cannot deadlock. On any error the caller must drop or
/// roll back `tx`; nothing reserved so far survives that.
#[tracing::instrument(skip(tx, items), fields(lines = items.len()))]
pub async fn reserve<T: StoreTransaction>(
    tx: &mut T,
    items: &[(ProductId, u32)],
) -> Result<Reservation, OrderError> {
    let mut lines = Vec::with_capacity(items.len());

    for (product_id, quantity) in lock_order(items)? {
        let product = match tx.lock_product(product_id).await? {
            Some(product) if product.listed => product,
            _ => return Err(OrderError::ProductNotFound { product_id }),
        };

        if i64::from(product.stock) < i64::from(quantity) {
            metrics::counter!("stock_reservation_conflicts_total").increment(1);
            return Err(OrderError::StockInsufficient {
                product_id,
                available: product.stock,
            });
        }

        match tx.decrement_stock(product_id, quantity).await {
            Ok(()) => {}
            Err(StoreError::InsufficientStock(_)) => {
                metrics::counter!("stock_reservation_conflicts_total").increment(1);
                return Err(OrderError::StockInsufficient {
                    product_id,
                    available: product.stock,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(%product_id, quantity, remaining = product.stock - quantity as i32, "stock reserved");
        lines.push(LineItem::new(product_id, product.name, product.price, quantity));
    }

    Ok(Reservation { lines })
}
