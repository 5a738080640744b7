//! Key-value cart store.
//!
//! A cart is a hash keyed `cart:{user_id}` mapping product id to quantity.
//! It is a convenience structure, not the source of truth for purchases, and
//! shares no transaction boundary with the order store.
//!
//! Only an in-memory implementation ships, so carts are local to one process
//! and do not survive a restart. A shared backend plugs in behind
//! [`CartStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use common::{ProductId, UserId};
use tokio::sync::RwLock;

use crate::{Result, StoreError};

/// Returns the key under which a user's cart is stored.
pub fn cart_key(user_id: UserId) -> String {
    format!("cart:{user_id}")
}

/// Operations the order service needs from the cart store. Each call is
/// atomic at the store level.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Atomically adds `delta` to the product's quantity, returning the new count.
    ///
    /// Fails with [`StoreError::CartQuantityOverflow`] and leaves the line
    /// unchanged if the sum does not fit.
    async fn add_item(&self, user_id: UserId, product_id: ProductId, delta: i64) -> Result<i64>;

    /// Returns the user's cart contents.
    async fn items(&self, user_id: UserId) -> Result<HashMap<ProductId, i64>>;

    /// Deletes the user's cart.
    async fn clear(&self, user_id: UserId) -> Result<()>;
}

/// In-memory cart store.
///
/// Can be told to fail a number of upcoming `clear` calls so that the
/// reconciliation retry path can be exercised.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCartStore {
    carts: Arc<RwLock<HashMap<String, HashMap<ProductId, i64>>>>,
    clear_failures: Arc<AtomicU32>,
    clear_attempts: Arc<AtomicU32>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `clear` fail.
    pub fn fail_next_clears(&self, count: u32) {
        self.clear_failures.store(count, Ordering::SeqCst);
    }

    /// Returns how many times `clear` has been called, failures included.
    pub fn clear_attempts(&self) -> u32 {
        self.clear_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn add_item(&self, user_id: UserId, product_id: ProductId, delta: i64) -> Result<i64> {
        let mut carts = self.carts.write().await;
        let count = carts
            .entry(cart_key(user_id))
            .or_default()
            .entry(product_id)
            .or_insert(0);
        *count = count
            .checked_add(delta)
            .ok_or(StoreError::CartQuantityOverflow(product_id))?;
        Ok(*count)
    }

    async fn items(&self, user_id: UserId) -> Result<HashMap<ProductId, i64>> {
        let carts = self.carts.read().await;
        Ok(carts.get(&cart_key(user_id)).cloned().unwrap_or_default())
    }

    async fn clear(&self, user_id: UserId) -> Result<()> {
        self.clear_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .clear_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable(format!(
                "cart store refused DEL {}",
                cart_key(user_id)
            )));
        }
        self.carts.write().await.remove(&cart_key(user_id));
        Ok(())
    }
}
