use async_trait::async_trait;
use common::{OrderStatus, ProductId};

use crate::{NewOrder, Order, Product, Result};

/// Handle to the relational store holding products and orders.
///
/// Implementations are cheap to clone and thread-safe; every request task
/// shares one handle backed by a connection pool.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// The transaction type opened by [`OrderStore::begin`].
    type Tx: StoreTransaction;

    /// Opens a transaction. Row-lock waits inside it are bounded by the
    /// store's lock timeout.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Loads an order by order number. Soft-marked orders are not returned.
    async fn find_order(&self, order_no: &str) -> Result<Option<Order>>;

    /// Sets `status = new` only where the order currently has status
    /// `expected`. Returns true if a row changed.
    async fn update_status_if(
        &self,
        order_no: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool>;

    /// Reads a product without locking it.
    async fn product(&self, product_id: ProductId) -> Result<Option<Product>>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// An open transaction against the relational store.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`] rolls
/// it back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Takes a row-level exclusive lock on the product and returns the locked
    /// row, or `None` if it does not exist.
    ///
    /// Fails with [`StoreError::LockTimeout`](crate::StoreError::LockTimeout)
    /// when the lock is not granted in time.
    async fn lock_product(&mut self, product_id: ProductId) -> Result<Option<Product>>;

    /// Applies `stock = stock - quantity` guarded by `stock >= quantity`.
    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()>;

    /// Inserts an order row, returning it with id and timestamps assigned.
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order>;

    /// Commits all changes and releases every lock.
    async fn commit(self) -> Result<()>;

    /// Discards all changes and releases every lock.
    async fn rollback(self) -> Result<()>;
}
