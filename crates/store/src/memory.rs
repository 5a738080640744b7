use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, OrderStatus, ProductId};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    NewOrder, Order, Product, Result, StoreError,
    store::{OrderStore, StoreTransaction},
};

/// Lock wait bound used when none is configured.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// In-memory order store for tests and local development.
///
/// Each product row sits behind its own async mutex, so a transaction holding
/// a row excludes every other transaction from it exactly like
/// `SELECT ... FOR UPDATE` does. Stock changes are written through the held
/// guard and undone if the transaction ends without a commit.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    products: Arc<RwLock<HashMap<ProductId, Arc<Mutex<Product>>>>>,
    orders: Arc<RwLock<Vec<Order>>>,
    next_order_id: Arc<AtomicI64>,
    fail_next_insert: Arc<AtomicBool>,
    lock_timeout: Duration,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self {
            products: Arc::default(),
            orders: Arc::default(),
            next_order_id: Arc::new(AtomicI64::new(1)),
            fail_next_insert: Arc::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a transaction waits for a row lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Adds or replaces a product row.
    pub async fn insert_product(&self, product: Product) {
        self.products
            .write()
            .await
            .insert(product.id, Arc::new(Mutex::new(product)));
    }

    /// Returns the committed stock of a product.
    pub async fn stock_of(&self, product_id: ProductId) -> Option<i32> {
        self.product(product_id).await.ok().flatten().map(|p| p.stock)
    }

    /// Returns the number of committed orders, soft-marked ones included.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Returns all committed orders in insertion order.
    pub async fn orders(&self) -> Vec<Order> {
        self.orders.read().await.clone()
    }

    /// Makes the next `insert_order` call fail as if the database refused it.
    pub fn set_fail_next_insert(&self, fail: bool) {
        self.fail_next_insert.store(fail, Ordering::SeqCst);
    }

    /// Soft-marks an order. Returns false if no live order matched.
    pub async fn soft_delete_order(&self, order_no: &str) -> bool {
        let mut orders = self.orders.write().await;
        match orders
            .iter_mut()
            .find(|o| o.order_no == order_no && o.deleted_at.is_none())
        {
            Some(order) => {
                order.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    async fn row(&self, product_id: ProductId) -> Option<Arc<Mutex<Product>>> {
        self.products.read().await.get(&product_id).cloned()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            store: self.clone(),
            locked: BTreeMap::new(),
            staged: Vec::new(),
            committed: false,
        })
    }

    async fn find_order(&self, order_no: &str) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .find(|o| o.order_no == order_no && o.deleted_at.is_none())
            .cloned())
    }

    async fn update_status_if(
        &self,
        order_no: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool> {
        let mut orders = self.orders.write().await;
        let Some(order) = orders.iter_mut().find(|o| {
            o.order_no == order_no && o.deleted_at.is_none() && o.status == expected
        }) else {
            return Ok(false);
        };
        order.status = new;
        order.updated_at = Utc::now();
        Ok(true)
    }

    async fn product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let Some(row) = self.row(product_id).await else {
            return Ok(None);
        };
        let guard = tokio::time::timeout(self.lock_timeout, row.lock())
            .await
            .map_err(|_| StoreError::LockTimeout)?;
        Ok(Some(Product::clone(&guard)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct LockedRow {
    guard: OwnedMutexGuard<Product>,
    original_stock: i32,
}

/// A transaction against [`InMemoryOrderStore`].
pub struct InMemoryTransaction {
    store: InMemoryOrderStore,
    locked: BTreeMap<ProductId, LockedRow>,
    staged: Vec<Order>,
    committed: bool,
}

impl InMemoryTransaction {
    /// Locks the row if this transaction does not hold it yet.
    /// Returns false if the product does not exist.
    async fn acquire(&mut self, product_id: ProductId) -> Result<bool> {
        if self.locked.contains_key(&product_id) {
            return Ok(true);
        }
        let Some(row) = self.store.row(product_id).await else {
            return Ok(false);
        };
        let guard = tokio::time::timeout(self.store.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;
        let original_stock = guard.stock;
        self.locked.insert(
            product_id,
            LockedRow {
                guard,
                original_stock,
            },
        );
        Ok(true)
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_product(&mut self, product_id: ProductId) -> Result<Option<Product>> {
        if !self.acquire(product_id).await? {
            return Ok(None);
        }
        Ok(self
            .locked
            .get(&product_id)
            .map(|row| Product::clone(&row.guard)))
    }

    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        if !self.acquire(product_id).await? {
            return Err(StoreError::ProductNotFound(product_id));
        }
        let row = self
            .locked
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;
        let quantity =
            i32::try_from(quantity).map_err(|_| StoreError::InsufficientStock(product_id))?;
        if row.guard.stock < quantity {
            return Err(StoreError::InsufficientStock(product_id));
        }
        row.guard.stock -= quantity;
        Ok(())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        if self.store.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order insert rejected".to_string()));
        }

        let taken = self.staged.iter().any(|o| o.order_no == order.order_no)
            || self
                .store
                .orders
                .read()
                .await
                .iter()
                .any(|o| o.order_no == order.order_no);
        if taken {
            return Err(StoreError::DuplicateOrderNumber(order.order_no));
        }

        let now = Utc::now();
        let id = OrderId::new(self.store.next_order_id.fetch_add(1, Ordering::SeqCst));
        let order = Order {
            id,
            order_no: order.order_no,
            user_id: order.user_id,
            amount: order.amount,
            items: order.items,
            status: order.status,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.staged.push(order.clone());
        Ok(order)
    }

    async fn commit(mut self) -> Result<()> {
        let mut orders = self.store.orders.write().await;
        if let Some(dup) = self
            .staged
            .iter()
            .find(|s| orders.iter().any(|o| o.order_no == s.order_no))
        {
            return Err(StoreError::DuplicateOrderNumber(dup.order_no.clone()));
        }
        orders.append(&mut self.staged);
        drop(orders);
        self.committed = true;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for row in self.locked.values_mut() {
            row.guard.stock = row.original_stock;
        }
        if !self.locked.is_empty() || !self.staged.is_empty() {
            tracing::debug!(
                locked_rows = self.locked.len(),
                staged_orders = self.staged.len(),
                "in-memory transaction rolled back"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, UserId};

    async fn store_with(products: &[(i64, i64, i32)]) -> InMemoryOrderStore {
        let store = InMemoryOrderStore::new().with_lock_timeout(Duration::from_millis(50));
        for &(id, cents, stock) in products {
            store
                .insert_product(Product::new(
                    ProductId::new(id),
                    format!("product-{id}"),
                    Money::from_cents(cents),
                    stock,
                ))
                .await;
        }
        store
    }

    fn new_order(order_no: &str) -> NewOrder {
        NewOrder {
            order_no: order_no.to_string(),
            user_id: UserId::new(1),
            amount: Money::from_cents(100),
            items: vec![],
            status: OrderStatus::Unpaid,
        }
    }

    #[tokio::test]
    async fn commit_persists_stock_and_order() {
        let store = store_with(&[(1, 500, 5)]).await;
        let mut tx = store.begin().await.unwrap();
        let product = tx.lock_product(ProductId::new(1)).await.unwrap().unwrap();
        assert_eq!(product.stock, 5);
        tx.decrement_stock(ProductId::new(1), 2).await.unwrap();
        let order = tx.insert_order(new_order("ORD-1")).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.stock_of(ProductId::new(1)).await, Some(3));
        let found = store.find_order("ORD-1").await.unwrap().unwrap();
        assert_eq!(found.id, order.id);
    }

    #[tokio::test]
    async fn dropping_transaction_rolls_back() {
        let store = store_with(&[(1, 500, 5)]).await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.decrement_stock(ProductId::new(1), 4).await.unwrap();
            tx.insert_order(new_order("ORD-1")).await.unwrap();
        }
        assert_eq!(store.stock_of(ProductId::new(1)).await, Some(5));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn explicit_rollback_restores_stock() {
        let store = store_with(&[(1, 500, 5)]).await;
        let mut tx = store.begin().await.unwrap();
        tx.decrement_stock(ProductId::new(1), 5).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.stock_of(ProductId::new(1)).await, Some(5));
    }

    #[tokio::test]
    async fn guarded_decrement_refuses_to_go_negative() {
        let store = store_with(&[(1, 500, 1)]).await;
        let mut tx = store.begin().await.unwrap();
        let err = tx.decrement_stock(ProductId::new(1), 2).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock(id) if id == ProductId::new(1)));
    }

    #[tokio::test]
    async fn missing_product_is_none() {
        let store = store_with(&[]).await;
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_product(ProductId::new(42)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_locker_times_out() {
        let store = store_with(&[(1, 500, 5)]).await;
        let mut first = store.begin().await.unwrap();
        first.lock_product(ProductId::new(1)).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_product(ProductId::new(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout));

        first.commit().await.unwrap();
        assert!(second.lock_product(ProductId::new(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_order_number_rejected() {
        let store = store_with(&[]).await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(new_order("ORD-1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_order(new_order("ORD-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrderNumber(_)));
    }

    #[tokio::test]
    async fn injected_insert_failure_fires_once() {
        let store = store_with(&[]).await;
        store.set_fail_next_insert(true);
        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_order(new_order("ORD-1")).await.is_err());
        assert!(tx.insert_order(new_order("ORD-1")).await.is_ok());
    }

    #[tokio::test]
    async fn update_status_is_conditional() {
        let store = store_with(&[]).await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(new_order("ORD-1")).await.unwrap();
        tx.commit().await.unwrap();

        assert!(
            store
                .update_status_if("ORD-1", OrderStatus::Unpaid, OrderStatus::Paid)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_status_if("ORD-1", OrderStatus::Unpaid, OrderStatus::Canceled)
                .await
                .unwrap()
        );
        let order = store.find_order("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn soft_deleted_orders_are_hidden() {
        let store = store_with(&[]).await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(new_order("ORD-1")).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.soft_delete_order("ORD-1").await);
        assert!(store.find_order("ORD-1").await.unwrap().is_none());
        assert!(
            !store
                .update_status_if("ORD-1", OrderStatus::Unpaid, OrderStatus::Paid)
                .await
                .unwrap()
        );
        assert_eq!(store.order_count().await, 1);
    }
}
