use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{LineItem, Money, OrderId, OrderStatus, ProductId, UserId};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{
    NewOrder, Order, Product, Result, StoreError,
    memory::DEFAULT_LOCK_TIMEOUT,
    store::{OrderStore, StoreTransaction},
};

const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const ORDER_NO_CONSTRAINT: &str = "orders_order_no_key";

const ORDER_COLUMNS: &str =
    "id, order_no, user_id, amount_cents, items, status, created_at, updated_at, deleted_at";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Connects a pool with at most `max_connections` connections.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Sets how long a transaction waits for a row lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts a product row and returns its assigned id. Used for seeding;
    /// the catalog service owns products in production.
    pub async fn insert_product(
        &self,
        name: &str,
        price: Money,
        stock: i32,
        listed: bool,
    ) -> Result<ProductId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO products (name, price_cents, stock, listed)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(price.cents())
        .bind(stock)
        .bind(listed)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProductId::new(id))
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        let Json(items): Json<Vec<LineItem>> = row.try_get("items")?;

        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            order_no: row.try_get("order_no")?,
            user_id: UserId::new(row.try_get("user_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            items,
            status,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
            deleted_at: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at")?,
        })
    }
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        stock: row.try_get("stock")?,
        listed: row.try_get("listed")?,
    })
}

/// Maps lock-wait and deadlock aborts onto [`StoreError::LockTimeout`].
fn map_lock_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && matches!(
            db_err.code().as_deref(),
            Some(LOCK_NOT_AVAILABLE) | Some(DEADLOCK_DETECTED)
        )
    {
        return StoreError::LockTimeout;
    }
    StoreError::Database(e)
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let mut tx = self.pool.begin().await?;
        // SET does not take bind parameters; the value is an integer we format.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        Ok(PostgresTransaction { tx })
    }

    async fn find_order(&self, order_no: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_no = $1 AND deleted_at IS NULL"
        ))
        .bind(order_no)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn update_status_if(
        &self,
        order_no: &str,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, updated_at = NOW()
            WHERE order_no = $2 AND status = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(new.as_str())
        .bind(order_no)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price_cents, stock, listed FROM products WHERE id = $1")
            .bind(product_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_product).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// A transaction against [`PostgresOrderStore`]. Rolled back on drop unless
/// committed.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_product(&mut self, product_id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, price_cents, stock, listed FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(product_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_lock_error)?;

        row.map(row_to_product).transpose()
    }

    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<()> {
        let quantity =
            i32::try_from(quantity).map_err(|_| StoreError::InsufficientStock(product_id))?;
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock - $1, updated_at = NOW()
            WHERE id = $2 AND stock >= $1
            "#,
        )
        .bind(quantity)
        .bind(product_id.as_i64())
        .execute(&mut *self.tx)
        .await
        .map_err(map_lock_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InsufficientStock(product_id));
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order> {
        let items = serde_json::to_value(&order.items)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (order_no, user_id, amount_cents, items, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(&order.order_no)
        .bind(order.user_id.as_i64())
        .bind(order.amount.cents())
        .bind(items)
        .bind(order.status.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(ORDER_NO_CONSTRAINT)
            {
                return StoreError::DuplicateOrderNumber(order.order_no.clone());
            }
            StoreError::Database(e)
        })?;

        PostgresOrderStore::row_to_order(row)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
