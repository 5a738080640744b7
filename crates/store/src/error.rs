use common::ProductId;
use thiserror::Error;

/// Errors that can occur when interacting with the order or cart stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be acquired within the configured bound,
    /// or the database broke a deadlock by aborting this transaction.
    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    /// The unique order-number key rejected an insert.
    #[error("Order number already exists: {0}")]
    DuplicateOrderNumber(String),

    /// A guarded stock decrement found fewer units than requested.
    #[error("Insufficient stock for product {0}")]
    InsufficientStock(ProductId),

    /// Adding to a cart line would overflow its quantity.
    #[error("Cart quantity overflow for product {0}")]
    CartQuantityOverflow(ProductId),

    /// The product row does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// A stored row could not be mapped back into a model.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// The backing store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
