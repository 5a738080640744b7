//! Order error taxonomy.

use common::{OrderStatus, ProductId, UserId};
use store::StoreError;
use thiserror::Error;

use crate::order_number::IdError;

/// Errors surfaced by the order engine.
///
/// Every variant carries a stable symbolic [`code`](OrderError::code). The
/// `Display` output is meant for logs and may include infrastructure causes;
/// use [`public_message`](OrderError::public_message) for anything returned
/// to a caller.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Malformed or empty request.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// A referenced product does not exist or is not listed.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// A product has fewer units than requested.
    #[error("Insufficient stock for product {product_id} (available: {available})")]
    StockInsufficient {
        product_id: ProductId,
        available: i32,
    },

    /// Locks could not be acquired or the request deadline passed.
    #[error("System busy, please retry")]
    SystemBusy,

    /// Starting, running or committing the transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailure(#[source] StoreError),

    /// The requested status change is not allowed from the current status.
    #[error("Illegal status transition from {from} to {to}")]
    IllegalStatusTransition { from: OrderStatus, to: OrderStatus },

    /// No live order has this order number.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Cart reconciliation gave up. Logged only.
    #[error("Cart cleanup failed for user {user_id} after {attempts} attempts")]
    CleanupFailure { user_id: UserId, attempts: u32 },

    /// The order-number source refused to issue an id.
    #[error("Order number generation failed: {0}")]
    IdGeneration(#[from] IdError),

    /// The operation exists on the interface but is not supported.
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl OrderError {
    /// Returns the stable symbolic code.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::InvalidParams(_) => "INVALID_PARAMS",
            OrderError::ProductNotFound { .. } => "PRODUCT_NOT_FOUND",
            OrderError::StockInsufficient { .. } => "STOCK_INSUFFICIENT",
            OrderError::SystemBusy => "SYSTEM_BUSY",
            OrderError::TransactionFailure(_) => "TRANSACTION_FAILURE",
            OrderError::IllegalStatusTransition { .. } => "ILLEGAL_STATUS_TRANSITION",
            OrderError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            OrderError::CleanupFailure { .. } => "CLEANUP_FAILURE",
            OrderError::IdGeneration(_) => "ID_GENERATION_FAILURE",
            OrderError::NotImplemented(_) => "NOT_IMPLEMENTED",
        }
    }

    /// Returns a message safe to show callers. Infrastructure causes are
    /// replaced by a generic text.
    pub fn public_message(&self) -> String {
        match self {
            OrderError::TransactionFailure(_) | OrderError::IdGeneration(_) => {
                "order could not be processed, please retry".to_string()
            }
            OrderError::InvalidParams(_) => "invalid parameters".to_string(),
            OrderError::ProductNotFound { .. } => "product not found".to_string(),
            OrderError::StockInsufficient { .. } => "insufficient stock".to_string(),
            OrderError::IllegalStatusTransition { .. } => "illegal status transition".to_string(),
            OrderError::NotImplemented(_) => "not implemented".to_string(),
            other => other.to_string(),
        }
    }

    /// Returns the optional detail string for the caller.
    pub fn detail(&self) -> Option<String> {
        match self {
            OrderError::InvalidParams(reason) => Some(reason.clone()),
            OrderError::ProductNotFound { product_id } => Some(format!("productID: {product_id}")),
            OrderError::StockInsufficient {
                product_id,
                available,
            } => Some(format!("productID: {product_id}, stock: {available}")),
            OrderError::IllegalStatusTransition { from, to } => {
                Some(format!("from: {from}, to: {to}"))
            }
            OrderError::OrderNotFound(order_no) => Some(format!("orderID: {order_no}")),
            OrderError::NotImplemented(method) => Some(format!("method: {method}")),
            _ => None,
        }
    }

    /// Returns true if the caller may retry the identical request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderError::SystemBusy | OrderError::TransactionFailure(_) | OrderError::IdGeneration(_)
        )
    }

    /// Returns true for business-rule rejections, as opposed to
    /// infrastructure failures.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            OrderError::InvalidParams(_)
                | OrderError::ProductNotFound { .. }
                | OrderError::StockInsufficient { .. }
                | OrderError::IllegalStatusTransition { .. }
                | OrderError::OrderNotFound(_)
        )
    }
}

impl From<StoreError> for OrderError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout => OrderError::SystemBusy,
            StoreError::ProductNotFound(product_id) => OrderError::ProductNotFound { product_id },
            other => OrderError::TransactionFailure(other),
        }
    }
}
