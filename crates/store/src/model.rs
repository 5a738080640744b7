//! Row models for the relational store.

use chrono::{DateTime, Utc};
use common::{LineItem, Money, OrderId, OrderStatus, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// A catalog product as seen by the order engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    /// Never negative; enforced by the reservation path, not the schema.
    pub stock: i32,
    /// Listing status. Unlisted products cannot be ordered.
    pub listed: bool,
}

impl Product {
    /// Creates a listed product.
    pub fn new(id: ProductId, name: impl Into<String>, price: Money, stock: i32) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            stock,
            listed: true,
        }
    }

    /// Marks the product as delisted.
    pub fn unlisted(mut self) -> Self {
        self.listed = false;
        self
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_no: String,
    pub user_id: UserId,
    pub amount: Money,
    pub items: Vec<LineItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the order is soft-marked as removed. Such orders are never
    /// returned by reads.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An order about to be inserted; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_no: String,
    pub user_id: UserId,
    pub amount: Money,
    pub items: Vec<LineItem>,
    pub status: OrderStatus,
}
