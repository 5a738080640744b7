//! Persistence seam for the order service.
//!
//! The relational side (products and orders) is reached through
//! [`OrderStore`] / [`StoreTransaction`]; the key-value cart through
//! [`CartStore`]. Each has an in-memory implementation, and the relational
//! side has a PostgreSQL one.

pub mod cart;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use cart::{CartStore, InMemoryCartStore, cart_key};
pub use error::{Result, StoreError};
pub use memory::{InMemoryOrderStore, InMemoryTransaction};
pub use model::{NewOrder, Order, Product};
pub use postgres::{PostgresOrderStore, PostgresTransaction};
pub use store::{OrderStore, StoreTransaction};
