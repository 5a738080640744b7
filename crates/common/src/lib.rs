//! Shared value types used across the order service crates.

pub mod money;
pub mod status;
pub mod types;

pub use money::Money;
pub use status::{OrderStatus, ParseStatusError};
pub use types::{LineItem, OrderId, ProductId, UserId};
